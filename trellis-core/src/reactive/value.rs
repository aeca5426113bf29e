//! Dynamic Values
//!
//! This module defines the dynamic value type that flows through the
//! reactive layer: scalars plus shared handles to structured data
//! (objects, lists, keyed collections, sets, and cells).
//!
//! # Handles and modes
//!
//! Structured data is owned by a reference-counted raw object. A handle
//! (`ObjRef`) pairs the raw object with an access mode. `Mode::Raw` is the
//! plain datum; the other modes are observable wrappers layered over the
//! same storage. The wrapped and raw forms of one object are *distinct
//! values*: they compare unequal and hash differently, exactly as an
//! interception proxy is distinct from its target. This distinction is
//! what lets collection lookups try both forms of a key.
//!
//! # Equality
//!
//! Value equality is same-value-zero: `NaN` equals itself, `0.0` equals
//! `-0.0`, and an integer-valued float equals the corresponding integer.
//! Handles compare by identity and mode, never by contents.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use indexmap::{IndexMap, IndexSet};
use serde::ser::{Serialize, SerializeMap, SerializeSeq, Serializer};

use super::dep::Dep;

/// Counter for generating unique object IDs.
static OBJ_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Generate a new unique object ID.
fn next_obj_id() -> u64 {
    OBJ_ID_COUNTER.fetch_add(1, Ordering::Relaxed)
}

/// A dynamic value: a scalar or a handle to structured data.
#[derive(Clone)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Rc<str>),
    Obj(ObjRef),
}

/// Access mode carried by an object handle.
///
/// `Raw` is the unobserved datum. The remaining modes form the observable
/// wrapper surface: deep, shallow, and their read-only counterparts.
/// Read-only handles never register dependencies and reject mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mode {
    Raw,
    Reactive,
    Shallow,
    ReadOnly,
    ShallowReadOnly,
}

impl Mode {
    /// Whether reads through this mode register dependencies.
    pub fn tracks(self) -> bool {
        matches!(self, Mode::Reactive | Mode::Shallow)
    }

    /// Whether writes through this mode are rejected.
    pub fn is_read_only(self) -> bool {
        matches!(self, Mode::ReadOnly | Mode::ShallowReadOnly)
    }

    /// Whether reads recursively wrap nested objects.
    pub fn is_deep(self) -> bool {
        matches!(self, Mode::Reactive | Mode::ReadOnly)
    }
}

/// The storage shapes a raw object can take.
pub enum ObjData {
    /// Plain object: insertion-ordered, string-keyed.
    Map(IndexMap<Rc<str>, Value>),
    /// Ordered list.
    List(Vec<Value>),
    /// Keyed collection with arbitrary value keys.
    Dict(IndexMap<Value, Value>),
    /// Membership collection.
    Set(IndexSet<Value>),
    /// Boxed single-value reference.
    Cell(Value),
}

/// Shape discriminator for a raw object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjKind {
    Map,
    List,
    Dict,
    Set,
    Cell,
}

/// Identifies one observable aspect of an object in its dep table.
#[derive(Clone, PartialEq, Eq, Hash)]
pub enum DepKey {
    /// A named property of a plain object.
    Prop(Rc<str>),
    /// A list index.
    Index(usize),
    /// The list length.
    Length,
    /// A dict/set entry, keyed by value.
    Entry(Value),
    /// The slot of a cell.
    CellValue,
    /// Structural iteration (enumeration, size, membership sweeps).
    Iterate,
    /// Key-only iteration over a dict.
    MapKeyIterate,
}

impl fmt::Debug for DepKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DepKey::Prop(name) => write!(f, "Prop({name})"),
            DepKey::Index(i) => write!(f, "Index({i})"),
            DepKey::Length => write!(f, "Length"),
            DepKey::Entry(v) => write!(f, "Entry({v:?})"),
            DepKey::CellValue => write!(f, "CellValue"),
            DepKey::Iterate => write!(f, "Iterate"),
            DepKey::MapKeyIterate => write!(f, "MapKeyIterate"),
        }
    }
}

/// A key addressing a plain object property or list slot.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PropKey {
    Name(Rc<str>),
    Index(usize),
}

impl PropKey {
    /// The dep-table key this property key tracks under.
    pub(crate) fn dep_key(&self) -> DepKey {
        match self {
            PropKey::Name(name) => DepKey::Prop(name.clone()),
            PropKey::Index(i) => DepKey::Index(*i),
        }
    }
}

impl From<&str> for PropKey {
    fn from(name: &str) -> Self {
        PropKey::Name(Rc::from(name))
    }
}

impl From<usize> for PropKey {
    fn from(index: usize) -> Self {
        PropKey::Index(index)
    }
}

/// The raw shared object: storage plus its own dependency table.
///
/// The dep table being a field of the object is what ties its lifetime to
/// the object's: dropping the last handle drops every dep registered on it.
pub struct RawObj {
    id: u64,
    data: RefCell<ObjData>,
    deps: RefCell<HashMap<DepKey, Rc<Dep>>>,
}

impl RawObj {
    fn new(data: ObjData) -> Rc<Self> {
        Rc::new(Self {
            id: next_obj_id(),
            data: RefCell::new(data),
            deps: RefCell::new(HashMap::new()),
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn data(&self) -> &RefCell<ObjData> {
        &self.data
    }

    pub(crate) fn deps(&self) -> &RefCell<HashMap<DepKey, Rc<Dep>>> {
        &self.deps
    }

    pub fn kind(&self) -> ObjKind {
        match &*self.data.borrow() {
            ObjData::Map(_) => ObjKind::Map,
            ObjData::List(_) => ObjKind::List,
            ObjData::Dict(_) => ObjKind::Dict,
            ObjData::Set(_) => ObjKind::Set,
            ObjData::Cell(_) => ObjKind::Cell,
        }
    }
}

/// A handle to a shared object: the raw object plus an access mode.
#[derive(Clone)]
pub struct ObjRef {
    raw: Rc<RawObj>,
    mode: Mode,
}

impl ObjRef {
    /// Create a new empty plain object (raw mode).
    pub fn new_map() -> Self {
        Self::from_data(ObjData::Map(IndexMap::new()))
    }

    /// Create a new list (raw mode).
    pub fn new_list(items: Vec<Value>) -> Self {
        Self::from_data(ObjData::List(items))
    }

    /// Create a new keyed collection (raw mode).
    pub fn new_dict() -> Self {
        Self::from_data(ObjData::Dict(IndexMap::new()))
    }

    /// Create a new set (raw mode).
    pub fn new_set() -> Self {
        Self::from_data(ObjData::Set(IndexSet::new()))
    }

    /// Create a new cell holding `value` (raw mode).
    pub fn new_cell(value: Value) -> Self {
        Self::from_data(ObjData::Cell(value))
    }

    fn from_data(data: ObjData) -> Self {
        Self {
            raw: RawObj::new(data),
            mode: Mode::Raw,
        }
    }

    /// The shared raw object behind this handle.
    pub fn raw(&self) -> &Rc<RawObj> {
        &self.raw
    }

    /// This handle's access mode.
    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// The storage shape of the underlying object.
    pub fn kind(&self) -> ObjKind {
        self.raw.kind()
    }

    /// A handle to the same object under a different mode.
    pub fn with_mode(&self, mode: Mode) -> Self {
        Self {
            raw: Rc::clone(&self.raw),
            mode,
        }
    }

    /// The raw (unobserved) handle for this object.
    pub fn to_raw(&self) -> Self {
        self.with_mode(Mode::Raw)
    }

    /// Whether the two handles point at the same underlying object,
    /// regardless of mode.
    pub fn same_raw(&self, other: &ObjRef) -> bool {
        Rc::ptr_eq(&self.raw, &other.raw)
    }

    /// Whether this handle is an observable wrapper (any non-raw mode).
    pub fn is_observed(&self) -> bool {
        self.mode != Mode::Raw
    }
}

impl PartialEq for ObjRef {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.raw, &other.raw) && self.mode == other.mode
    }
}

impl Eq for ObjRef {}

impl Hash for ObjRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        (Rc::as_ptr(&self.raw) as usize).hash(state);
        self.mode.hash(state);
    }
}

impl fmt::Debug for ObjRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjRef")
            .field("id", &self.raw.id)
            .field("kind", &self.kind())
            .field("mode", &self.mode)
            .finish()
    }
}

impl Value {
    pub fn str(s: &str) -> Self {
        Value::Str(Rc::from(s))
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// The object handle, if this value is one.
    pub fn as_obj(&self) -> Option<&ObjRef> {
        match self {
            Value::Obj(obj) => Some(obj),
            _ => None,
        }
    }

    /// Whether this value is a cell handle.
    pub fn is_cell(&self) -> bool {
        matches!(self, Value::Obj(o) if o.kind() == ObjKind::Cell)
    }

    /// Strip any observable wrapper, yielding the raw form of the value.
    /// Scalars are returned unchanged.
    pub fn to_raw(&self) -> Value {
        match self {
            Value::Obj(obj) if obj.is_observed() => Value::Obj(obj.to_raw()),
            other => other.clone(),
        }
    }

    /// Truthiness, for conditional rendering helpers.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(f) => *f != 0.0 && !f.is_nan(),
            Value::Str(s) => !s.is_empty(),
            Value::Obj(_) => true,
        }
    }

    /// If this float is an exactly representable integer, its value.
    fn integral(f: f64) -> Option<i64> {
        if f.fract() == 0.0 && f >= i64::MIN as f64 && f <= i64::MAX as f64 {
            Some(f as i64)
        } else {
            None
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            // Same-value-zero: NaN equals itself, 0.0 equals -0.0.
            (Value::Float(a), Value::Float(b)) => {
                (a.is_nan() && b.is_nan()) || a == b
            }
            (Value::Int(a), Value::Float(b)) | (Value::Float(b), Value::Int(a)) => {
                Value::integral(*b) == Some(*a)
            }
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Obj(a), Value::Obj(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            Value::Null => state.write_u8(0),
            Value::Bool(b) => {
                state.write_u8(1);
                b.hash(state);
            }
            Value::Int(i) => {
                state.write_u8(2);
                i.hash(state);
            }
            Value::Float(f) => {
                // Integer-valued floats hash as their integer so dict
                // lookups unify the two spellings of one number.
                if let Some(i) = Value::integral(*f) {
                    state.write_u8(2);
                    i.hash(state);
                } else if f.is_nan() {
                    state.write_u8(3);
                    state.write_u64(0x7ff8_0000_0000_0000);
                } else {
                    state.write_u8(3);
                    state.write_u64(f.to_bits());
                }
            }
            Value::Str(s) => {
                state.write_u8(4);
                s.hash(state);
            }
            Value::Obj(obj) => {
                state.write_u8(5);
                obj.hash(state);
            }
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Str(s) => write!(f, "{s:?}"),
            Value::Obj(obj) => obj.fmt(f),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i as i64)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(Rc::from(s))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(Rc::from(s.as_str()))
    }
}

impl From<ObjRef> for Value {
    fn from(obj: ObjRef) -> Self {
        Value::Obj(obj)
    }
}

impl Default for Value {
    fn default() -> Self {
        Value::Null
    }
}

// ----------------------------------------------------------------------------
// Snapshot serialization
// ----------------------------------------------------------------------------

/// Serializes the value as plain data, untracked. Handles are serialized
/// by contents (cells by their inner value). Cyclic object graphs are the
/// caller's responsibility.
impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Null => serializer.serialize_unit(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Int(i) => serializer.serialize_i64(*i),
            Value::Float(f) => serializer.serialize_f64(*f),
            Value::Str(s) => serializer.serialize_str(s),
            Value::Obj(obj) => match &*obj.raw().data().borrow() {
                ObjData::Map(map) => {
                    let mut ser = serializer.serialize_map(Some(map.len()))?;
                    for (k, v) in map {
                        ser.serialize_entry(&**k, v)?;
                    }
                    ser.end()
                }
                ObjData::List(items) => {
                    let mut ser = serializer.serialize_seq(Some(items.len()))?;
                    for item in items {
                        ser.serialize_element(item)?;
                    }
                    ser.end()
                }
                ObjData::Dict(entries) => {
                    let mut ser = serializer.serialize_map(Some(entries.len()))?;
                    for (k, v) in entries {
                        ser.serialize_entry(k, v)?;
                    }
                    ser.end()
                }
                ObjData::Set(items) => {
                    let mut ser = serializer.serialize_seq(Some(items.len()))?;
                    for item in items {
                        ser.serialize_element(item)?;
                    }
                    ser.end()
                }
                ObjData::Cell(inner) => inner.serialize(serializer),
            },
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
