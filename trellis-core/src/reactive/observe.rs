//! Observed Object Access
//!
//! The accessor layer that makes plain objects and lists observable. In
//! the absence of ambient property interception, every read and write
//! goes through explicit `get`/`set`-style methods on a wrapped handle;
//! the wrapper registers dependencies on reads and fires triggers on
//! writes without changing the data's behavioral contract.
//!
//! Wrapping rules:
//!
//! - Deep modes lazily wrap object-valued reads in the same mode family,
//!   and strip wrappers off written values so raw storage never holds an
//!   observed handle.
//! - Shallow modes return and store values as-is.
//! - Read-only modes never track and turn mutations into warn-and-ignore
//!   no-ops.
//!
//! List stack methods (`push`/`pop`/`shift`/`unshift`/`splice`/`set_len`)
//! suspend tracking around their internal reads so a mutation call never
//! links the calling effect to `length`.

use tracing::warn;

use super::cell::{cell_read, cell_write};
use super::effect::{pause_tracking, reset_tracking, track, trigger, TriggerOp};
use super::value::{DepKey, Mode, ObjData, ObjKind, ObjRef, PropKey, Value};

/// Wrap an object in a deep observable handle.
///
/// Observing a read-only handle returns it unchanged; observing an
/// already-observed handle is idempotent.
pub fn observe(obj: &ObjRef) -> ObjRef {
    if obj.mode().is_read_only() {
        obj.clone()
    } else {
        obj.with_mode(Mode::Reactive)
    }
}

/// Wrap an object in a shallow observable handle: roots are tracked,
/// nested values are returned as-is.
pub fn observe_shallow(obj: &ObjRef) -> ObjRef {
    if obj.mode().is_read_only() {
        obj.clone()
    } else {
        obj.with_mode(Mode::Shallow)
    }
}

/// Wrap an object in a deep read-only handle: reads never track and
/// writes are rejected with a diagnostic.
pub fn frozen(obj: &ObjRef) -> ObjRef {
    obj.with_mode(Mode::ReadOnly)
}

/// Shallow read-only wrapper (root is read-only, nested values as-is).
pub fn frozen_shallow(obj: &ObjRef) -> ObjRef {
    obj.with_mode(Mode::ShallowReadOnly)
}

impl ObjRef {
    /// Wrap an object-valued read result per this handle's mode.
    pub(crate) fn wrap_result(&self, value: Value) -> Value {
        if !self.mode().is_deep() {
            return value;
        }
        match value {
            Value::Obj(nested) => {
                let wrapped = if self.mode() == Mode::ReadOnly {
                    frozen(&nested)
                } else {
                    observe(&nested)
                };
                Value::Obj(wrapped)
            }
            scalar => scalar,
        }
    }

    /// Read a property or list slot.
    ///
    /// Tracks the key in tracking modes; auto-unwraps a cell stored at a
    /// named key; lazily wraps nested objects in deep modes.
    pub fn get(&self, key: impl Into<PropKey>) -> Value {
        let key = key.into();
        let value = {
            match (&*self.raw().data().borrow(), &key) {
                (ObjData::Map(map), PropKey::Name(name)) => {
                    map.get(name).cloned().unwrap_or(Value::Null)
                }
                (ObjData::List(items), PropKey::Index(i)) => {
                    items.get(*i).cloned().unwrap_or(Value::Null)
                }
                _ => Value::Null,
            }
        };

        if self.mode().tracks() {
            track(self.raw(), key.dep_key());
        }

        // Shallow and raw modes hand back storage as-is, cell unwrapping
        // included.
        if !self.mode().is_deep() {
            return value;
        }

        // Cell unwrapping: skipped for list-by-index access so lists of
        // cells stay addressable as cells.
        if let Value::Obj(obj) = &value {
            if obj.kind() == ObjKind::Cell && !matches!(key, PropKey::Index(_)) {
                return cell_read(obj, self.mode().tracks());
            }
        }

        self.wrap_result(value)
    }

    /// Read without registering any dependency, regardless of mode.
    pub fn get_untracked(&self, key: impl Into<PropKey>) -> Value {
        self.to_raw().get(key)
    }

    /// Write a property or list slot.
    ///
    /// Deep modes strip observable wrappers off the value before storing.
    /// Assigning a non-cell into a named key currently holding a cell
    /// writes through into the cell. Fires ADD for a new key, SET for a
    /// changed one (same-value-zero comparison), and nothing otherwise.
    pub fn set(&self, key: impl Into<PropKey>, value: impl Into<Value>) {
        let key = key.into();
        let mut value = value.into();

        if self.mode().is_read_only() {
            warn!(?key, "set operation failed: target is read-only");
            return;
        }

        if self.mode().is_deep() {
            value = value.to_raw();

            // Write-through into a cell held at this key.
            if let PropKey::Name(_) = &key {
                let old = self.raw_lookup(&key);
                if let Value::Obj(old_obj) = &old {
                    if old_obj.kind() == ObjKind::Cell && !value.is_cell() {
                        cell_write(old_obj, value);
                        return;
                    }
                }
            }
        }

        let (had_key, old) = {
            let mut data = self.raw().data().borrow_mut();
            match (&mut *data, &key) {
                (ObjData::Map(map), PropKey::Name(name)) => {
                    let old = map.insert(name.clone(), value.clone());
                    (old.is_some(), old.unwrap_or(Value::Null))
                }
                (ObjData::List(items), PropKey::Index(i)) => {
                    if *i < items.len() {
                        let old = std::mem::replace(&mut items[*i], value.clone());
                        (true, old)
                    } else {
                        // Writing past the end extends the list.
                        items.resize(*i, Value::Null);
                        items.push(value.clone());
                        (false, Value::Null)
                    }
                }
                _ => return,
            }
        };

        if self.mode() == Mode::Raw {
            // Direct mutation of the raw datum is unobserved.
            return;
        }

        if !had_key {
            trigger(self.raw(), TriggerOp::Add, Some(key.dep_key()), None);
        } else if old != value {
            trigger(self.raw(), TriggerOp::Set, Some(key.dep_key()), None);
        }
    }

    fn raw_lookup(&self, key: &PropKey) -> Value {
        match (&*self.raw().data().borrow(), key) {
            (ObjData::Map(map), PropKey::Name(name)) => {
                map.get(name).cloned().unwrap_or(Value::Null)
            }
            (ObjData::List(items), PropKey::Index(i)) => {
                items.get(*i).cloned().unwrap_or(Value::Null)
            }
            _ => Value::Null,
        }
    }

    /// Remove a named property. Fires DELETE if the key existed.
    pub fn delete(&self, key: impl Into<PropKey>) -> bool {
        let key = key.into();

        if self.mode().is_read_only() {
            warn!(?key, "delete operation failed: target is read-only");
            return false;
        }

        let had_key = {
            let mut data = self.raw().data().borrow_mut();
            match (&mut *data, &key) {
                (ObjData::Map(map), PropKey::Name(name)) => {
                    map.shift_remove(name).is_some()
                }
                (ObjData::List(items), PropKey::Index(i)) => {
                    // Lists only vacate the slot; length is unchanged.
                    if *i < items.len() {
                        items[*i] = Value::Null;
                        true
                    } else {
                        false
                    }
                }
                _ => false,
            }
        };

        if had_key && self.mode() != Mode::Raw {
            trigger(self.raw(), TriggerOp::Delete, Some(key.dep_key()), None);
        }
        had_key
    }

    /// Membership test, tracked against the key.
    pub fn has(&self, key: impl Into<PropKey>) -> bool {
        let key = key.into();
        if self.mode().tracks() {
            track(self.raw(), key.dep_key());
        }
        match (&*self.raw().data().borrow(), &key) {
            (ObjData::Map(map), PropKey::Name(name)) => map.contains_key(name),
            (ObjData::List(items), PropKey::Index(i)) => {
                *i < items.len() && !items[*i].is_null()
            }
            _ => false,
        }
    }

    /// Enumerate own keys, registering an iteration dependency (the
    /// length dependency for lists) so structural changes invalidate the
    /// enumeration.
    pub fn keys(&self) -> Vec<PropKey> {
        if self.mode().tracks() {
            let dep_key = match self.kind() {
                ObjKind::List => DepKey::Length,
                _ => DepKey::Iterate,
            };
            track(self.raw(), dep_key);
        }
        match &*self.raw().data().borrow() {
            ObjData::Map(map) => map.keys().map(|k| PropKey::Name(k.clone())).collect(),
            ObjData::List(items) => (0..items.len()).map(PropKey::Index).collect(),
            _ => Vec::new(),
        }
    }

    /// Element count: tracked as the length (lists) or iteration (other
    /// shapes) dependency.
    pub fn len(&self) -> usize {
        if self.mode().tracks() {
            let dep_key = match self.kind() {
                ObjKind::List => DepKey::Length,
                _ => DepKey::Iterate,
            };
            track(self.raw(), dep_key);
        }
        match &*self.raw().data().borrow() {
            ObjData::Map(map) => map.len(),
            ObjData::List(items) => items.len(),
            ObjData::Dict(entries) => entries.len(),
            ObjData::Set(items) => items.len(),
            ObjData::Cell(_) => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot list contents, tracking length and every index, wrapping
    /// elements per mode.
    pub fn values(&self) -> Vec<Value> {
        let items = match &*self.raw().data().borrow() {
            ObjData::List(items) => items.clone(),
            _ => return Vec::new(),
        };
        if self.mode().tracks() {
            track(self.raw(), DepKey::Length);
            for i in 0..items.len() {
                track(self.raw(), DepKey::Index(i));
            }
        }
        items.into_iter().map(|v| self.wrap_result(v)).collect()
    }

    // ------------------------------------------------------------------
    // List identity methods
    // ------------------------------------------------------------------

    /// Position of `target` in the list, searching first with the value
    /// as given and retrying with raw forms on a miss.
    pub fn index_of(&self, target: &Value) -> Option<usize> {
        self.identity_search(target, false)
    }

    /// Like [`index_of`](Self::index_of), scanning from the end.
    pub fn last_index_of(&self, target: &Value) -> Option<usize> {
        self.identity_search(target, true)
    }

    /// Membership by identity-sensitive search.
    pub fn includes(&self, target: &Value) -> bool {
        self.identity_search(target, false).is_some()
    }

    fn identity_search(&self, target: &Value, from_end: bool) -> Option<usize> {
        let items = match &*self.raw().data().borrow() {
            ObjData::List(items) => items.clone(),
            _ => return None,
        };
        if self.mode().tracks() {
            track(self.raw(), DepKey::Length);
            for i in 0..items.len() {
                track(self.raw(), DepKey::Index(i));
            }
        }

        let find = |probe: &dyn Fn(&Value) -> bool| {
            if from_end {
                items.iter().rposition(|item| probe(item))
            } else {
                items.iter().position(|item| probe(item))
            }
        };

        // Search with the argument as given (which may be a wrapped
        // handle), then fall back to comparing raw forms: the caller may
        // hold the wrapped handle for an element stored raw, or vice
        // versa.
        find(&|item| item == target)
            .or_else(|| {
                let raw_target = target.to_raw();
                find(&|item| item.to_raw() == raw_target)
            })
    }

    // ------------------------------------------------------------------
    // List stack methods
    // ------------------------------------------------------------------

    /// Append to the list. Exactly one change notification is produced
    /// (the ADD fans out to the length dependency inside `trigger`).
    pub fn push(&self, value: impl Into<Value>) -> usize {
        if self.deny_mutation("push") {
            return self.to_raw().len();
        }
        let mut value = value.into();
        if self.mode().is_deep() {
            value = value.to_raw();
        }

        pause_tracking();
        let index = {
            let mut data = self.raw().data().borrow_mut();
            match &mut *data {
                ObjData::List(items) => {
                    items.push(value);
                    items.len() - 1
                }
                _ => {
                    reset_tracking();
                    return 0;
                }
            }
        };
        reset_tracking();

        if self.mode() != Mode::Raw {
            trigger(self.raw(), TriggerOp::Add, Some(DepKey::Index(index)), None);
        }
        index + 1
    }

    /// Remove and return the last element.
    pub fn pop(&self) -> Value {
        if self.deny_mutation("pop") {
            return Value::Null;
        }

        pause_tracking();
        let (value, new_len) = {
            let mut data = self.raw().data().borrow_mut();
            match &mut *data {
                ObjData::List(items) => match items.pop() {
                    Some(value) => (value, items.len()),
                    None => {
                        reset_tracking();
                        return Value::Null;
                    }
                },
                _ => {
                    reset_tracking();
                    return Value::Null;
                }
            }
        };
        reset_tracking();

        if self.mode() != Mode::Raw {
            trigger(
                self.raw(),
                TriggerOp::Set,
                Some(DepKey::Length),
                Some(new_len),
            );
        }
        value
    }

    /// Remove and return the first element; remaining elements shift down.
    pub fn shift(&self) -> Value {
        if self.deny_mutation("shift") {
            return Value::Null;
        }

        pause_tracking();
        let (value, new_len) = {
            let mut data = self.raw().data().borrow_mut();
            match &mut *data {
                ObjData::List(items) if !items.is_empty() => {
                    let value = items.remove(0);
                    (value, items.len())
                }
                _ => {
                    reset_tracking();
                    return Value::Null;
                }
            }
        };
        reset_tracking();

        if self.mode() != Mode::Raw {
            // Every surviving slot changed, then the list shrank.
            for i in 0..new_len {
                trigger(self.raw(), TriggerOp::Set, Some(DepKey::Index(i)), None);
            }
            trigger(
                self.raw(),
                TriggerOp::Set,
                Some(DepKey::Length),
                Some(new_len),
            );
        }
        value
    }

    /// Insert at the front; existing elements shift up.
    pub fn unshift(&self, value: impl Into<Value>) -> usize {
        if self.deny_mutation("unshift") {
            return self.to_raw().len();
        }
        let mut value = value.into();
        if self.mode().is_deep() {
            value = value.to_raw();
        }

        pause_tracking();
        let old_len = {
            let mut data = self.raw().data().borrow_mut();
            match &mut *data {
                ObjData::List(items) => {
                    let old_len = items.len();
                    items.insert(0, value);
                    old_len
                }
                _ => {
                    reset_tracking();
                    return 0;
                }
            }
        };
        reset_tracking();

        if self.mode() != Mode::Raw {
            for i in 0..old_len {
                trigger(self.raw(), TriggerOp::Set, Some(DepKey::Index(i)), None);
            }
            trigger(
                self.raw(),
                TriggerOp::Add,
                Some(DepKey::Index(old_len)),
                None,
            );
        }
        old_len + 1
    }

    /// Replace `delete_count` elements starting at `start` with `items`,
    /// returning the removed elements.
    pub fn splice(
        &self,
        start: usize,
        delete_count: usize,
        items: Vec<Value>,
    ) -> Vec<Value> {
        if self.deny_mutation("splice") {
            return Vec::new();
        }
        let items: Vec<Value> = if self.mode().is_deep() {
            items.into_iter().map(|v| v.to_raw()).collect()
        } else {
            items
        };

        pause_tracking();
        let (removed, old_len, new_len, start) = {
            let mut data = self.raw().data().borrow_mut();
            match &mut *data {
                ObjData::List(list) => {
                    let old_len = list.len();
                    let start = start.min(old_len);
                    let end = (start + delete_count).min(old_len);
                    let removed: Vec<Value> = list.splice(start..end, items).collect();
                    (removed, old_len, list.len(), start)
                }
                _ => {
                    reset_tracking();
                    return Vec::new();
                }
            }
        };
        reset_tracking();

        if self.mode() != Mode::Raw {
            for i in start..old_len.min(new_len) {
                trigger(self.raw(), TriggerOp::Set, Some(DepKey::Index(i)), None);
            }
            if new_len > old_len {
                for i in old_len..new_len {
                    trigger(self.raw(), TriggerOp::Add, Some(DepKey::Index(i)), None);
                }
            } else if new_len < old_len {
                trigger(
                    self.raw(),
                    TriggerOp::Set,
                    Some(DepKey::Length),
                    Some(new_len),
                );
            }
        }
        removed
    }

    /// Explicit length write. Shrinking fires the length dependency plus
    /// every index dependency at or beyond the new length.
    pub fn set_len(&self, new_len: usize) {
        if self.deny_mutation("set_len") {
            return;
        }

        pause_tracking();
        let old_len = {
            let mut data = self.raw().data().borrow_mut();
            match &mut *data {
                ObjData::List(items) => {
                    let old_len = items.len();
                    items.resize(new_len, Value::Null);
                    old_len
                }
                _ => {
                    reset_tracking();
                    return;
                }
            }
        };
        reset_tracking();

        if old_len != new_len && self.mode() != Mode::Raw {
            trigger(
                self.raw(),
                TriggerOp::Set,
                Some(DepKey::Length),
                Some(new_len),
            );
        }
    }

    fn deny_mutation(&self, op: &str) -> bool {
        if self.mode().is_read_only() {
            warn!(op, "mutation failed: target is read-only");
            true
        } else {
            false
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
