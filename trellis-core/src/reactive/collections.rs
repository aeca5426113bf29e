//! Observed Collections
//!
//! Keyed collections (dicts) and sets cannot be observed through plain
//! property access; every operation is instrumented at the method level.
//! Each method operates on the raw underlying collection, looks up both
//! the wrapped and raw forms of a key for robustness (a caller may hold
//! either form of an object used as a key), and wraps returned values
//! according to the handle's mode.
//!
//! Structural reads (size, iteration, membership sweeps) register the
//! iteration dependency; dicts additionally distinguish key-only
//! iteration, which value-only writes must not invalidate.

use tracing::warn;

use super::effect::{track, trigger, TriggerOp};
use super::value::{DepKey, Mode, ObjData, ObjKind, ObjRef, Value};

impl ObjRef {
    /// Look up a dict entry, trying the key as given and then its raw
    /// form.
    pub fn get_entry(&self, key: &Value) -> Value {
        let raw_key = key.to_raw();
        if self.mode().tracks() {
            if *key != raw_key {
                track(self.raw(), DepKey::Entry(key.clone()));
            }
            track(self.raw(), DepKey::Entry(raw_key.clone()));
        }

        let value = match &*self.raw().data().borrow() {
            ObjData::Dict(entries) => entries
                .get(key)
                .or_else(|| entries.get(&raw_key))
                .cloned(),
            _ => None,
        };
        match value {
            Some(value) => self.wrap_result(value),
            None => Value::Null,
        }
    }

    /// Dict/set membership, tracked against both key forms.
    pub fn has_entry(&self, key: &Value) -> bool {
        let raw_key = key.to_raw();
        if self.mode().tracks() {
            if *key != raw_key {
                track(self.raw(), DepKey::Entry(key.clone()));
            }
            track(self.raw(), DepKey::Entry(raw_key.clone()));
        }

        match &*self.raw().data().borrow() {
            ObjData::Dict(entries) => {
                entries.contains_key(key) || entries.contains_key(&raw_key)
            }
            ObjData::Set(items) => items.contains(key) || items.contains(&raw_key),
            _ => false,
        }
    }

    /// Insert or update a dict entry. Values are stored raw; the entry is
    /// matched under whichever form of the key is already present.
    pub fn set_entry(&self, key: impl Into<Value>, value: impl Into<Value>) {
        if self.mode().is_read_only() {
            warn!("set operation failed: collection is read-only");
            return;
        }
        let mut key = key.into();
        let value = value.into().to_raw();

        let (had_key, old) = {
            let mut data = self.raw().data().borrow_mut();
            let ObjData::Dict(entries) = &mut *data else {
                return;
            };
            let mut had_key = entries.contains_key(&key);
            if !had_key {
                key = key.to_raw();
                had_key = entries.contains_key(&key);
            } else {
                self.check_identity_key(entries, &key);
            }
            let old = entries.insert(key.clone(), value.clone());
            (had_key, old.unwrap_or(Value::Null))
        };

        if self.mode() == Mode::Raw {
            return;
        }
        if !had_key {
            trigger(self.raw(), TriggerOp::Add, Some(DepKey::Entry(key)), None);
        } else if old != value {
            trigger(self.raw(), TriggerOp::Set, Some(DepKey::Entry(key)), None);
        }
    }

    /// Add a value to a set (stored raw). No-op if already present.
    pub fn add_entry(&self, value: impl Into<Value>) {
        if self.mode().is_read_only() {
            warn!("add operation failed: collection is read-only");
            return;
        }
        let value = value.into().to_raw();

        let had = {
            let mut data = self.raw().data().borrow_mut();
            let ObjData::Set(items) = &mut *data else {
                return;
            };
            !items.insert(value.clone())
        };

        if !had && self.mode() != Mode::Raw {
            trigger(self.raw(), TriggerOp::Add, Some(DepKey::Entry(value)), None);
        }
    }

    /// Remove a dict entry or set member, matching either key form.
    pub fn delete_entry(&self, key: &Value) -> bool {
        if self.mode().is_read_only() {
            warn!("delete operation failed: collection is read-only");
            return false;
        }

        let (had_key, fired_key) = {
            let mut data = self.raw().data().borrow_mut();
            match &mut *data {
                ObjData::Dict(entries) => {
                    let mut lookup = key.clone();
                    let mut had = entries.contains_key(&lookup);
                    if !had {
                        lookup = key.to_raw();
                        had = entries.contains_key(&lookup);
                    } else {
                        self.check_identity_key(entries, &lookup);
                    }
                    if had {
                        entries.shift_remove(&lookup);
                    }
                    (had, lookup)
                }
                ObjData::Set(items) => {
                    let mut lookup = key.clone();
                    let mut had = items.shift_remove(&lookup);
                    if !had {
                        lookup = key.to_raw();
                        had = items.shift_remove(&lookup);
                    }
                    (had, lookup)
                }
                _ => (false, key.clone()),
            }
        };

        if had_key && self.mode() != Mode::Raw {
            trigger(
                self.raw(),
                TriggerOp::Delete,
                Some(DepKey::Entry(fired_key)),
                None,
            );
        }
        had_key
    }

    /// Remove every entry. Fires every dependency registered on the
    /// collection.
    pub fn clear_entries(&self) {
        if self.mode().is_read_only() {
            warn!("clear operation failed: collection is read-only");
            return;
        }

        let had_items = {
            let mut data = self.raw().data().borrow_mut();
            match &mut *data {
                ObjData::Dict(entries) => {
                    let had = !entries.is_empty();
                    entries.clear();
                    had
                }
                ObjData::Set(items) => {
                    let had = !items.is_empty();
                    items.clear();
                    had
                }
                _ => false,
            }
        };

        if had_items && self.mode() != Mode::Raw {
            trigger(self.raw(), TriggerOp::Clear, None, None);
        }
    }

    /// Iterate entries (value, key order mirrors the callback contract of
    /// collection `forEach`: value first). Registers the iteration
    /// dependency; both value and key are wrapped per mode.
    pub fn for_each(&self, mut f: impl FnMut(Value, Value)) {
        for (key, value) in self.entries() {
            f(value, key);
        }
    }

    /// Snapshot (key, value) pairs, tracked as iteration. Sets yield each
    /// member as both key and value.
    pub fn entries(&self) -> Vec<(Value, Value)> {
        if self.mode().tracks() {
            track(self.raw(), DepKey::Iterate);
        }
        let pairs: Vec<(Value, Value)> = match &*self.raw().data().borrow() {
            ObjData::Dict(entries) => entries
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            ObjData::Set(items) => {
                items.iter().map(|v| (v.clone(), v.clone())).collect()
            }
            _ => Vec::new(),
        };
        pairs
            .into_iter()
            .map(|(k, v)| (self.wrap_result(k), self.wrap_result(v)))
            .collect()
    }

    /// Snapshot keys. For dicts this registers the key-only iteration
    /// dependency, which value writes do not invalidate.
    pub fn entry_keys(&self) -> Vec<Value> {
        let is_dict = self.kind() == ObjKind::Dict;
        if self.mode().tracks() {
            let dep_key = if is_dict {
                DepKey::MapKeyIterate
            } else {
                DepKey::Iterate
            };
            track(self.raw(), dep_key);
        }
        let keys: Vec<Value> = match &*self.raw().data().borrow() {
            ObjData::Dict(entries) => entries.keys().cloned().collect(),
            ObjData::Set(items) => items.iter().cloned().collect(),
            _ => Vec::new(),
        };
        keys.into_iter().map(|k| self.wrap_result(k)).collect()
    }

    /// Snapshot values, tracked as iteration.
    pub fn entry_values(&self) -> Vec<Value> {
        if self.mode().tracks() {
            track(self.raw(), DepKey::Iterate);
        }
        let values: Vec<Value> = match &*self.raw().data().borrow() {
            ObjData::Dict(entries) => entries.values().cloned().collect(),
            ObjData::Set(items) => items.iter().cloned().collect(),
            _ => Vec::new(),
        };
        values.into_iter().map(|v| self.wrap_result(v)).collect()
    }

    fn check_identity_key(
        &self,
        entries: &indexmap::IndexMap<Value, Value>,
        key: &Value,
    ) {
        if cfg!(debug_assertions) {
            let raw_key = key.to_raw();
            if raw_key != *key && entries.contains_key(&raw_key) {
                warn!(
                    "collection contains both the raw and observed versions of \
                     the same object as keys, which can lead to inconsistencies"
                );
            }
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
