use std::rc::Rc;

use super::value::{ObaString, Value};

const MAX_LOAD: f64 = 0.75;

#[derive(Clone)]
struct Entry {
    key: Option<Rc<ObaString>>,
    value: Value,
    /// A tombstone is a deleted slot: `key = None` but `tombstone = true`,
    /// so probing continues through it instead of stopping as it would
    /// on a genuinely empty slot.
    tombstone: bool,
}

impl Entry {
    fn empty() -> Self {
        Entry {
            key: None,
            value: Value::Nil,
            tombstone: false,
        }
    }
}

/// Open-addressed hash map from interned string keys to `Value`, used for
/// globals. Linear probing; grows (and rehashes) aggressively: the load
/// factor check uses `count <= capacity * MAX_LOAD` rather than `>`, so a
/// grow is triggered on essentially every insert while capacity keeps
/// ahead of count. This mirrors the source table's load-factor check
/// verbatim rather than silently tightening it to the usual `>` test —
/// see DESIGN.md.
#[derive(Default)]
pub struct Table {
    entries: Vec<Entry>,
    count: usize,
}

impl Table {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            count: 0,
        }
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn capacity(&self) -> usize {
        self.entries.len()
    }

    fn find_slot(entries: &[Entry], capacity: usize, key: &ObaString) -> usize {
        let mut index = (key.hash as usize) % capacity;
        let mut first_tombstone: Option<usize> = None;
        loop {
            let entry = &entries[index];
            match &entry.key {
                Some(existing) if existing.as_ref() == key => return index,
                Some(_) => {}
                None if entry.tombstone => {
                    if first_tombstone.is_none() {
                        first_tombstone = Some(index);
                    }
                }
                None => return first_tombstone.unwrap_or(index),
            }
            index = (index + 1) % capacity;
        }
    }

    fn grow(&mut self) {
        let new_capacity = super::chunk::grow_capacity(self.capacity());
        let mut new_entries: Vec<Entry> = (0..new_capacity).map(|_| Entry::empty()).collect();
        let mut live_count = 0;
        for entry in self.entries.drain(..) {
            if let Some(key) = entry.key {
                let index = Self::find_slot(&new_entries, new_capacity, &key);
                new_entries[index] = Entry {
                    key: Some(key),
                    value: entry.value,
                    tombstone: false,
                };
                live_count += 1;
            }
        }
        self.entries = new_entries;
        self.count = live_count;
    }

    fn needs_grow(&self) -> bool {
        self.entries.is_empty() || (self.count as f64) <= (self.capacity() as f64) * MAX_LOAD
    }

    /// Returns whether `key` was newly inserted (as opposed to overwriting
    /// an existing mapping).
    pub fn set(&mut self, key: Rc<ObaString>, value: Value) -> bool {
        if self.needs_grow() {
            self.grow();
        }
        let capacity = self.capacity();
        let index = Self::find_slot(&self.entries, capacity, &key);
        let is_new_key = self.entries[index].key.is_none();
        if is_new_key && !self.entries[index].tombstone {
            self.count += 1;
        }
        self.entries[index] = Entry {
            key: Some(key),
            value,
            tombstone: false,
        };
        is_new_key
    }

    pub fn get(&self, key: &ObaString) -> Option<&Value> {
        if self.entries.is_empty() {
            return None;
        }
        let index = Self::find_slot(&self.entries, self.capacity(), key);
        self.entries[index].key.as_ref().map(|_| &self.entries[index].value)
    }

    pub fn delete(&mut self, key: &ObaString) -> bool {
        if self.entries.is_empty() {
            return false;
        }
        let capacity = self.capacity();
        let index = Self::find_slot(&self.entries, capacity, key);
        if self.entries[index].key.is_none() {
            return false;
        }
        self.entries[index] = Entry {
            key: None,
            value: Value::Nil,
            tombstone: true,
        };
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(s: &str) -> Rc<ObaString> {
        Rc::new(ObaString::new(s.to_string()))
    }

    #[test]
    fn set_then_get_round_trips() {
        let mut table = Table::new();
        table.set(key("a"), Value::Number(1.0));
        assert_eq!(table.get(&ObaString::new("a".to_string())), Some(&Value::Number(1.0)));
    }

    #[test]
    fn missing_key_is_none() {
        let table = Table::new();
        assert_eq!(table.get(&ObaString::new("missing".to_string())), None);
    }

    #[test]
    fn growth_preserves_prior_mappings() {
        let mut table = Table::new();
        for i in 0..40 {
            table.set(key(&format!("k{i}")), Value::Number(i as f64));
        }
        for i in 0..40 {
            assert_eq!(
                table.get(&ObaString::new(format!("k{i}"))),
                Some(&Value::Number(i as f64))
            );
        }
    }

    #[test]
    fn overwrite_is_not_a_new_key() {
        let mut table = Table::new();
        assert!(table.set(key("a"), Value::Number(1.0)));
        assert!(!table.set(key("a"), Value::Number(2.0)));
        assert_eq!(table.get(&ObaString::new("a".to_string())), Some(&Value::Number(2.0)));
    }

    #[test]
    fn delete_then_get_is_absent_but_probing_past_tombstone_still_finds_later_keys() {
        let mut table = Table::new();
        table.set(key("a"), Value::Number(1.0));
        table.set(key("b"), Value::Number(2.0));
        assert!(table.delete(&ObaString::new("a".to_string())));
        assert_eq!(table.get(&ObaString::new("a".to_string())), None);
        assert_eq!(table.get(&ObaString::new("b".to_string())), Some(&Value::Number(2.0)));
    }

    #[test]
    fn aggressive_load_factor_check_grows_on_essentially_every_insert() {
        let mut table = Table::new();
        table.set(key("a"), Value::Number(1.0));
        assert_eq!(table.capacity(), 8);
        table.set(key("b"), Value::Number(2.0));
        assert_eq!(table.capacity(), 16);
    }
}
