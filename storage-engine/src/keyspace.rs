use bytes::Bytes;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use shared::{Error, Result};
use std::collections::HashMap;

use crate::glob::glob_match;

pub const DEFAULT_DATABASES: usize = 16;

/// A stored value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Str(Bytes),
    Hash(HashMap<Bytes, Bytes>),
}

/// In-memory keyspace split into numbered logical databases.
///
/// Every operation on a single key runs under that key's shard lock, so
/// read-modify-write commands such as `incr_by` are atomic.
#[derive(Debug)]
pub struct Keyspace {
    databases: Vec<DashMap<Bytes, Value>>,
}

impl Keyspace {
    pub fn new(databases: usize) -> Self {
        Self {
            databases: (0..databases.max(1)).map(|_| DashMap::new()).collect(),
        }
    }

    pub fn databases(&self) -> usize {
        self.databases.len()
    }

    fn db(&self, index: usize) -> Result<&DashMap<Bytes, Value>> {
        self.databases
            .get(index)
            .ok_or_else(|| Error::Backend("ERR DB index is out of range".to_string()))
    }

    pub fn get(&self, db: usize, key: &[u8]) -> Result<Option<Bytes>> {
        match self.db(db)?.get(key).as_deref() {
            Some(Value::Str(value)) => Ok(Some(value.clone())),
            Some(Value::Hash(_)) => Err(Error::WrongType),
            None => Ok(None),
        }
    }

    pub fn set(&self, db: usize, key: Bytes, value: Bytes) -> Result<()> {
        self.db(db)?.insert(key, Value::Str(value));
        Ok(())
    }

    /// Store `value` and return the previous string value.
    pub fn getset(&self, db: usize, key: Bytes, value: Bytes) -> Result<Option<Bytes>> {
        match self.db(db)?.entry(key) {
            Entry::Occupied(mut entry) => match entry.get() {
                Value::Str(old) => {
                    let old = old.clone();
                    entry.insert(Value::Str(value));
                    Ok(Some(old))
                }
                Value::Hash(_) => Err(Error::WrongType),
            },
            Entry::Vacant(entry) => {
                entry.insert(Value::Str(value));
                Ok(None)
            }
        }
    }

    /// Remove `keys`, returning how many existed.
    pub fn delete(&self, db: usize, keys: &[Bytes]) -> Result<i64> {
        let map = self.db(db)?;
        Ok(keys.iter().filter(|key| map.remove(&key[..]).is_some()).count() as i64)
    }

    /// Count how many of `keys` exist. Repeated keys are counted repeatedly.
    pub fn exists(&self, db: usize, keys: &[Bytes]) -> Result<i64> {
        let map = self.db(db)?;
        Ok(keys.iter().filter(|key| map.contains_key(&key[..])).count() as i64)
    }

    pub fn incr_by(&self, db: usize, key: Bytes, delta: i64) -> Result<i64> {
        match self.db(db)?.entry(key) {
            Entry::Occupied(mut entry) => {
                let current = match entry.get() {
                    Value::Str(raw) => parse_integer(raw)?,
                    Value::Hash(_) => return Err(Error::WrongType),
                };
                let next = current.checked_add(delta).ok_or(Error::NotAnInteger)?;
                entry.insert(Value::Str(Bytes::from(next.to_string())));
                Ok(next)
            }
            Entry::Vacant(entry) => {
                entry.insert(Value::Str(Bytes::from(delta.to_string())));
                Ok(delta)
            }
        }
    }

    /// Set hash fields, returning the number of fields that were newly added.
    pub fn hset(&self, db: usize, key: Bytes, pairs: Vec<(Bytes, Bytes)>) -> Result<i64> {
        let mut entry = self
            .db(db)?
            .entry(key)
            .or_insert_with(|| Value::Hash(HashMap::new()));

        let Value::Hash(fields) = entry.value_mut() else {
            return Err(Error::WrongType);
        };

        let mut added = 0;
        for (field, value) in pairs {
            if fields.insert(field, value).is_none() {
                added += 1;
            }
        }
        Ok(added)
    }

    pub fn hget(&self, db: usize, key: &[u8], field: &[u8]) -> Result<Option<Bytes>> {
        match self.db(db)?.get(key).as_deref() {
            Some(Value::Hash(fields)) => Ok(fields.get(field).cloned()),
            Some(Value::Str(_)) => Err(Error::WrongType),
            None => Ok(None),
        }
    }

    pub fn keys(&self, db: usize, pattern: &[u8]) -> Result<Vec<Bytes>> {
        let mut keys: Vec<Bytes> = self
            .db(db)?
            .iter()
            .filter(|entry| glob_match(pattern, entry.key()))
            .map(|entry| entry.key().clone())
            .collect();
        keys.sort();
        Ok(keys)
    }

    pub fn dbsize(&self, db: usize) -> Result<usize> {
        Ok(self.db(db)?.len())
    }

    pub fn flush(&self, db: usize) -> Result<()> {
        self.db(db)?.clear();
        Ok(())
    }
}

impl Default for Keyspace {
    fn default() -> Self {
        Self::new(DEFAULT_DATABASES)
    }
}

fn parse_integer(raw: &[u8]) -> Result<i64> {
    std::str::from_utf8(raw)
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or(Error::NotAnInteger)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn b(s: &str) -> Bytes {
        Bytes::from(s.to_string())
    }

    #[test]
    fn test_set_get_delete() {
        let keyspace = Keyspace::default();

        assert_eq!(keyspace.get(0, b"k").unwrap(), None);
        keyspace.set(0, b("k"), b("v")).unwrap();
        assert_eq!(keyspace.get(0, b"k").unwrap(), Some(b("v")));

        assert_eq!(keyspace.delete(0, &[b("k"), b("missing")]).unwrap(), 1);
        assert_eq!(keyspace.get(0, b"k").unwrap(), None);
    }

    #[test]
    fn test_databases_are_isolated() {
        let keyspace = Keyspace::default();
        keyspace.set(0, b("k"), b("zero")).unwrap();
        keyspace.set(3, b("k"), b("three")).unwrap();

        assert_eq!(keyspace.get(0, b"k").unwrap(), Some(b("zero")));
        assert_eq!(keyspace.get(3, b"k").unwrap(), Some(b("three")));
        assert_eq!(keyspace.dbsize(1).unwrap(), 0);
    }

    #[test]
    fn test_out_of_range_db() {
        let keyspace = Keyspace::new(2);
        assert!(matches!(keyspace.get(2, b"k"), Err(Error::Backend(_))));
    }

    #[test]
    fn test_exists_counts_repeats() {
        let keyspace = Keyspace::default();
        keyspace.set(0, b("a"), b("1")).unwrap();
        assert_eq!(keyspace.exists(0, &[b("a"), b("a"), b("b")]).unwrap(), 2);
    }

    #[test]
    fn test_getset_returns_previous() {
        let keyspace = Keyspace::default();
        assert_eq!(keyspace.getset(0, b("k"), b("one")).unwrap(), None);
        assert_eq!(keyspace.getset(0, b("k"), b("two")).unwrap(), Some(b("one")));
        assert_eq!(keyspace.get(0, b"k").unwrap(), Some(b("two")));
    }

    #[test]
    fn test_incr_by() {
        let keyspace = Keyspace::default();
        assert_eq!(keyspace.incr_by(0, b("n"), 5).unwrap(), 5);
        assert_eq!(keyspace.incr_by(0, b("n"), -2).unwrap(), 3);
        assert_eq!(keyspace.get(0, b"n").unwrap(), Some(b("3")));

        keyspace.set(0, b("text"), b("abc")).unwrap();
        assert!(matches!(
            keyspace.incr_by(0, b("text"), 1),
            Err(Error::NotAnInteger)
        ));

        keyspace.set(0, b("max"), b(&i64::MAX.to_string())).unwrap();
        assert!(matches!(
            keyspace.incr_by(0, b("max"), 1),
            Err(Error::NotAnInteger)
        ));
    }

    #[test]
    fn test_concurrent_incr_is_atomic() {
        let keyspace = Arc::new(Keyspace::default());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let keyspace = keyspace.clone();
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        keyspace.incr_by(0, b("counter"), 1).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(keyspace.get(0, b"counter").unwrap(), Some(b("800")));
    }

    #[test]
    fn test_hash_fields() {
        let keyspace = Keyspace::default();
        let added = keyspace
            .hset(0, b("h"), vec![(b("f1"), b("v1")), (b("f2"), b("v2"))])
            .unwrap();
        assert_eq!(added, 2);
        assert_eq!(keyspace.hset(0, b("h"), vec![(b("f1"), b("v3"))]).unwrap(), 0);

        assert_eq!(keyspace.hget(0, b"h", b"f1").unwrap(), Some(b("v3")));
        assert_eq!(keyspace.hget(0, b"h", b"nope").unwrap(), None);
        assert_eq!(keyspace.hget(0, b"missing", b"f1").unwrap(), None);
    }

    #[test]
    fn test_wrong_type() {
        let keyspace = Keyspace::default();
        keyspace.set(0, b("s"), b("v")).unwrap();
        keyspace.hset(0, b("h"), vec![(b("f"), b("v"))]).unwrap();

        assert!(matches!(keyspace.get(0, b"h"), Err(Error::WrongType)));
        assert!(matches!(keyspace.hget(0, b"s", b"f"), Err(Error::WrongType)));
        assert!(matches!(
            keyspace.hset(0, b("s"), vec![(b("f"), b("v"))]),
            Err(Error::WrongType)
        ));
        assert!(matches!(
            keyspace.getset(0, b("h"), b("v")),
            Err(Error::WrongType)
        ));
    }

    #[test]
    fn test_keys_pattern_and_flush() {
        let keyspace = Keyspace::default();
        keyspace.set(0, b("t1:a"), b("1")).unwrap();
        keyspace.set(0, b("t1:b"), b("2")).unwrap();
        keyspace.set(0, b("t2:a"), b("3")).unwrap();

        assert_eq!(keyspace.keys(0, b"t1:*").unwrap(), vec![b("t1:a"), b("t1:b")]);
        assert_eq!(keyspace.keys(0, b"*").unwrap().len(), 3);

        keyspace.flush(0).unwrap();
        assert_eq!(keyspace.dbsize(0).unwrap(), 0);
    }
}
