use std::borrow::Borrow;
use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;

/// An insertion-ordered map.
///
/// Directory entries live in one of these: `readdir` must return entries
/// in the order they were created, while `lookup` needs point access by
/// name. Replacing a value keeps the key's original position.
pub struct ListMap<K, V> {
    entries: HashMap<K, Slot<V>>,
    order: BTreeMap<u64, K>,
    next_seq: u64,
}

struct Slot<V> {
    seq: u64,
    value: V,
}

impl<K, V> ListMap<K, V>
where
    K: Eq + Hash + Clone,
{
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
            order: BTreeMap::new(),
            next_seq: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        self.entries.contains_key(key)
    }

    pub fn get<Q>(&self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        self.entries.get(key).map(|slot| &slot.value)
    }

    /// Inserts `value` under `key`, returning the previous value if any.
    /// A replaced key keeps its position in the iteration order.
    pub fn put(&mut self, key: K, value: V) -> Option<V> {
        if let Some(slot) = self.entries.get_mut(&key) {
            return Some(std::mem::replace(&mut slot.value, value));
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.order.insert(seq, key.clone());
        self.entries.insert(key, Slot { seq, value });
        None
    }

    pub fn remove<Q>(&mut self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        let slot = self.entries.remove(key)?;
        self.order.remove(&slot.seq);
        Some(slot.value)
    }

    /// The oldest value, if any.
    pub fn head(&self) -> Option<&V> {
        let key = self.order.values().next()?;
        self.get(key)
    }

    /// The most recently inserted value, if any.
    pub fn tail(&self) -> Option<&V> {
        let key = self.order.values().next_back()?;
        self.get(key)
    }

    pub fn pop_front(&mut self) -> Option<(K, V)> {
        let (&seq, _) = self.order.iter().next()?;
        let key = self.order.remove(&seq)?;
        let slot = self.entries.remove(&key)?;
        Some((key, slot.value))
    }

    pub fn pop_back(&mut self) -> Option<(K, V)> {
        let (&seq, _) = self.order.iter().next_back()?;
        let key = self.order.remove(&seq)?;
        let slot = self.entries.remove(&key)?;
        Some((key, slot.value))
    }

    /// Iterates entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.order.values().filter_map(move |key| {
            self.entries.get(key).map(|slot| (key, &slot.value))
        })
    }

    /// Iterates values in insertion order.
    pub fn values(&self) -> impl Iterator<Item = &V> {
        self.iter().map(|(_, v)| v)
    }
}

impl<K, V> Default for ListMap<K, V>
where
    K: Eq + Hash + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect(map: &ListMap<String, u32>) -> Vec<(String, u32)> {
        map.iter().map(|(k, v)| (k.clone(), *v)).collect()
    }

    #[test]
    fn test_put_get_remove() {
        let mut map = ListMap::new();
        assert!(map.is_empty());

        assert_eq!(map.put("a".to_string(), 1), None);
        assert_eq!(map.put("b".to_string(), 2), None);
        assert_eq!(map.len(), 2);
        assert!(map.contains("a"));
        assert_eq!(map.get("b"), Some(&2));
        assert_eq!(map.get("missing"), None);

        assert_eq!(map.remove("a"), Some(1));
        assert_eq!(map.remove("a"), None);
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn test_iteration_follows_insertion_order() {
        let mut map = ListMap::new();
        for (i, name) in ["d1", "d2", "d6", "d3", "d5", "d4"].iter().enumerate() {
            map.put(name.to_string(), i as u32);
        }
        let keys: Vec<String> = map.iter().map(|(k, _)| k.clone()).collect();
        assert_eq!(keys, vec!["d1", "d2", "d6", "d3", "d5", "d4"]);
    }

    #[test]
    fn test_replace_keeps_position() {
        let mut map = ListMap::new();
        map.put("a".to_string(), 1);
        map.put("b".to_string(), 2);
        map.put("c".to_string(), 3);

        assert_eq!(map.put("b".to_string(), 20), Some(2));
        assert_eq!(
            collect(&map),
            vec![
                ("a".to_string(), 1),
                ("b".to_string(), 20),
                ("c".to_string(), 3)
            ]
        );
    }

    #[test]
    fn test_head_tail_pop() {
        let mut map = ListMap::new();
        map.put("a".to_string(), 1);
        map.put("b".to_string(), 2);
        map.put("c".to_string(), 3);

        assert_eq!(map.head(), Some(&1));
        assert_eq!(map.tail(), Some(&3));

        assert_eq!(map.pop_front(), Some(("a".to_string(), 1)));
        assert_eq!(map.pop_back(), Some(("c".to_string(), 3)));
        assert_eq!(map.len(), 1);
        assert_eq!(map.head(), map.tail());

        assert_eq!(map.pop_front(), Some(("b".to_string(), 2)));
        assert_eq!(map.pop_front(), None);
        assert_eq!(map.pop_back(), None);
    }

    #[test]
    fn test_remove_then_reinsert_moves_to_back() {
        let mut map = ListMap::new();
        map.put("a".to_string(), 1);
        map.put("b".to_string(), 2);
        map.remove("a");
        map.put("a".to_string(), 10);

        assert_eq!(
            collect(&map),
            vec![("b".to_string(), 2), ("a".to_string(), 10)]
        );
    }

    #[test]
    fn test_byte_string_keys() {
        let mut map: ListMap<Vec<u8>, u32> = ListMap::new();
        map.put(b"hello".to_vec(), 7);
        assert!(map.contains(b"hello".as_slice()));
        assert_eq!(map.get(b"hello".as_slice()), Some(&7));
        assert_eq!(map.remove(b"hello".as_slice()), Some(7));
    }
}
