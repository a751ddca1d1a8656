use super::{PoolIndex, Section};
use crate::dex::Error;
use std::borrow::Borrow;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::marker::PhantomData;

/// Checkpoint and rollback of interned entries
pub trait Markable {
    /// Remember the current set of entries
    fn mark(&mut self);

    /// Drop every entry interned since the last `mark`
    ///
    /// The mark itself stays in place, so a pool can be reset to the same mark several times.
    fn reset(&mut self) -> Result<(), Error>;
}

/// Deduplicating table from entities to indices
///
/// Entries get provisional indices in the order they are first interned. Once everything has been
/// interned, the pool is laid out: entries are put into their final (usually sorted) order and
/// [`InternPool::final_index`] starts answering. Interning anything new or truncating discards
/// the layout.
///
/// Every key can carry an extra value `V`, which is fixed by the first insertion.
pub struct InternPool<K, I, V = ()> {
    section: Section,
    entries: Vec<(K, V)>,
    positions: HashMap<K, I>,
    marked: Option<usize>,
    layout: Option<Layout>,
    index_type: PhantomData<I>,
}

/// Final order of a pool
struct Layout {
    /// Provisional positions, in final order
    order: Vec<usize>,

    /// Final index of every provisional position
    ranks: Vec<u32>,
}

impl<K: Hash + Eq + Clone, I: PoolIndex, V> InternPool<K, I, V> {
    pub fn new(section: Section) -> InternPool<K, I, V> {
        InternPool {
            section,
            entries: vec![],
            positions: HashMap::new(),
            marked: None,
            layout: None,
            index_type: PhantomData,
        }
    }

    pub fn section(&self) -> Section {
        self.section
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Provisional index of an entry, if it was interned
    pub fn get<Q>(&self, key: &Q) -> Option<I>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.positions.get(key).copied()
    }

    pub fn contains<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.positions.contains_key(key)
    }

    /// Entry at a provisional index
    pub fn entry(&self, index: I) -> Option<(&K, &V)> {
        self.entries
            .get(index.position())
            .map(|(key, value)| (key, value))
    }

    /// Intern a key, keeping the existing value if the key was already present
    ///
    /// Returns the index and whether the entry is new.
    pub fn insert(&mut self, key: K, value: V) -> (I, bool) {
        if let Some(index) = self.positions.get(&key) {
            return (*index, false);
        }
        let index = I::from_position(self.entries.len());
        self.positions.insert(key.clone(), index);
        self.entries.push((key, value));
        self.layout = None;
        (index, true)
    }

    /// Entries with their provisional indices, in the order they were interned
    pub fn iter(&self) -> impl Iterator<Item = (I, &K, &V)> {
        self.entries
            .iter()
            .enumerate()
            .map(|(position, (key, value))| (I::from_position(position), key, value))
    }

    /// Drop every entry from position `len` onwards
    pub fn truncate(&mut self, len: usize) {
        if len >= self.entries.len() {
            return;
        }
        for (key, _) in self.entries.drain(len..) {
            self.positions.remove(&key);
        }
        if self.marked.map_or(false, |marked| marked > len) {
            self.marked = Some(len);
        }
        self.layout = None;
    }

    /// Lay out entries in the order given by a comparison function
    pub fn sort_by(&mut self, mut compare: impl FnMut(&K, &K) -> Ordering) {
        let mut order: Vec<usize> = (0..self.entries.len()).collect();
        order.sort_by(|p1, p2| compare(&self.entries[*p1].0, &self.entries[*p2].0));
        self.lay_out(order);
    }

    /// Lay out entries in the order they were interned
    pub fn keep_insertion_order(&mut self) {
        self.lay_out((0..self.entries.len()).collect());
    }

    /// Lay out entries in an explicit order
    ///
    /// `order` lists every provisional index exactly once.
    pub fn lay_out(&mut self, order: Vec<usize>) {
        debug_assert_eq!(order.len(), self.entries.len());
        let mut ranks = vec![0; self.entries.len()];
        for (rank, position) in order.iter().enumerate() {
            ranks[*position] = rank as u32;
        }
        log::trace!("laid out {:?} section with {} entries", self.section, order.len());
        self.layout = Some(Layout { order, ranks });
    }

    pub fn is_laid_out(&self) -> bool {
        self.layout.is_some()
    }

    /// Final index of an entry
    pub fn final_index<Q>(&self, key: &Q) -> Result<u32, Error>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + fmt::Debug + ?Sized,
    {
        let layout = self
            .layout
            .as_ref()
            .ok_or(Error::PoolNotLaidOut(self.section))?;
        match self.positions.get(key) {
            Some(index) => Ok(layout.ranks[index.position()]),
            None => Err(Error::MissingPoolEntry {
                section: self.section,
                entity: format!("{:?}", key),
            }),
        }
    }

    /// Final index of an entry, from its provisional index
    pub fn final_index_of(&self, index: I) -> Result<u32, Error> {
        let layout = self
            .layout
            .as_ref()
            .ok_or(Error::PoolNotLaidOut(self.section))?;
        match layout.ranks.get(index.position()) {
            Some(rank) => Ok(*rank),
            None => Err(Error::MissingPoolEntry {
                section: self.section,
                entity: format!("{:?}", index),
            }),
        }
    }

    /// Entries in their final order
    pub fn sorted(&self) -> Result<impl Iterator<Item = (&K, &V)>, Error> {
        let layout = self
            .layout
            .as_ref()
            .ok_or(Error::PoolNotLaidOut(self.section))?;
        Ok(layout.order.iter().map(move |position| {
            let (key, value) = &self.entries[*position];
            (key, value)
        }))
    }
}

impl<K: Hash + Eq + Clone, I: PoolIndex, V> Markable for InternPool<K, I, V> {
    fn mark(&mut self) {
        self.marked = Some(self.entries.len());
    }

    fn reset(&mut self) -> Result<(), Error> {
        let marked = self.marked.ok_or(Error::ResetWithoutMark)?;
        self.truncate(marked);
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::dex::pool::StringIndex;

    fn pool(strings: &[&str]) -> InternPool<String, StringIndex> {
        let mut pool = InternPool::new(Section::Strings);
        for string in strings {
            pool.insert(string.to_string(), ());
        }
        pool
    }

    #[test]
    fn first_seen_indices() {
        let mut pool = pool(&["b", "a", "b", "c"]);
        assert_eq!(pool.len(), 3);
        assert_eq!(pool.get("a"), Some(StringIndex(1)));
        assert_eq!(pool.insert(String::from("c"), ()), (StringIndex(2), false));
        assert_eq!(pool.insert(String::from("d"), ()), (StringIndex(3), true));
        assert_eq!(pool.get("e"), None);
    }

    #[test]
    fn final_indices_follow_layout() {
        let mut pool = pool(&["b", "a", "c"]);
        assert!(matches!(
            pool.final_index("a"),
            Err(Error::PoolNotLaidOut(Section::Strings))
        ));

        pool.sort_by(|s1, s2| s1.cmp(s2));
        assert_eq!(pool.final_index("a").unwrap(), 0);
        assert_eq!(pool.final_index("b").unwrap(), 1);
        assert_eq!(pool.final_index_of(StringIndex(2)).unwrap(), 2);
        let sorted: Vec<&String> = pool.sorted().unwrap().map(|(key, _)| key).collect();
        assert_eq!(sorted, vec!["a", "b", "c"]);
        assert!(matches!(
            pool.final_index("z"),
            Err(Error::MissingPoolEntry { section: Section::Strings, .. })
        ));

        // New entries invalidate the layout
        pool.insert(String::from("0"), ());
        assert!(!pool.is_laid_out());
    }

    #[test]
    fn mark_and_reset() {
        let mut pool = pool(&["a"]);
        assert!(matches!(pool.reset(), Err(Error::ResetWithoutMark)));

        pool.mark();
        pool.insert(String::from("b"), ());
        pool.insert(String::from("c"), ());
        pool.reset().unwrap();
        assert_eq!(pool.len(), 1);
        assert!(!pool.contains("b"));

        // The mark survives a reset
        pool.insert(String::from("d"), ());
        pool.reset().unwrap();
        assert_eq!(pool.len(), 1);
        assert_eq!(pool.insert(String::from("b"), ()), (StringIndex(1), true));
    }

    #[test]
    fn truncate_pulls_mark_back() {
        let mut pool = pool(&["a", "b", "c"]);
        pool.mark();
        pool.truncate(1);
        pool.insert(String::from("x"), ());
        pool.reset().unwrap();
        assert_eq!(pool.len(), 1);
    }
}
