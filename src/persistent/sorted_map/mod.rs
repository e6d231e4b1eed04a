//! Persistent ordered map based on a Red-Black Tree with subtree sizes.
//!
//! This module provides [`SortedMap`], an ordered map that shares structure
//! between versions and answers rank queries in logarithmic time.
//!
//! # Overview
//!
//! - O(log N) get, put, remove
//! - O(log N) `index_of`, `nth`, `inclusive_floor_index`, `ceil_index`
//! - O(log N + k) range queries where k is the number of results
//! - O(1) len and `is_empty`
//!
//! # Ownership Modes
//!
//! A map handle is either *persistent* or *linear*:
//!
//! - In persistent mode, `put`/`remove`/`clear` copy the path from the root to
//!   the changed entry. Snapshots taken earlier never observe the change.
//! - In linear mode, nodes allocated by the handle itself are mutated in
//!   place. Nodes shared with any other version are still copied first.
//!
//! [`SortedMap::linear`] and [`SortedMap::forked`] switch between the modes.
//!
//! # Examples
//!
//! ```rust
//! use sortmap::persistent::SortedMap;
//!
//! let mut map = SortedMap::new().linear();
//! for key in [5, 3, 8, 1, 4, 7, 9] {
//!     map.put(key, key * 10);
//! }
//! let map = map.forked();
//!
//! let keys: Vec<&i32> = map.keys().collect();
//! assert_eq!(keys, vec![&1, &3, &4, &5, &7, &8, &9]);
//! assert_eq!(map.index_of(&7), Some(4));
//! assert_eq!(map.inclusive_floor_index(&6), Some(3));
//! assert_eq!(map.ceil_index(&6), Some(4));
//! ```
//!
//! # Internal Structure
//!
//! The Red-Black Tree maintains the following invariants:
//! 1. Every node is either red or black
//! 2. The root is black
//! 3. All leaves (NIL) are black
//! 4. Red nodes have only black children
//! 5. Every path from root to leaf has the same number of black nodes
//! 6. Every node caches the number of entries in its subtree
//!
//! Invariants 1-5 bound the height by `2 * log2(N + 1)`; invariant 6 turns
//! rank queries into a single root-to-leaf walk.

mod iter;
mod node;
#[cfg(feature = "serde")]
mod serialization;

use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::{Bound, RangeBounds};

use super::{Comparator, IndexOutOfRangeError, InvariantViolation, NaturalOrder, ReferenceCounter};
use node::{Color, Edit, Link};

pub use iter::{
    SortedMapIntoIterator, SortedMapIterator, SortedMapKeys, SortedMapRangeIterator,
    SortedMapValues,
};
pub use node::TreeMetrics;

// =============================================================================
// SortedMap Definition
// =============================================================================

/// A persistent ordered map based on a Red-Black Tree, with rank queries and
/// an opt-in linear mode.
///
/// Entries are ordered by a [`Comparator`] fixed at construction
/// ([`NaturalOrder`] by default). The comparator is shared by every version
/// derived from the map.
///
/// # Time Complexity
///
/// | Operation               | Complexity        |
/// |-------------------------|-------------------|
/// | `new`                   | O(1)              |
/// | `get`                   | O(log N)          |
/// | `put`                   | O(log N)          |
/// | `remove`                | O(log N)          |
/// | `index_of`              | O(log N)          |
/// | `nth`                   | O(log N)          |
/// | `inclusive_floor_index` | O(log N)          |
/// | `ceil_index`            | O(log N)          |
/// | `contains_value`        | O(N)              |
/// | `map_values`            | O(N)              |
/// | `range`                 | O(log N + k)      |
/// | `len`                   | O(1)              |
/// | `linear`/`forked`       | O(1)              |
///
/// # Examples
///
/// ```rust
/// use sortmap::persistent::SortedMap;
///
/// // Persistent: the original survives
/// let original = SortedMap::new().update(1, "one");
/// let updated = original.update(2, "two");
/// assert_eq!(original.len(), 1);
/// assert_eq!(updated.len(), 2);
///
/// // Linear: batch updates in place, then freeze
/// let mut builder = updated.linear();
/// builder.put(3, "three").remove(&1);
/// let frozen = builder.forked();
/// assert_eq!(frozen.keys().copied().collect::<Vec<_>>(), vec![2, 3]);
/// ```
pub struct SortedMap<K, V, C = NaturalOrder> {
    /// Root node of the tree
    root: Link<K, V>,
    /// Total order over the keys, shared with derived maps
    comparator: ReferenceCounter<C>,
    /// Edit token of a linear handle; `None` in persistent mode
    edit: Option<Edit>,
}

impl<K, V> SortedMap<K, V, NaturalOrder> {
    /// Creates a new empty persistent map ordered by `K`'s [`Ord`].
    ///
    /// # Examples
    ///
    /// ```rust
    /// use sortmap::persistent::SortedMap;
    ///
    /// let map: SortedMap<i32, String> = SortedMap::new();
    /// assert!(map.is_empty());
    /// assert!(!map.is_linear());
    /// ```
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::with_comparator(NaturalOrder)
    }
}

impl<K, V, C> SortedMap<K, V, C> {
    /// Creates a new empty persistent map ordered by `comparator`.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use sortmap::persistent::{ReverseOrder, SortedMap};
    ///
    /// let map = SortedMap::with_comparator(ReverseOrder)
    ///     .update(1, "one")
    ///     .update(2, "two");
    /// assert_eq!(map.keys().copied().collect::<Vec<_>>(), vec![2, 1]);
    /// ```
    #[must_use]
    pub fn with_comparator(comparator: C) -> Self {
        Self {
            root: None,
            comparator: ReferenceCounter::new(comparator),
            edit: None,
        }
    }

    /// Returns the number of entries in the map.
    ///
    /// # Complexity
    ///
    /// O(1), read from the root's subtree size.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        node::size(&self.root)
    }

    /// Returns `true` if the map contains no entries.
    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.root.is_none()
    }

    /// Returns `true` if this handle mutates its own nodes in place.
    #[inline]
    #[must_use]
    pub const fn is_linear(&self) -> bool {
        self.edit.is_some()
    }

    /// Returns the comparator ordering this map.
    #[inline]
    #[must_use]
    pub fn comparator(&self) -> &C {
        &self.comparator
    }

    /// Switches this handle to linear mode.
    ///
    /// The handle receives a fresh edit token; from now on `put`, `remove`
    /// and `clear` mutate nodes it allocated in place. Nodes it shares with
    /// other versions are copied on first write, so those versions never
    /// observe the mutation. An already-linear handle is returned unchanged.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use sortmap::persistent::SortedMap;
    ///
    /// let mut map = SortedMap::new().linear();
    /// let same: *const _ = map.put(1, "one");
    /// assert!(std::ptr::eq(same, &map));
    /// assert!(map.is_linear());
    /// ```
    #[must_use]
    pub fn linear(self) -> Self {
        if self.edit.is_some() {
            return self;
        }
        let edit = Edit::fresh();
        trace_log!(?edit, len = self.len(), "sorted map switched to linear mode");
        Self {
            edit: Some(edit),
            ..self
        }
    }

    /// Switches this handle back to persistent mode.
    ///
    /// The edit token is dropped, so the nodes this handle mutated in place
    /// are frozen from now on. A persistent handle is returned unchanged.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use sortmap::persistent::SortedMap;
    ///
    /// let mut builder = SortedMap::new().linear();
    /// builder.put(1, "one");
    /// let frozen = builder.forked();
    ///
    /// let mut editor = frozen.clone();
    /// editor.put(2, "two");
    /// assert_eq!(frozen.len(), 1);
    /// assert_eq!(editor.len(), 2);
    /// ```
    #[must_use]
    pub fn forked(self) -> Self {
        if self.edit.is_some() {
            trace_log!(len = self.len(), "sorted map forked to persistent mode");
        }
        Self { edit: None, ..self }
    }

    /// Returns a persistent handle sharing this map's current root.
    ///
    /// Unlike [`forked`](Self::forked), the receiver stays usable; later
    /// in-place mutations on a linear receiver copy the shared nodes first
    /// and never reach the snapshot.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use sortmap::persistent::SortedMap;
    ///
    /// let mut map = SortedMap::new().linear();
    /// map.put(1, "one");
    /// let snapshot = map.snapshot();
    /// map.put(1, "ONE");
    /// assert_eq!(snapshot.get(&1), Some(&"one"));
    /// assert_eq!(map.get(&1), Some(&"ONE"));
    /// ```
    #[must_use]
    pub fn snapshot(&self) -> Self {
        Self {
            root: self.root.clone(),
            comparator: self.comparator.clone(),
            edit: None,
        }
    }

    /// Returns an iterator over entries in ascending key order.
    ///
    /// Each call starts a fresh traversal.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use sortmap::persistent::SortedMap;
    ///
    /// let map = SortedMap::new()
    ///     .update(3, "three")
    ///     .update(1, "one")
    ///     .update(2, "two");
    ///
    /// let entries: Vec<(&i32, &&str)> = map.iter().collect();
    /// assert_eq!(entries, vec![(&1, &"one"), (&2, &"two"), (&3, &"three")]);
    /// ```
    #[must_use]
    pub fn iter(&self) -> SortedMapIterator<'_, K, V> {
        SortedMapIterator::new(&self.root)
    }

    /// Returns an iterator over keys in ascending order.
    #[must_use]
    pub fn keys(&self) -> SortedMapKeys<'_, K, V> {
        SortedMapKeys::new(self.iter())
    }

    /// Returns an iterator over values in key order.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use sortmap::persistent::SortedMap;
    ///
    /// let map: SortedMap<i32, i32> = [(1, 10), (2, 20), (3, 30)].into_iter().collect();
    /// let sum: i32 = map.values().sum();
    /// assert_eq!(sum, 60);
    /// ```
    #[must_use]
    pub fn values(&self) -> SortedMapValues<'_, K, V> {
        SortedMapValues::new(self.iter())
    }

    /// Returns the entry at rank `index` (0-based, ascending key order).
    ///
    /// # Errors
    ///
    /// Returns [`IndexOutOfRangeError`] when `index >= len()`.
    ///
    /// # Complexity
    ///
    /// O(log N), guided by subtree sizes.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use sortmap::persistent::{IndexOutOfRangeError, SortedMap};
    ///
    /// let map: SortedMap<i32, char> = [(30, 'c'), (10, 'a'), (20, 'b')].into_iter().collect();
    /// assert_eq!(map.nth(1), Ok((&20, &'b')));
    /// assert_eq!(map.nth(3), Err(IndexOutOfRangeError { index: 3, length: 3 }));
    /// ```
    pub fn nth(&self, index: usize) -> Result<(&K, &V), IndexOutOfRangeError> {
        node::select(&self.root, index)
            .map(|node| (&node.key, &node.value))
            .ok_or_else(|| {
                debug_log!(index, length = self.len(), "sorted map rank out of range");
                IndexOutOfRangeError {
                    index,
                    length: self.len(),
                }
            })
    }

    /// Returns the entry with the smallest key.
    #[must_use]
    pub fn first(&self) -> Option<(&K, &V)> {
        node::select(&self.root, 0).map(|node| (&node.key, &node.value))
    }

    /// Returns the entry with the largest key.
    #[must_use]
    pub fn last(&self) -> Option<(&K, &V)> {
        self.len()
            .checked_sub(1)
            .and_then(|index| node::select(&self.root, index))
            .map(|node| (&node.key, &node.value))
    }

    /// Applies a function to every entry, keeping keys and tree shape.
    ///
    /// The result is in the receiver's mode (a linear receiver yields a new
    /// linear handle with its own edit token). No rebalancing happens since
    /// values do not affect the order. The function sees entries in
    /// ascending key order.
    ///
    /// # Complexity
    ///
    /// O(N)
    ///
    /// # Examples
    ///
    /// ```rust
    /// use sortmap::persistent::SortedMap;
    ///
    /// let map: SortedMap<i32, i32> = [(1, 10), (2, 20)].into_iter().collect();
    /// let labelled = map.map_values(|key, value| format!("{key}={value}"));
    /// assert_eq!(labelled.get(&2), Some(&"2=20".to_string()));
    /// ```
    #[must_use]
    pub fn map_values<W, F>(&self, mut transform: F) -> SortedMap<K, W, C>
    where
        K: Clone,
        F: FnMut(&K, &V) -> W,
    {
        let edit = Edit::fresh();
        SortedMap {
            root: node::map_values(&self.root, &mut transform, edit),
            comparator: self.comparator.clone(),
            edit: self.edit.map(|_| edit),
        }
    }

    /// Checks every structural invariant of the tree.
    ///
    /// Verifies the root color, the absence of red-red edges, equal black
    /// height on every path, cached subtree sizes, and strictly increasing
    /// keys under the comparator.
    ///
    /// # Errors
    ///
    /// Returns the first [`InvariantViolation`] found.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use sortmap::persistent::SortedMap;
    ///
    /// let map: SortedMap<u32, ()> = (0..100).map(|key| (key, ())).collect();
    /// let metrics = map.check_invariants().unwrap();
    /// assert_eq!(metrics.len, 100);
    /// assert!(metrics.height <= 13); // 2 * log2(101)
    /// ```
    pub fn check_invariants(&self) -> Result<TreeMetrics, InvariantViolation>
    where
        C: Comparator<K>,
    {
        if self
            .root
            .as_ref()
            .is_some_and(|root| root.color == Color::Red)
        {
            return Err(InvariantViolation::RedRoot);
        }
        let metrics = node::measure(&self.root, 0)?;
        let comparator = &*self.comparator;
        let mut previous: Option<&K> = None;
        for (index, (key, _)) in self.iter().enumerate() {
            if let Some(previous) = previous
                && comparator.compare(previous, key).is_ge()
            {
                return Err(InvariantViolation::OrderViolation { index });
            }
            previous = Some(key);
        }
        Ok(metrics)
    }
}

// =============================================================================
// Queries
// =============================================================================

impl<K, V, C: Comparator<K>> SortedMap<K, V, C> {
    /// Returns a reference to the value corresponding to the key.
    ///
    /// # Complexity
    ///
    /// O(log N)
    ///
    /// # Examples
    ///
    /// ```rust
    /// use sortmap::persistent::SortedMap;
    ///
    /// let map = SortedMap::new().update("hello".to_string(), 42);
    /// assert_eq!(map.get(&"hello".to_string()), Some(&42));
    /// assert_eq!(map.get(&"world".to_string()), None);
    /// ```
    #[must_use]
    pub fn get(&self, key: &K) -> Option<&V> {
        node::find(&self.root, key, &*self.comparator).map(|node| &node.value)
    }

    /// Returns the value for `key`, or `default` if the key is absent.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use sortmap::persistent::SortedMap;
    ///
    /// let map = SortedMap::new().update(1, 10);
    /// assert_eq!(*map.get_or(&1, &0), 10);
    /// assert_eq!(*map.get_or(&2, &0), 0);
    /// ```
    #[must_use]
    pub fn get_or<'a>(&'a self, key: &K, default: &'a V) -> &'a V {
        self.get(key).unwrap_or(default)
    }

    /// Returns the stored key and value for `key`.
    #[must_use]
    pub fn get_key_value(&self, key: &K) -> Option<(&K, &V)> {
        node::find(&self.root, key, &*self.comparator).map(|node| (&node.key, &node.value))
    }

    /// Returns `true` if the map contains a value for the specified key.
    ///
    /// # Complexity
    ///
    /// O(log N)
    #[must_use]
    pub fn contains_key(&self, key: &K) -> bool {
        node::find(&self.root, key, &*self.comparator).is_some()
    }

    /// Returns `true` if any entry holds a value equal to `value`.
    ///
    /// # Complexity
    ///
    /// O(N)
    ///
    /// # Examples
    ///
    /// ```rust
    /// use sortmap::persistent::SortedMap;
    ///
    /// let map = SortedMap::new().update(1, "one").update(2, "two");
    /// assert!(map.contains_value(&"two"));
    /// assert!(!map.contains_value(&"three"));
    /// ```
    #[must_use]
    pub fn contains_value(&self, value: &V) -> bool
    where
        V: PartialEq,
    {
        self.values().any(|candidate| candidate == value)
    }

    /// Returns the rank of `key` in ascending order, or `None` if absent.
    ///
    /// # Complexity
    ///
    /// O(log N): left-subtree sizes are accumulated during the search.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use sortmap::persistent::SortedMap;
    ///
    /// let map: SortedMap<i32, ()> = [5, 3, 8, 1, 4, 7, 9].into_iter().map(|key| (key, ())).collect();
    /// assert_eq!(map.index_of(&7), Some(4));
    /// assert_eq!(map.index_of(&6), None);
    /// ```
    #[must_use]
    pub fn index_of(&self, key: &K) -> Option<usize> {
        node::rank_of(&self.root, key, &*self.comparator)
    }

    /// Returns the rank of the greatest key less than or equal to `key`.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use sortmap::persistent::SortedMap;
    ///
    /// let map: SortedMap<i32, ()> = [1, 3, 4, 5, 7, 8, 9].into_iter().map(|key| (key, ())).collect();
    /// assert_eq!(map.inclusive_floor_index(&6), Some(3));
    /// assert_eq!(map.inclusive_floor_index(&7), Some(4));
    /// assert_eq!(map.inclusive_floor_index(&0), None);
    /// ```
    #[must_use]
    pub fn inclusive_floor_index(&self, key: &K) -> Option<usize> {
        node::floor_rank(&self.root, key, &*self.comparator)
    }

    /// Returns the rank of the least key greater than or equal to `key`.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use sortmap::persistent::SortedMap;
    ///
    /// let map: SortedMap<i32, ()> = [1, 3, 4, 5, 7, 8, 9].into_iter().map(|key| (key, ())).collect();
    /// assert_eq!(map.ceil_index(&6), Some(4));
    /// assert_eq!(map.ceil_index(&1), Some(0));
    /// assert_eq!(map.ceil_index(&10), None);
    /// ```
    #[must_use]
    pub fn ceil_index(&self, key: &K) -> Option<usize> {
        node::ceil_rank(&self.root, key, &*self.comparator)
    }

    /// Returns the entry with the greatest key less than or equal to `key`.
    #[must_use]
    pub fn floor(&self, key: &K) -> Option<(&K, &V)> {
        self.inclusive_floor_index(key)
            .and_then(|index| self.nth(index).ok())
    }

    /// Returns the entry with the least key greater than or equal to `key`.
    #[must_use]
    pub fn ceiling(&self, key: &K) -> Option<(&K, &V)> {
        self.ceil_index(key).and_then(|index| self.nth(index).ok())
    }

    /// Returns an iterator over entries whose keys fall within `range`.
    ///
    /// # Complexity
    ///
    /// O(log N + k) where k is the number of entries in the range
    ///
    /// # Examples
    ///
    /// ```rust
    /// use sortmap::persistent::SortedMap;
    ///
    /// let map: SortedMap<i32, ()> = (1..=5).map(|key| (key, ())).collect();
    /// let keys: Vec<&i32> = map.range(2..=4).map(|(key, _)| key).collect();
    /// assert_eq!(keys, vec![&2, &3, &4]);
    /// assert_eq!(map.range(..2).count(), 1);
    /// ```
    pub fn range<R>(&self, range: R) -> SortedMapRangeIterator<'_, K, V>
    where
        R: RangeBounds<K>,
    {
        let comparator = &*self.comparator;
        let start = match range.start_bound() {
            Bound::Included(key) => node::count_below(&self.root, key, false, comparator),
            Bound::Excluded(key) => node::count_below(&self.root, key, true, comparator),
            Bound::Unbounded => 0,
        };
        let end = match range.end_bound() {
            Bound::Included(key) => node::count_below(&self.root, key, true, comparator),
            Bound::Excluded(key) => node::count_below(&self.root, key, false, comparator),
            Bound::Unbounded => self.len(),
        };
        SortedMapRangeIterator::new(&self.root, start, end)
    }
}

// =============================================================================
// Structural Updates
// =============================================================================

impl<K: Clone, V: Clone, C: Comparator<K>> SortedMap<K, V, C> {
    /// The token an update runs under: the handle's own in linear mode, a
    /// one-off token in persistent mode.
    fn operation_edit(&self) -> Edit {
        self.edit.unwrap_or_else(Edit::fresh)
    }

    /// Inserts a key-value pair; an existing value is replaced.
    ///
    /// Returns the same handle for chaining. In linear mode nodes owned by
    /// the handle are updated in place; in persistent mode the path to the
    /// entry is copied and every other version is unaffected.
    ///
    /// # Complexity
    ///
    /// O(log N), with at most O(log N) rotations and recolorings
    ///
    /// # Examples
    ///
    /// ```rust
    /// use sortmap::persistent::SortedMap;
    ///
    /// let mut map = SortedMap::new();
    /// map.put(1, "one").put(2, "two").put(1, "ONE");
    /// assert_eq!(map.len(), 2);
    /// assert_eq!(map.get(&1), Some(&"ONE"));
    /// ```
    pub fn put(&mut self, key: K, value: V) -> &mut Self {
        self.put_with(key, value, |_, new| new)
    }

    /// Inserts a key-value pair, combining with an existing value through
    /// `merge(existing, new)`.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use sortmap::persistent::SortedMap;
    ///
    /// let mut map = SortedMap::new();
    /// map.put(3, "a".to_string());
    /// map.put_with(3, "b".to_string(), |old, new| old.clone() + &new);
    /// assert_eq!(map.get(&3).map(String::as_str), Some("ab"));
    /// ```
    pub fn put_with<F>(&mut self, key: K, value: V, merge: F) -> &mut Self
    where
        F: FnOnce(&V, V) -> V,
    {
        let edit = self.operation_edit();
        node::insert(&mut self.root, key, value, merge, &*self.comparator, edit);
        node::paint(&mut self.root, Color::Black, edit);
        self
    }

    /// Removes a key from the map. Absent keys leave the map untouched.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use sortmap::persistent::SortedMap;
    ///
    /// let mut map: SortedMap<i32, &str> = [(1, "one"), (2, "two")].into_iter().collect();
    /// map.remove(&1).remove(&42);
    /// assert_eq!(map.len(), 1);
    /// assert!(!map.contains_key(&1));
    /// ```
    pub fn remove(&mut self, key: &K) -> &mut Self {
        self.remove_entry(key);
        self
    }

    /// Removes a key from the map, returning the stored key and value.
    ///
    /// # Complexity
    ///
    /// O(log N), with bottom-up double-black fix-up
    pub fn remove_entry(&mut self, key: &K) -> Option<(K, V)> {
        if !self.contains_key(key) {
            return None;
        }
        let edit = self.operation_edit();
        let removed = node::remove(&mut self.root, key, &*self.comparator, edit)?;
        node::paint(&mut self.root, Color::Black, edit);
        Some((removed.key, removed.value))
    }

    /// Removes every entry.
    pub fn clear(&mut self) -> &mut Self {
        self.root = None;
        self
    }

    /// Replaces every value with `transform(key, value)`, in ascending key
    /// order, keeping the tree shape.
    ///
    /// Linear handles rewrite the nodes they own in place.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use sortmap::persistent::SortedMap;
    ///
    /// let mut map: SortedMap<i32, i32> = [(1, 10), (2, 20)].into_iter().collect::<SortedMap<_, _>>().linear();
    /// map.map_values_in_place(|key, value| key + value);
    /// assert_eq!(map.values().copied().collect::<Vec<_>>(), vec![11, 22]);
    /// ```
    pub fn map_values_in_place<F>(&mut self, mut transform: F) -> &mut Self
    where
        F: FnMut(&K, &V) -> V,
    {
        let edit = self.operation_edit();
        node::map_values_in_place(&mut self.root, &mut transform, edit);
        self
    }

    /// Returns a new persistent map with the key-value pair inserted.
    ///
    /// The receiver is unchanged and shares every untouched subtree with the
    /// result.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use sortmap::persistent::SortedMap;
    ///
    /// let map1 = SortedMap::new().update(1, "one");
    /// let map2 = map1.update(1, "ONE");
    ///
    /// assert_eq!(map1.get(&1), Some(&"one")); // Original unchanged
    /// assert_eq!(map2.get(&1), Some(&"ONE")); // New version
    /// ```
    #[must_use]
    pub fn update(&self, key: K, value: V) -> Self {
        let mut map = self.snapshot();
        map.put(key, value);
        map
    }

    /// Returns a new persistent map with the key-value pair merged in.
    #[must_use]
    pub fn update_with<F>(&self, key: K, value: V, merge: F) -> Self
    where
        F: FnOnce(&V, V) -> V,
    {
        let mut map = self.snapshot();
        map.put_with(key, value, merge);
        map
    }

    /// Returns a new persistent map without `key`.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use sortmap::persistent::SortedMap;
    ///
    /// let map = SortedMap::new().update(1, "one").update(2, "two");
    /// let removed = map.without(&1);
    ///
    /// assert_eq!(map.len(), 2);     // Original unchanged
    /// assert_eq!(removed.len(), 1); // New version
    /// ```
    #[must_use]
    pub fn without(&self, key: &K) -> Self {
        let mut map = self.snapshot();
        map.remove(key);
        map
    }
}

// =============================================================================
// Standard Trait Implementations
// =============================================================================

/// Produces an independent linear handle sharing the receiver's nodes.
///
/// Equivalent to `forked().linear()` without consuming the receiver: the
/// clone always gets a fresh edit token, so neither handle can mutate a node
/// the other can see.
impl<K, V, C> Clone for SortedMap<K, V, C> {
    fn clone(&self) -> Self {
        let edit = Edit::fresh();
        trace_log!(?edit, len = self.len(), "sorted map cloned into linear mode");
        Self {
            root: self.root.clone(),
            comparator: self.comparator.clone(),
            edit: Some(edit),
        }
    }
}

impl<K, V, C: Default> Default for SortedMap<K, V, C> {
    #[inline]
    fn default() -> Self {
        Self::with_comparator(C::default())
    }
}

impl<K, V, C> FromIterator<(K, V)> for SortedMap<K, V, C>
where
    K: Clone,
    V: Clone,
    C: Comparator<K> + Default,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut map = Self::default().linear();
        map.extend(iter);
        map.forked()
    }
}

impl<K, V, C> Extend<(K, V)> for SortedMap<K, V, C>
where
    K: Clone,
    V: Clone,
    C: Comparator<K>,
{
    fn extend<I: IntoIterator<Item = (K, V)>>(&mut self, iter: I) {
        for (key, value) in iter {
            self.put(key, value);
        }
    }
}

impl<K: Clone, V: Clone, C> IntoIterator for SortedMap<K, V, C> {
    type Item = (K, V);
    type IntoIter = SortedMapIntoIterator<K, V>;

    fn into_iter(self) -> Self::IntoIter {
        SortedMapIntoIterator::new(self.root)
    }
}

impl<'a, K, V, C> IntoIterator for &'a SortedMap<K, V, C> {
    type Item = (&'a K, &'a V);
    type IntoIter = SortedMapIterator<'a, K, V>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Two maps are equal when they yield the same entries in the same order.
///
/// The mode flag and the tree shape are ignored.
impl<K: PartialEq, V: PartialEq, C> PartialEq for SortedMap<K, V, C> {
    fn eq(&self, other: &Self) -> bool {
        if let (Some(left), Some(right)) = (&self.root, &other.root)
            && ReferenceCounter::ptr_eq(left, right)
        {
            return true;
        }
        self.len() == other.len() && self.iter().eq(other.iter())
    }
}

impl<K: Eq, V: Eq, C> Eq for SortedMap<K, V, C> {}

/// Hashes the length followed by every entry in key order, so equal maps
/// hash equally regardless of insertion history.
impl<K: Hash, V: Hash, C> Hash for SortedMap<K, V, C> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.len().hash(state);
        for (key, value) in self {
            key.hash(state);
            value.hash(state);
        }
    }
}

impl<K: fmt::Debug, V: fmt::Debug, C> fmt::Debug for SortedMap<K, V, C> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.debug_map().entries(self.iter()).finish()
    }
}

impl<K: fmt::Display, V: fmt::Display, C> fmt::Display for SortedMap<K, V, C> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{{")?;
        let mut first = true;
        for (key, value) in self {
            if first {
                first = false;
            } else {
                write!(formatter, ", ")?;
            }
            write!(formatter, "{key}: {value}")?;
        }
        write!(formatter, "}}")
    }
}

// Rc-backed maps must stay on one thread.
#[cfg(not(feature = "arc"))]
static_assertions::assert_not_impl_any!(SortedMap<i32, i32>: Send, Sync);

#[cfg(feature = "arc")]
static_assertions::assert_impl_all!(SortedMap<i32, String>: Send, Sync);

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn scenario_map() -> SortedMap<i32, String> {
        let mut map = SortedMap::new();
        for key in [5, 3, 8, 1, 4, 7, 9] {
            map.put(key, format!("v{key}"));
        }
        map
    }

    // =========================================================================
    // Display Tests
    // =========================================================================

    #[rstest]
    fn test_display_empty() {
        let map: SortedMap<i32, String> = SortedMap::new();
        assert_eq!(format!("{map}"), "{}");
    }

    #[rstest]
    fn test_display_multiple_entries_sorted() {
        let map = SortedMap::new()
            .update(3, "three".to_string())
            .update(1, "one".to_string())
            .update(2, "two".to_string());
        assert_eq!(format!("{map}"), "{1: one, 2: two, 3: three}");
    }

    #[rstest]
    fn test_debug_format() {
        let map = SortedMap::new().update(2, 'b').update(1, 'a');
        assert_eq!(format!("{map:?}"), "{1: 'a', 2: 'b'}");
    }

    // =========================================================================
    // Core Operations
    // =========================================================================

    #[rstest]
    fn test_new_creates_empty_persistent_map() {
        let map: SortedMap<i32, String> = SortedMap::new();
        assert!(map.is_empty());
        assert_eq!(map.len(), 0);
        assert!(!map.is_linear());
        assert_eq!(map.first(), None);
        assert_eq!(map.last(), None);
    }

    #[rstest]
    fn test_scenario_insertion_order() {
        let map = scenario_map();
        let keys: Vec<i32> = map.keys().copied().collect();
        assert_eq!(keys, vec![1, 3, 4, 5, 7, 8, 9]);
        assert_eq!(map.len(), 7);
        assert_eq!(map.index_of(&7), Some(4));
    }

    #[rstest]
    fn test_scenario_remove_keeps_invariants() {
        let mut map = scenario_map();
        map.remove(&5);
        assert_eq!(map.len(), 6);
        assert!(!map.contains_key(&5));
        assert!(map.check_invariants().is_ok());
    }

    #[rstest]
    fn test_scenario_merge() {
        let mut map = SortedMap::new();
        map.put(3, "a".to_string());
        map.put_with(3, "b".to_string(), |old, new| format!("{old}{new}"));
        assert_eq!(map.get(&3), Some(&"ab".to_string()));
    }

    #[rstest]
    fn test_scenario_nth_out_of_range() {
        let map = scenario_map();
        let error = map.nth(10).unwrap_err();
        assert_eq!(
            error,
            IndexOutOfRangeError {
                index: 10,
                length: 7
            }
        );
        assert_eq!(error.to_string(), "index 10 out of range [0, 7)");
    }

    #[rstest]
    fn test_scenario_floor_and_ceil() {
        let map = scenario_map();
        assert_eq!(map.inclusive_floor_index(&6), Some(3));
        assert_eq!(map.ceil_index(&6), Some(4));
        assert_eq!(map.floor(&6).map(|(key, _)| *key), Some(5));
        assert_eq!(map.ceiling(&6).map(|(key, _)| *key), Some(7));
    }

    #[rstest]
    fn test_get_key_value_and_get_or() {
        let map = scenario_map();
        assert_eq!(
            map.get_key_value(&4),
            Some((&4, &"v4".to_string()))
        );
        let fallback = "none".to_string();
        assert_eq!(map.get_or(&6, &fallback), &fallback);
    }

    #[rstest]
    fn test_first_and_last() {
        let map = scenario_map();
        assert_eq!(map.first().map(|(key, _)| *key), Some(1));
        assert_eq!(map.last().map(|(key, _)| *key), Some(9));
    }

    #[rstest]
    fn test_remove_absent_key_copies_nothing() {
        let map = scenario_map();
        let mut other = map.snapshot();
        other.remove(&42);
        match (&map.root, &other.root) {
            (Some(left), Some(right)) => assert!(ReferenceCounter::ptr_eq(left, right)),
            _ => panic!("roots must exist"),
        }
    }

    #[rstest]
    fn test_remove_entry_returns_pair() {
        let mut map = scenario_map();
        assert_eq!(map.remove_entry(&8), Some((8, "v8".to_string())));
        assert_eq!(map.remove_entry(&8), None);
    }

    #[rstest]
    fn test_clear_in_both_modes() {
        let mut persistent = scenario_map();
        let snapshot = persistent.snapshot();
        persistent.clear();
        assert!(persistent.is_empty());
        assert_eq!(snapshot.len(), 7);

        let mut linear = scenario_map().linear();
        let same: *const SortedMap<i32, String> = linear.clear();
        assert!(std::ptr::eq(same, &linear));
        assert!(linear.is_empty());
    }

    // =========================================================================
    // Modes
    // =========================================================================

    #[rstest]
    fn test_persistent_put_shares_untouched_subtree() {
        let map: SortedMap<i32, i32> = (0..64).map(|key| (key, key)).collect();
        let updated = map.update(0, -1);

        let original_right = map.root.as_ref().and_then(|root| root.right.clone());
        let updated_right = updated.root.as_ref().and_then(|root| root.right.clone());
        match (original_right, updated_right) {
            (Some(left), Some(right)) => assert!(ReferenceCounter::ptr_eq(&left, &right)),
            _ => panic!("right subtrees must exist"),
        }
        assert_eq!(map.get(&0), Some(&0));
        assert_eq!(updated.get(&0), Some(&-1));
    }

    #[rstest]
    fn test_linear_put_reuses_owned_nodes() {
        let mut map = SortedMap::new().linear();
        for key in 0..32 {
            map.put(key, key);
        }
        let root_before = map.root.as_ref().map(ReferenceCounter::as_ptr);
        map.put(31, 0);
        let root_after = map.root.as_ref().map(ReferenceCounter::as_ptr);
        assert_eq!(root_before, root_after);
    }

    #[rstest]
    fn test_linear_put_copies_nodes_shared_with_snapshot() {
        let mut map = SortedMap::new().linear();
        for key in 0..32 {
            map.put(key, key);
        }
        let snapshot = map.snapshot();
        map.put(31, 0);
        assert_eq!(snapshot.get(&31), Some(&31));
        assert_eq!(map.get(&31), Some(&0));
    }

    #[rstest]
    fn test_linear_is_idempotent() {
        let map = SortedMap::<i32, i32>::new().linear();
        let edit = map.edit;
        let map = map.linear();
        assert_eq!(map.edit, edit);
    }

    #[rstest]
    fn test_clone_is_linear_with_fresh_token() {
        let map = SortedMap::<i32, i32>::new().linear();
        let clone = map.clone();
        assert!(clone.is_linear());
        assert_ne!(clone.edit, map.edit);

        let persistent = SortedMap::<i32, i32>::new();
        assert!(persistent.clone().is_linear());
    }

    #[rstest]
    fn test_map_values_keeps_mode_and_shape() {
        let map = scenario_map().linear();
        let lengths = map.map_values(|_, value| value.len());
        assert!(lengths.is_linear());
        assert_ne!(lengths.edit, map.edit);
        assert_eq!(lengths.len(), 7);
        assert!(lengths.check_invariants().is_ok());
        assert_eq!(
            lengths.root.as_ref().map(|root| root.key),
            map.root.as_ref().map(|root| root.key)
        );
    }

    #[rstest]
    fn test_map_values_in_place_persistent_leaves_snapshot() {
        let mut map: SortedMap<i32, i32> = (0..10).map(|key| (key, key)).collect();
        let snapshot = map.snapshot();
        map.map_values_in_place(|_, value| value * 2);
        assert_eq!(snapshot.get(&9), Some(&9));
        assert_eq!(map.get(&9), Some(&18));
    }

    // =========================================================================
    // Trait Implementations
    // =========================================================================

    #[rstest]
    fn test_eq_ignores_shape_and_mode() {
        let ascending: SortedMap<i32, i32> = (0..20).map(|key| (key, key)).collect();
        let descending: SortedMap<i32, i32> = (0..20).rev().map(|key| (key, key)).collect();
        assert_eq!(ascending, descending.linear());
        assert_ne!(ascending, ascending.without(&3));
    }

    #[rstest]
    fn test_hash_consistent_with_eq() {
        use std::collections::hash_map::DefaultHasher;

        let hash = |map: &SortedMap<i32, i32>| {
            let mut hasher = DefaultHasher::new();
            map.hash(&mut hasher);
            hasher.finish()
        };
        let left: SortedMap<i32, i32> = [(1, 1), (2, 2)].into_iter().collect();
        let right: SortedMap<i32, i32> = [(2, 2), (1, 1)].into_iter().collect();
        assert_eq!(hash(&left), hash(&right));
    }

    #[rstest]
    fn test_into_iter_owned() {
        let map = scenario_map();
        let entries: Vec<(i32, String)> = map.into_iter().collect();
        assert_eq!(entries.len(), 7);
        assert_eq!(entries[0], (1, "v1".to_string()));
        assert_eq!(entries[6], (9, "v9".to_string()));
    }

    #[rstest]
    fn test_range_bounds() {
        fn collect(iterator: SortedMapRangeIterator<'_, i32, ()>) -> Vec<i32> {
            iterator.map(|(key, _)| *key).collect()
        }

        let map: SortedMap<i32, ()> = (1..=9).map(|key| (key, ())).collect();
        assert_eq!(collect(map.range(3..6)), vec![3, 4, 5]);
        assert_eq!(collect(map.range(3..=6)), vec![3, 4, 5, 6]);
        assert_eq!(collect(map.range(7..)), vec![7, 8, 9]);
        assert_eq!(collect(map.range(..=2)), vec![1, 2]);
        assert_eq!(collect(map.range(6..3)), Vec::<i32>::new());
        assert_eq!(
            collect(map.range((Bound::Excluded(2), Bound::Excluded(5)))),
            vec![3, 4]
        );
        assert_eq!(map.range(..).len(), 9);
    }
}
