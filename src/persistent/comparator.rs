//! Total orders over keys.
//!
//! A [`SortedMap`](super::SortedMap) is ordered by a [`Comparator`] chosen when
//! the map is created. The comparator is shared by every version derived from
//! that map and never changes.
//!
//! # Examples
//!
//! ```rust
//! use sortmap::persistent::{Comparator, NaturalOrder, ReverseOrder};
//! use std::cmp::Ordering;
//!
//! assert_eq!(NaturalOrder.compare(&1, &2), Ordering::Less);
//! assert_eq!(ReverseOrder.compare(&1, &2), Ordering::Greater);
//!
//! let by_length = |left: &&str, right: &&str| left.len().cmp(&right.len());
//! assert_eq!(by_length.compare(&"abc", &"de"), Ordering::Greater);
//! ```

use std::cmp::Ordering;

/// A total order over values of type `K`.
///
/// Implementations must be consistent: antisymmetric, transitive, and
/// returning [`Ordering::Equal`] exactly for keys that should share an entry.
/// An inconsistent comparator does not cause undefined behaviour, but the
/// map's lookups and iteration order become meaningless.
pub trait Comparator<K: ?Sized> {
    /// Compares two keys.
    fn compare(&self, left: &K, right: &K) -> Ordering;
}

/// The order given by the key type's [`Ord`] implementation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct NaturalOrder;

impl<K: Ord + ?Sized> Comparator<K> for NaturalOrder {
    #[inline]
    fn compare(&self, left: &K, right: &K) -> Ordering {
        left.cmp(right)
    }
}

/// The reverse of the key type's [`Ord`] implementation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct ReverseOrder;

impl<K: Ord + ?Sized> Comparator<K> for ReverseOrder {
    #[inline]
    fn compare(&self, left: &K, right: &K) -> Ordering {
        right.cmp(left)
    }
}

impl<K: ?Sized, F> Comparator<K> for F
where
    F: Fn(&K, &K) -> Ordering,
{
    #[inline]
    fn compare(&self, left: &K, right: &K) -> Ordering {
        self(left, right)
    }
}
