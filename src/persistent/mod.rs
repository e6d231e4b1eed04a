//! Persistent (immutable) ordered map.
//!
//! This module provides [`SortedMap`], a red-black tree that uses structural
//! sharing to keep every earlier version valid, together with the orders
//! ([`Comparator`]) and error types it uses.
//!
//! # Structural Sharing
//!
//! A persistent update copies only the nodes on the path from the root to
//! the changed entry. Everything else is shared with the previous version.
//!
//! # Linear Mode
//!
//! [`SortedMap::linear`] switches a handle into an in-place mode: nodes the
//! handle allocated itself are mutated directly instead of being copied.
//! [`SortedMap::forked`] switches back.
//!
//! # Examples
//!
//! ```rust
//! use sortmap::persistent::SortedMap;
//!
//! let map = SortedMap::new()
//!     .update(3, "three")
//!     .update(1, "one")
//!     .update(2, "two");
//!
//! // Entries are always in sorted order
//! let keys: Vec<&i32> = map.keys().collect();
//! assert_eq!(keys, vec![&1, &2, &3]);
//!
//! // Structural sharing: the original map is preserved
//! let updated = map.update(1, "ONE");
//! assert_eq!(map.get(&1), Some(&"one"));
//! assert_eq!(updated.get(&1), Some(&"ONE"));
//!
//! // Rank queries
//! assert_eq!(map.index_of(&3), Some(2));
//! assert_eq!(map.ceil_index(&0), Some(0));
//! ```

// =============================================================================
// Reference Counter Type Alias
// =============================================================================

/// Reference-counted smart pointer type.
///
/// When the `arc` feature is enabled, this is `std::sync::Arc`,
/// which is thread-safe but has slightly higher overhead.
///
/// When the `arc` feature is disabled (default), this is `std::rc::Rc`,
/// which is faster but not thread-safe.
#[cfg(feature = "arc")]
pub(crate) type ReferenceCounter<T> = std::sync::Arc<T>;

#[cfg(not(feature = "arc"))]
pub(crate) type ReferenceCounter<T> = std::rc::Rc<T>;

mod comparator;
mod error;
mod sorted_map;

pub use comparator::Comparator;
pub use comparator::NaturalOrder;
pub use comparator::ReverseOrder;
pub use error::IndexOutOfRangeError;
pub use error::InvariantViolation;
pub use sorted_map::SortedMap;
pub use sorted_map::SortedMapIntoIterator;
pub use sorted_map::SortedMapIterator;
pub use sorted_map::SortedMapKeys;
pub use sorted_map::SortedMapRangeIterator;
pub use sorted_map::SortedMapValues;
pub use sorted_map::TreeMetrics;

// =============================================================================
// Tests
// =============================================================================
