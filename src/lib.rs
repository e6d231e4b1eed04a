//! # sortmap
//!
//! A persistent ordered map built on a red-black tree, with rank queries and
//! an opt-in linear mode for in-place batch updates.
//!
//! ## Overview
//!
//! - **Persistent mode**: every mutation path-copies and shares untouched
//!   subtrees with earlier versions, so snapshots stay valid forever.
//! - **Linear mode**: a single owner mutates the nodes it allocated in place,
//!   trading persistence for fewer allocations.
//! - **Rank queries**: `index_of`, `nth`, `inclusive_floor_index` and
//!   `ceil_index` in O(log N) using cached subtree sizes.
//! - **Custom orders**: any [`Comparator`](persistent::Comparator), including
//!   plain closures.
//!
//! ## Feature Flags
//!
//! - `arc`: use `Arc` instead of `Rc` so maps can be shared between threads
//! - `serde`: `Serialize`/`Deserialize` for [`SortedMap`](persistent::SortedMap)
//! - `tracing`: emit `tracing` events for mode transitions and failed lookups
//! - `full`: `arc` and `serde`
//!
//! ## Example
//!
//! ```rust
//! use sortmap::prelude::*;
//!
//! let mut map = SortedMap::new().linear();
//! map.put(5, "five").put(3, "three").put(8, "eight");
//! let snapshot = map.forked();
//!
//! assert_eq!(snapshot.index_of(&5), Some(1));
//! assert_eq!(snapshot.nth(2).map(|(key, _)| *key), Ok(8));
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
// Note: Disabling redundant_closure_for_method_calls due to clippy 0.1.92 panic bug
#![allow(clippy::redundant_closure_for_method_calls)]

#[macro_use]
mod tracing_helpers;

/// Prelude module for convenient imports.
///
/// Re-exports commonly used types and traits.
///
/// # Usage
///
/// ```rust
/// use sortmap::prelude::*;
/// ```
pub mod prelude {
    pub use crate::persistent::*;
}

pub mod persistent;
