//! Error types for the persistent map.
//!
//! Only rank access can fail at runtime. [`InvariantViolation`] is produced
//! exclusively by [`SortedMap::check_invariants`](super::SortedMap::check_invariants).

use std::fmt;

/// Represents an out-of-range rank passed to [`SortedMap::nth`](super::SortedMap::nth).
///
/// # Examples
///
/// ```rust
/// use sortmap::persistent::IndexOutOfRangeError;
///
/// let error = IndexOutOfRangeError { index: 10, length: 7 };
/// assert_eq!(format!("{error}"), "index 10 out of range [0, 7)");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexOutOfRangeError {
    /// The rank that was requested.
    pub index: usize,
    /// The number of entries in the map; valid ranks are `0..length`.
    pub length: usize,
}

impl fmt::Display for IndexOutOfRangeError {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            formatter,
            "index {} out of range [0, {})",
            self.index, self.length
        )
    }
}

impl std::error::Error for IndexOutOfRangeError {}

/// A broken red-black or bookkeeping invariant found by the diagnostics walk.
///
/// A correctly used map never produces one of these; they indicate either a
/// bug in the tree algorithms or a comparator that is not a total order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvariantViolation {
    /// The root node is red.
    RedRoot,
    /// A red node has a red child. `depth` is the depth of the parent.
    RedRedViolation {
        /// Depth of the red parent (root is depth 0).
        depth: usize,
    },
    /// Two paths from the same node reach leaves through different numbers
    /// of black nodes.
    BlackHeightMismatch {
        /// Black height of the left subtree.
        left: usize,
        /// Black height of the right subtree.
        right: usize,
    },
    /// A node's cached subtree size disagrees with its children.
    SizeMismatch {
        /// The cached size.
        recorded: usize,
        /// `1 + size(left) + size(right)`.
        actual: usize,
    },
    /// In-order traversal produced keys that are not strictly increasing.
    OrderViolation {
        /// Rank of the first key that is not greater than its predecessor.
        index: usize,
    },
}

impl fmt::Display for InvariantViolation {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RedRoot => write!(formatter, "root node is red"),
            Self::RedRedViolation { depth } => {
                write!(formatter, "red node at depth {depth} has a red child")
            }
            Self::BlackHeightMismatch { left, right } => write!(
                formatter,
                "black height mismatch: left subtree {left}, right subtree {right}"
            ),
            Self::SizeMismatch { recorded, actual } => write!(
                formatter,
                "subtree size mismatch: recorded {recorded}, actual {actual}"
            ),
            Self::OrderViolation { index } => {
                write!(formatter, "keys out of order at index {index}")
            }
        }
    }
}

impl std::error::Error for InvariantViolation {}
