//! Lazy in-order iterators over a [`SortedMap`](super::SortedMap).

use smallvec::SmallVec;

use super::node::{Link, Node, size};
use crate::persistent::ReferenceCounter;

/// Inline capacity of the traversal stack; covers trees with well over a
/// million entries before spilling to the heap.
const STACK_INLINE: usize = 48;

// =============================================================================
// Cursor
// =============================================================================

/// Explicit-stack in-order traversal.
///
/// The stack holds the nodes whose entry has not been yielded yet, in the
/// order they will be yielded; their left subtrees are already exhausted.
struct Cursor<'a, K, V> {
    stack: SmallVec<[&'a Node<K, V>; STACK_INLINE]>,
    remaining: usize,
}

impl<'a, K, V> Cursor<'a, K, V> {
    /// Positions the cursor on rank `start`, yielding at most `count` entries.
    fn seek(root: &'a Link<K, V>, start: usize, count: usize) -> Self {
        let mut stack = SmallVec::new();
        let mut link = root;
        let mut index = start;
        while let Some(node) = link.as_deref() {
            let left = size(&node.left);
            if index <= left {
                stack.push(node);
                if index == left {
                    break;
                }
                link = &node.left;
            } else {
                index -= left + 1;
                link = &node.right;
            }
        }
        let available = size(root).saturating_sub(start);
        Self {
            stack,
            remaining: count.min(available),
        }
    }

    fn push_left_spine(&mut self, mut link: &'a Link<K, V>) {
        while let Some(node) = link.as_deref() {
            self.stack.push(node);
            link = &node.left;
        }
    }

    fn next(&mut self) -> Option<(&'a K, &'a V)> {
        if self.remaining == 0 {
            return None;
        }
        let node = self.stack.pop()?;
        self.push_left_spine(&node.right);
        self.remaining -= 1;
        Some((&node.key, &node.value))
    }
}

// =============================================================================
// Borrowing Iterators
// =============================================================================

/// An iterator over key-value pairs of a [`SortedMap`](super::SortedMap) in
/// ascending key order.
pub struct SortedMapIterator<'a, K, V> {
    cursor: Cursor<'a, K, V>,
}

impl<'a, K, V> SortedMapIterator<'a, K, V> {
    pub(super) fn new(root: &'a Link<K, V>) -> Self {
        Self {
            cursor: Cursor::seek(root, 0, size(root)),
        }
    }
}

impl<'a, K, V> Iterator for SortedMapIterator<'a, K, V> {
    type Item = (&'a K, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        self.cursor.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.cursor.remaining, Some(self.cursor.remaining))
    }
}

impl<K, V> ExactSizeIterator for SortedMapIterator<'_, K, V> {
    fn len(&self) -> usize {
        self.cursor.remaining
    }
}

/// An iterator over the entries of a [`SortedMap`](super::SortedMap) whose
/// keys fall within a range.
///
/// Construction costs O(log N); each step is amortized O(1).
pub struct SortedMapRangeIterator<'a, K, V> {
    cursor: Cursor<'a, K, V>,
}

impl<'a, K, V> SortedMapRangeIterator<'a, K, V> {
    /// Iterates over ranks `start..end`.
    pub(super) fn new(root: &'a Link<K, V>, start: usize, end: usize) -> Self {
        Self {
            cursor: Cursor::seek(root, start, end.saturating_sub(start)),
        }
    }
}

impl<'a, K, V> Iterator for SortedMapRangeIterator<'a, K, V> {
    type Item = (&'a K, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        self.cursor.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.cursor.remaining, Some(self.cursor.remaining))
    }
}

impl<K, V> ExactSizeIterator for SortedMapRangeIterator<'_, K, V> {
    fn len(&self) -> usize {
        self.cursor.remaining
    }
}

/// An iterator over the keys of a [`SortedMap`](super::SortedMap).
pub struct SortedMapKeys<'a, K, V> {
    inner: SortedMapIterator<'a, K, V>,
}

impl<'a, K, V> SortedMapKeys<'a, K, V> {
    pub(super) const fn new(inner: SortedMapIterator<'a, K, V>) -> Self {
        Self { inner }
    }
}

impl<'a, K, V> Iterator for SortedMapKeys<'a, K, V> {
    type Item = &'a K;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|(key, _)| key)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl<K, V> ExactSizeIterator for SortedMapKeys<'_, K, V> {}

/// An iterator over the values of a [`SortedMap`](super::SortedMap), in key order.
pub struct SortedMapValues<'a, K, V> {
    inner: SortedMapIterator<'a, K, V>,
}

impl<'a, K, V> SortedMapValues<'a, K, V> {
    pub(super) const fn new(inner: SortedMapIterator<'a, K, V>) -> Self {
        Self { inner }
    }
}

impl<'a, K, V> Iterator for SortedMapValues<'a, K, V> {
    type Item = &'a V;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|(_, value)| value)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl<K, V> ExactSizeIterator for SortedMapValues<'_, K, V> {}

// =============================================================================
// Owning Iterator
// =============================================================================

/// An owning iterator over key-value pairs of a [`SortedMap`](super::SortedMap).
///
/// Holds reference-counted handles to the pending nodes, so subtrees stay
/// alive only as long as they have not been visited. Entries are cloned out
/// of the nodes because other versions may still share them.
pub struct SortedMapIntoIterator<K, V> {
    stack: Vec<ReferenceCounter<Node<K, V>>>,
    remaining: usize,
}

impl<K, V> SortedMapIntoIterator<K, V> {
    pub(super) fn new(root: Link<K, V>) -> Self {
        let mut iterator = Self {
            stack: Vec::new(),
            remaining: size(&root),
        };
        iterator.push_left_spine(root);
        iterator
    }

    fn push_left_spine(&mut self, mut link: Link<K, V>) {
        while let Some(node) = link {
            link = node.left.clone();
            self.stack.push(node);
        }
    }
}

impl<K: Clone, V: Clone> Iterator for SortedMapIntoIterator<K, V> {
    type Item = (K, V);

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.stack.pop()?;
        self.push_left_spine(node.right.clone());
        self.remaining -= 1;
        Some((node.key.clone(), node.value.clone()))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<K: Clone, V: Clone> ExactSizeIterator for SortedMapIntoIterator<K, V> {
    fn len(&self) -> usize {
        self.remaining
    }
}
