//! Node algebra for [`SortedMap`](super::SortedMap).
//!
//! Every structural operation works on a `&mut Link` and obtains write access
//! to nodes through [`editable`], which either reuses a node in place or
//! replaces it with a copy (path copying). A node is reused only when it was
//! stamped with the current [`Edit`] token and nothing else references it, so
//! a node reachable from any other version is never written.
//!
//! The empty subtree is `None` and counts as black.

use std::cmp::Ordering;
use std::mem;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

use crate::persistent::{Comparator, InvariantViolation, ReferenceCounter};

// =============================================================================
// Color and Edit Token
// =============================================================================

/// The color of a Red-Black Tree node.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(super) enum Color {
    Red,
    Black,
}

/// Identifies the edit session that allocated a node.
///
/// Linear maps hold one token for their whole lifetime. Persistent maps draw
/// a fresh token for every operation, so nodes they create can be reused
/// within that operation and are frozen once it returns.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(super) struct Edit(u64);

static NEXT_EDIT: AtomicU64 = AtomicU64::new(1);

impl Edit {
    /// Allocates a token no other session has used.
    pub(super) fn fresh() -> Self {
        Self(NEXT_EDIT.fetch_add(1, AtomicOrdering::Relaxed))
    }
}

// =============================================================================
// Node Definition
// =============================================================================

pub(super) type Link<K, V> = Option<ReferenceCounter<Node<K, V>>>;

/// Internal node structure for the Red-Black Tree.
#[derive(Clone)]
pub(super) struct Node<K, V> {
    pub(super) key: K,
    pub(super) value: V,
    pub(super) color: Color,
    /// Number of entries in the subtree rooted here.
    pub(super) size: usize,
    pub(super) left: Link<K, V>,
    pub(super) right: Link<K, V>,
    edit: Edit,
}

impl<K, V> Node<K, V> {
    /// Creates a new red node with no children.
    const fn new_red(key: K, value: V, edit: Edit) -> Self {
        Self {
            key,
            value,
            color: Color::Red,
            size: 1,
            left: None,
            right: None,
            edit,
        }
    }

    fn update_size(&mut self) {
        self.size = 1 + size(&self.left) + size(&self.right);
    }
}

/// Number of entries below `link`.
#[inline]
pub(super) fn size<K, V>(link: &Link<K, V>) -> usize {
    link.as_ref().map_or(0, |node| node.size)
}

#[inline]
fn is_red<K, V>(link: &Link<K, V>) -> bool {
    link.as_ref().is_some_and(|node| node.color == Color::Red)
}

/// Returns write access to `node`, copying it first unless it belongs to
/// `edit` and is uniquely referenced.
fn editable<K: Clone, V: Clone>(
    node: &mut ReferenceCounter<Node<K, V>>,
    edit: Edit,
) -> &mut Node<K, V> {
    if node.edit != edit || ReferenceCounter::get_mut(node).is_none() {
        let mut copy = (**node).clone();
        copy.edit = edit;
        *node = ReferenceCounter::new(copy);
    }
    // Unique at this point, so this never clones.
    ReferenceCounter::make_mut(node)
}

/// Sets the color of the node behind `link`, leaving shared nodes untouched
/// when they already have that color.
pub(super) fn paint<K: Clone, V: Clone>(link: &mut Link<K, V>, color: Color, edit: Edit) {
    if let Some(node) = link.as_mut()
        && node.color != color
    {
        editable(node, edit).color = color;
    }
}

// =============================================================================
// Rotations
// =============================================================================

/// Rotates the subtree at `link` to the right. Colors are left unchanged.
fn rotate_right<K: Clone, V: Clone>(link: &mut Link<K, V>, edit: Edit) {
    let Some(mut pivot) = link.take() else {
        return;
    };
    let parent = editable(&mut pivot, edit);
    let Some(mut child) = parent.left.take() else {
        *link = Some(pivot);
        return;
    };
    let child_node = editable(&mut child, edit);
    parent.left = child_node.right.take();
    parent.update_size();
    child_node.right = Some(pivot);
    child_node.update_size();
    *link = Some(child);
}

/// Rotates the subtree at `link` to the left. Colors are left unchanged.
fn rotate_left<K: Clone, V: Clone>(link: &mut Link<K, V>, edit: Edit) {
    let Some(mut pivot) = link.take() else {
        return;
    };
    let parent = editable(&mut pivot, edit);
    let Some(mut child) = parent.right.take() else {
        *link = Some(pivot);
        return;
    };
    let child_node = editable(&mut child, edit);
    parent.right = child_node.left.take();
    parent.update_size();
    child_node.left = Some(pivot);
    child_node.update_size();
    *link = Some(child);
}

// =============================================================================
// Lookup and Rank Walks
// =============================================================================

/// Finds the node holding `key`.
pub(super) fn find<'a, K, V, C>(root: &'a Link<K, V>, key: &K, comparator: &C) -> Option<&'a Node<K, V>>
where
    C: Comparator<K> + ?Sized,
{
    let mut link = root;
    while let Some(node) = link.as_deref() {
        match comparator.compare(key, &node.key) {
            Ordering::Less => link = &node.left,
            Ordering::Greater => link = &node.right,
            Ordering::Equal => return Some(node),
        }
    }
    None
}

/// Rank of `key`, accumulating left-subtree sizes on the way down.
pub(super) fn rank_of<K, V, C>(root: &Link<K, V>, key: &K, comparator: &C) -> Option<usize>
where
    C: Comparator<K> + ?Sized,
{
    let mut link = root;
    let mut offset = 0;
    while let Some(node) = link {
        match comparator.compare(key, &node.key) {
            Ordering::Less => link = &node.left,
            Ordering::Greater => {
                offset += size(&node.left) + 1;
                link = &node.right;
            }
            Ordering::Equal => return Some(offset + size(&node.left)),
        }
    }
    None
}

/// The node at rank `index`.
pub(super) fn select<K, V>(root: &Link<K, V>, mut index: usize) -> Option<&Node<K, V>> {
    let mut link = root;
    while let Some(node) = link.as_deref() {
        let left = size(&node.left);
        match index.cmp(&left) {
            Ordering::Less => link = &node.left,
            Ordering::Equal => return Some(node),
            Ordering::Greater => {
                index -= left + 1;
                link = &node.right;
            }
        }
    }
    None
}

/// Rank of the greatest key `<= key`.
pub(super) fn floor_rank<K, V, C>(root: &Link<K, V>, key: &K, comparator: &C) -> Option<usize>
where
    C: Comparator<K> + ?Sized,
{
    let mut link = root;
    let mut offset = 0;
    let mut best = None;
    while let Some(node) = link {
        let rank = offset + size(&node.left);
        match comparator.compare(key, &node.key) {
            Ordering::Less => link = &node.left,
            Ordering::Equal => return Some(rank),
            Ordering::Greater => {
                best = Some(rank);
                offset = rank + 1;
                link = &node.right;
            }
        }
    }
    best
}

/// Rank of the least key `>= key`.
pub(super) fn ceil_rank<K, V, C>(root: &Link<K, V>, key: &K, comparator: &C) -> Option<usize>
where
    C: Comparator<K> + ?Sized,
{
    let mut link = root;
    let mut offset = 0;
    let mut best = None;
    while let Some(node) = link {
        let rank = offset + size(&node.left);
        match comparator.compare(key, &node.key) {
            Ordering::Less => {
                best = Some(rank);
                link = &node.left;
            }
            Ordering::Equal => return Some(rank),
            Ordering::Greater => {
                offset = rank + 1;
                link = &node.right;
            }
        }
    }
    best
}

/// Number of keys below `key`, or at or below it when `inclusive`.
pub(super) fn count_below<K, V, C>(root: &Link<K, V>, key: &K, inclusive: bool, comparator: &C) -> usize
where
    C: Comparator<K> + ?Sized,
{
    let mut link = root;
    let mut count = 0;
    while let Some(node) = link {
        let below = match comparator.compare(&node.key, key) {
            Ordering::Less => true,
            Ordering::Equal => inclusive,
            Ordering::Greater => false,
        };
        if below {
            count += size(&node.left) + 1;
            link = &node.right;
        } else {
            link = &node.left;
        }
    }
    count
}

// =============================================================================
// Insertion
// =============================================================================

/// Inserts `key` below `link`, merging with an existing value.
///
/// Returns `true` if a new entry was added. The root may be left red.
pub(super) fn insert<K, V, C, F>(
    link: &mut Link<K, V>,
    key: K,
    value: V,
    merge: F,
    comparator: &C,
    edit: Edit,
) -> bool
where
    K: Clone,
    V: Clone,
    C: Comparator<K> + ?Sized,
    F: FnOnce(&V, V) -> V,
{
    match link {
        None => {
            *link = Some(ReferenceCounter::new(Node::new_red(key, value, edit)));
            true
        }
        Some(node) => {
            let node = editable(node, edit);
            let added = match comparator.compare(&key, &node.key) {
                Ordering::Less => insert(&mut node.left, key, value, merge, comparator, edit),
                Ordering::Greater => insert(&mut node.right, key, value, merge, comparator, edit),
                Ordering::Equal => {
                    node.value = merge(&node.value, value);
                    false
                }
            };
            if added {
                node.size += 1;
                balance(link, edit);
            }
            added
        }
    }
}

/// Where a red child with a red grandchild sits below a black node.
enum RedViolation {
    LeftLeft,
    LeftRight,
    RightRight,
    RightLeft,
}

fn red_violation<K, V>(node: &Node<K, V>) -> Option<RedViolation> {
    if node.color != Color::Black {
        return None;
    }
    if let Some(left) = node.left.as_deref()
        && left.color == Color::Red
    {
        if is_red(&left.left) {
            return Some(RedViolation::LeftLeft);
        }
        if is_red(&left.right) {
            return Some(RedViolation::LeftRight);
        }
    }
    if let Some(right) = node.right.as_deref()
        && right.color == Color::Red
    {
        if is_red(&right.right) {
            return Some(RedViolation::RightRight);
        }
        if is_red(&right.left) {
            return Some(RedViolation::RightLeft);
        }
    }
    None
}

/// Okasaki's balance: a black node over a red-red chain becomes a red node
/// with two black children.
fn balance<K: Clone, V: Clone>(link: &mut Link<K, V>, edit: Edit) {
    let Some(violation) = link.as_deref().and_then(red_violation) else {
        return;
    };
    match violation {
        RedViolation::LeftLeft => rotate_right(link, edit),
        RedViolation::LeftRight => {
            if let Some(node) = link.as_mut() {
                rotate_left(&mut editable(node, edit).left, edit);
            }
            rotate_right(link, edit);
        }
        RedViolation::RightRight => rotate_left(link, edit),
        RedViolation::RightLeft => {
            if let Some(node) = link.as_mut() {
                rotate_right(&mut editable(node, edit).right, edit);
            }
            rotate_left(link, edit);
        }
    }
    if let Some(node) = link.as_mut() {
        let node = editable(node, edit);
        node.color = Color::Red;
        paint(&mut node.left, Color::Black, edit);
        paint(&mut node.right, Color::Black, edit);
    }
}

// =============================================================================
// Removal
// =============================================================================

/// An entry taken out of a subtree.
pub(super) struct Removed<K, V> {
    pub(super) key: K,
    pub(super) value: V,
    /// The subtree's black height dropped by one.
    shorter: bool,
}

/// Removes `key` from below `link`.
///
/// Callers check that the key is present first; otherwise the path is copied
/// for nothing.
pub(super) fn remove<K, V, C>(
    link: &mut Link<K, V>,
    key: &K,
    comparator: &C,
    edit: Edit,
) -> Option<Removed<K, V>>
where
    K: Clone,
    V: Clone,
    C: Comparator<K> + ?Sized,
{
    let current = link.as_deref()?;
    match comparator.compare(key, &current.key) {
        Ordering::Less => {
            let node = editable(link.as_mut()?, edit);
            let mut removed = remove(&mut node.left, key, comparator, edit)?;
            node.size -= 1;
            if removed.shorter {
                removed.shorter = fix_left_shortened(link, edit);
            }
            Some(removed)
        }
        Ordering::Greater => {
            let node = editable(link.as_mut()?, edit);
            let mut removed = remove(&mut node.right, key, comparator, edit)?;
            node.size -= 1;
            if removed.shorter {
                removed.shorter = fix_right_shortened(link, edit);
            }
            Some(removed)
        }
        Ordering::Equal if current.left.is_some() && current.right.is_some() => {
            // Splice in the successor, then delete it from the right subtree.
            let node = editable(link.as_mut()?, edit);
            let successor = remove_min(&mut node.right, edit)?;
            let key = mem::replace(&mut node.key, successor.key);
            let value = mem::replace(&mut node.value, successor.value);
            node.size -= 1;
            let shorter = successor.shorter && fix_right_shortened(link, edit);
            Some(Removed {
                key,
                value,
                shorter,
            })
        }
        Ordering::Equal => unlink(link, edit),
    }
}

/// Removes the leftmost entry below `link`.
fn remove_min<K: Clone, V: Clone>(link: &mut Link<K, V>, edit: Edit) -> Option<Removed<K, V>> {
    if link.as_deref()?.left.is_none() {
        return unlink(link, edit);
    }
    let node = editable(link.as_mut()?, edit);
    let mut removed = remove_min(&mut node.left, edit)?;
    node.size -= 1;
    if removed.shorter {
        removed.shorter = fix_left_shortened(link, edit);
    }
    Some(removed)
}

/// Detaches a node with at most one child, promoting the child.
///
/// A lone child is always a red leaf, so painting it black restores the
/// black height. Removing a black leaf shortens the subtree.
fn unlink<K: Clone, V: Clone>(link: &mut Link<K, V>, edit: Edit) -> Option<Removed<K, V>> {
    let Node {
        key,
        value,
        color,
        left,
        right,
        ..
    } = ReferenceCounter::unwrap_or_clone(link.take()?);
    let mut child = left.or(right);
    let shorter = child.is_none() && color == Color::Black;
    paint(&mut child, Color::Black, edit);
    *link = child;
    Some(Removed {
        key,
        value,
        shorter,
    })
}

/// Colors of a parent, its sibling subtree and that sibling's children, read
/// before a double-black fix-up rewrites them.
struct Neighborhood {
    parent: Color,
    sibling: Color,
    near_nephew_red: bool,
    far_nephew_red: bool,
}

/// The left subtree of the node at `link` lost one black level. Restores the
/// black height locally where possible.
///
/// Returns `true` if the whole subtree at `link` is now one level shorter and
/// the caller has to continue the fix-up.
fn fix_left_shortened<K: Clone, V: Clone>(link: &mut Link<K, V>, edit: Edit) -> bool {
    let Some(parent) = link.as_deref() else {
        return false;
    };
    let Some(sibling) = parent.right.as_deref() else {
        return true;
    };
    let neighborhood = Neighborhood {
        parent: parent.color,
        sibling: sibling.color,
        near_nephew_red: is_red(&sibling.left),
        far_nephew_red: is_red(&sibling.right),
    };

    if neighborhood.sibling == Color::Red {
        // Red sibling: rotate it up so the deficient side gets a black sibling
        // under a red parent, then fix that lower level.
        rotate_left(link, edit);
        if let Some(top) = link.as_mut() {
            let top = editable(top, edit);
            top.color = Color::Black;
            paint(&mut top.left, Color::Red, edit);
            fix_left_shortened(&mut top.left, edit);
        }
        return false;
    }

    if !neighborhood.near_nephew_red && !neighborhood.far_nephew_red {
        // Black sibling with black children: recolor and push the deficit up.
        if let Some(parent) = link.as_mut() {
            let parent = editable(parent, edit);
            parent.color = Color::Black;
            paint(&mut parent.right, Color::Red, edit);
        }
        return neighborhood.parent == Color::Black;
    }

    if !neighborhood.far_nephew_red {
        // Only the near nephew is red: rotate it into the far position.
        if let Some(parent) = link.as_mut() {
            let parent = editable(parent, edit);
            rotate_right(&mut parent.right, edit);
            if let Some(sibling) = parent.right.as_mut() {
                let sibling = editable(sibling, edit);
                sibling.color = Color::Black;
                paint(&mut sibling.right, Color::Red, edit);
            }
        }
    }

    // Far nephew is red: one rotation absorbs the missing black.
    rotate_left(link, edit);
    if let Some(top) = link.as_mut() {
        let top = editable(top, edit);
        top.color = neighborhood.parent;
        paint(&mut top.left, Color::Black, edit);
        paint(&mut top.right, Color::Black, edit);
    }
    false
}

/// Mirror image of [`fix_left_shortened`].
fn fix_right_shortened<K: Clone, V: Clone>(link: &mut Link<K, V>, edit: Edit) -> bool {
    let Some(parent) = link.as_deref() else {
        return false;
    };
    let Some(sibling) = parent.left.as_deref() else {
        return true;
    };
    let neighborhood = Neighborhood {
        parent: parent.color,
        sibling: sibling.color,
        near_nephew_red: is_red(&sibling.right),
        far_nephew_red: is_red(&sibling.left),
    };

    if neighborhood.sibling == Color::Red {
        rotate_right(link, edit);
        if let Some(top) = link.as_mut() {
            let top = editable(top, edit);
            top.color = Color::Black;
            paint(&mut top.right, Color::Red, edit);
            fix_right_shortened(&mut top.right, edit);
        }
        return false;
    }

    if !neighborhood.near_nephew_red && !neighborhood.far_nephew_red {
        if let Some(parent) = link.as_mut() {
            let parent = editable(parent, edit);
            parent.color = Color::Black;
            paint(&mut parent.left, Color::Red, edit);
        }
        return neighborhood.parent == Color::Black;
    }

    if !neighborhood.far_nephew_red {
        if let Some(parent) = link.as_mut() {
            let parent = editable(parent, edit);
            rotate_left(&mut parent.left, edit);
            if let Some(sibling) = parent.left.as_mut() {
                let sibling = editable(sibling, edit);
                sibling.color = Color::Black;
                paint(&mut sibling.left, Color::Red, edit);
            }
        }
    }

    rotate_right(link, edit);
    if let Some(top) = link.as_mut() {
        let top = editable(top, edit);
        top.color = neighborhood.parent;
        paint(&mut top.left, Color::Black, edit);
        paint(&mut top.right, Color::Black, edit);
    }
    false
}

// =============================================================================
// Value Mapping
// =============================================================================

/// Copies the tree shape, transforming every value in key order.
pub(super) fn map_values<K, V, W, F>(link: &Link<K, V>, transform: &mut F, edit: Edit) -> Link<K, W>
where
    K: Clone,
    F: FnMut(&K, &V) -> W,
{
    link.as_ref().map(|node| {
        let left = map_values(&node.left, transform, edit);
        let value = transform(&node.key, &node.value);
        let right = map_values(&node.right, transform, edit);
        ReferenceCounter::new(Node {
            key: node.key.clone(),
            value,
            color: node.color,
            size: node.size,
            left,
            right,
            edit,
        })
    })
}

/// Replaces every value in key order, reusing nodes owned by `edit`.
pub(super) fn map_values_in_place<K, V, F>(link: &mut Link<K, V>, transform: &mut F, edit: Edit)
where
    K: Clone,
    V: Clone,
    F: FnMut(&K, &V) -> V,
{
    if let Some(node) = link.as_mut() {
        let node = editable(node, edit);
        map_values_in_place(&mut node.left, transform, edit);
        node.value = transform(&node.key, &node.value);
        map_values_in_place(&mut node.right, transform, edit);
    }
}

// =============================================================================
// Diagnostics
// =============================================================================

/// Shape of a tree reported by [`SortedMap::check_invariants`](super::SortedMap::check_invariants).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TreeMetrics {
    /// Number of entries.
    pub len: usize,
    /// Number of nodes on the longest root-to-leaf path.
    pub height: usize,
    /// Number of black nodes on every root-to-leaf path.
    pub black_height: usize,
}

/// Verifies colors and sizes below `link`. Key order is checked separately.
pub(super) fn measure<K, V>(link: &Link<K, V>, depth: usize) -> Result<TreeMetrics, InvariantViolation> {
    let Some(node) = link else {
        return Ok(TreeMetrics {
            len: 0,
            height: 0,
            black_height: 0,
        });
    };
    if node.color == Color::Red && (is_red(&node.left) || is_red(&node.right)) {
        return Err(InvariantViolation::RedRedViolation { depth });
    }
    let left = measure(&node.left, depth + 1)?;
    let right = measure(&node.right, depth + 1)?;
    if left.black_height != right.black_height {
        return Err(InvariantViolation::BlackHeightMismatch {
            left: left.black_height,
            right: right.black_height,
        });
    }
    let actual = 1 + left.len + right.len;
    if node.size != actual {
        return Err(InvariantViolation::SizeMismatch {
            recorded: node.size,
            actual,
        });
    }
    Ok(TreeMetrics {
        len: actual,
        height: 1 + left.height.max(right.height),
        black_height: left.black_height + usize::from(node.color == Color::Black),
    })
}

// =============================================================================
// Tests
// =============================================================================
