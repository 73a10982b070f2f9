// THEORY:
// The `blob` module holds the plain value types of the region forest. A `Blob`
// describes one connected region at one classification level; a `Node` places
// that blob inside the forest. Nodes never point at each other directly: every
// relation (parent, first child, next sibling) is a dense index into the arena
// owned by the `Blobtree`, so the whole forest is dropped or rebuilt in one go
// and no node can outlive the tree that owns it.
//
// Key architectural principles:
// 1.  **Dense Ids**: A blob's `id` is also its arena index. Slot 0 is a sentinel
//     meaning "no region"; real blobs start at 1.
// 2.  **Nesting Invariant**: A child's `depth_level` is strictly greater than its
//     parent's and its `roi` lies inside the parent's `roi`.
// 3.  **Stateless Data Containers**: Like the rest of the value types, these
//     structs know how to describe themselves (centre, containment) but carry no
//     per-frame memory.

use serde::{Deserialize, Serialize};

/// Index of a node inside a `Blobtree` arena. Equal to the blob's `id`.
pub type NodeId = usize;

/// Arena slot reserved for "no region".
pub const SENTINEL_ID: NodeId = 0;

/// Axis-aligned bounding box in pixel coordinates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Exclusive right edge.
    pub fn right(&self) -> u32 {
        self.x + self.width
    }

    /// Exclusive bottom edge.
    pub fn bottom(&self) -> u32 {
        self.y + self.height
    }

    pub fn contains_point(&self, x: u32, y: u32) -> bool {
        x >= self.x && x < self.right() && y >= self.y && y < self.bottom()
    }

    pub fn contains_rect(&self, other: &Rect) -> bool {
        other.x >= self.x
            && other.y >= self.y
            && other.right() <= self.right()
            && other.bottom() <= self.bottom()
    }

    /// Smallest rectangle covering both. An empty rectangle is the identity.
    pub fn union(&self, other: &Rect) -> Rect {
        if self.is_empty() {
            return *other;
        }
        if other.is_empty() {
            return *self;
        }
        let x = self.x.min(other.x);
        let y = self.y.min(other.y);
        Rect {
            x,
            y,
            width: self.right().max(other.right()) - x,
            height: self.bottom().max(other.bottom()) - y,
        }
    }

    /// Centre of the box, in pixel coordinates.
    pub fn center(&self) -> (f64, f64) {
        (
            self.x as f64 + self.width as f64 / 2.0,
            self.y as f64 + self.height as f64 / 2.0,
        )
    }
}

/// Sampling stride of the labeling pass. Only every `width`-th column and
/// `height`-th row is visited; the last row and column are always included.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grid {
    pub width: u32,
    pub height: u32,
}

impl Default for Grid {
    fn default() -> Self {
        Self {
            width: 1,
            height: 1,
        }
    }
}

impl Grid {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Sample coordinates along one axis of `[start, start + len)`.
    pub(crate) fn axis_samples(start: u32, len: u32, stride: u32) -> Vec<u32> {
        if len == 0 {
            return Vec::new();
        }
        let last = start + len - 1;
        let mut samples: Vec<u32> = (start..=last).step_by(stride.max(1) as usize).collect();
        if samples.last() != Some(&last) {
            samples.push(last);
        }
        samples
    }
}

/// One connected region at one hierarchy level.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Blob {
    /// Dense, 1-based id within the frame's forest.
    pub id: u32,
    /// Number of sampled pixels covered by the region, descendants included.
    pub area: u32,
    /// Bounding box of the sampled pixels of the region.
    pub roi: Rect,
    /// Classification level at which the region was formed.
    pub depth_level: u8,
}

impl Blob {
    pub fn center(&self) -> (f64, f64) {
        self.roi.center()
    }
}

/// Placement of a `Blob` inside the arena.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Node {
    pub blob: Blob,
    pub parent: Option<NodeId>,
    pub first_child: Option<NodeId>,
    pub next_sibling: Option<NodeId>,
    pub child_count: u32,
    /// Distance from the root; the root has depth 0.
    pub tree_depth: u32,
}

impl Node {
    pub fn id(&self) -> NodeId {
        self.blob.id as NodeId
    }

    pub fn is_leaf(&self) -> bool {
        self.first_child.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn union_ignores_empty_rects() {
        let a = Rect::new(2, 3, 4, 5);
        assert_eq!(a.union(&Rect::default()), a);
        assert_eq!(Rect::default().union(&a), a);
        assert_eq!(a.union(&Rect::new(0, 10, 1, 1)), Rect::new(0, 3, 6, 8));
    }

    #[test]
    fn containment() {
        let outer = Rect::new(0, 0, 20, 20);
        assert!(outer.contains_rect(&Rect::new(5, 5, 10, 10)));
        assert!(!outer.contains_rect(&Rect::new(15, 5, 10, 10)));
        assert!(outer.contains_point(19, 19));
        assert!(!outer.contains_point(20, 0));
    }

    #[test]
    fn axis_samples_keep_last_index() {
        assert_eq!(Grid::axis_samples(0, 10, 3), vec![0, 3, 6, 9]);
        assert_eq!(Grid::axis_samples(0, 11, 3), vec![0, 3, 6, 9, 10]);
        assert_eq!(Grid::axis_samples(4, 1, 5), vec![4]);
        assert!(Grid::axis_samples(4, 0, 5).is_empty());
    }
}
