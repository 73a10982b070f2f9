// THEORY:
// The `Blobtree` is the per-frame result of the region forest builder. It owns
// an arena of `Node`s (slot 0 is the "no region" sentinel, the root sits at
// slot 1) together with the sampling grid used to build it and the active
// filter configuration that consumers apply on top of it.
//
// Key architectural principles:
// 1.  **Arena Ownership**: All nodes live in one `Vec`. Rebuilding the tree for
//     the next frame clears and refills that `Vec`, so nothing from the old
//     frame survives and no allocation is leaked.
// 2.  **Pre-order Ids**: The builder numbers nodes in pre-order, which makes
//     "every ancestor has a smaller id than its descendants" a structural fact
//     the filter engine relies on.
// 3.  **Stateful Traversal**: `first()` / `next()` walk the whole tree with a
//     cursor stored in the tree itself. Only one walk can be active; `first()`
//     restarts it. `iter()` is the borrow-checked equivalent for Rust callers.
// 4.  **Provenance**: The tree remembers which workspace pass produced it
//     (dimensions plus generation), standing in for a back-reference to the
//     workspace without tying their lifetimes together.

use crate::core_modules::blob::{Blob, Grid, Node, NodeId, Rect, SENTINEL_ID};
use crate::core_modules::filter::{FilterConfig, NodeFilter};
use std::fmt;

/// Identifies the workspace pass a tree was built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Provenance {
    pub width: u32,
    pub height: u32,
    pub generation: u64,
}

/// Forest of nested blobs for one frame.
pub struct Blobtree {
    nodes: Vec<Node>,
    grid: Grid,
    roi: Rect,
    source: Option<Provenance>,
    filter: FilterConfig,
    custom_filter: Option<Box<dyn NodeFilter>>,
    cursor: Option<NodeId>,
}

impl Default for Blobtree {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Blobtree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Blobtree")
            .field("len", &self.len())
            .field("grid", &self.grid)
            .field("roi", &self.roi)
            .field("source", &self.source)
            .field("filter", &self.filter)
            .field("custom_filter", &self.custom_filter.is_some())
            .finish()
    }
}

impl Blobtree {
    pub fn new() -> Self {
        Self {
            nodes: vec![Node::default()],
            grid: Grid::default(),
            roi: Rect::default(),
            source: None,
            filter: FilterConfig::default(),
            custom_filter: None,
            cursor: None,
        }
    }

    pub fn with_grid(grid: Grid) -> Self {
        Self {
            grid,
            ..Self::new()
        }
    }

    pub fn grid(&self) -> Grid {
        self.grid
    }

    /// Takes effect on the next build.
    pub fn set_grid(&mut self, grid: Grid) {
        self.grid = grid;
    }

    /// Region of interest scanned by the last build.
    pub fn roi(&self) -> Rect {
        self.roi
    }

    pub fn source(&self) -> Option<Provenance> {
        self.source
    }

    pub fn filter(&self) -> &FilterConfig {
        &self.filter
    }

    pub fn filter_mut(&mut self) -> &mut FilterConfig {
        &mut self.filter
    }

    pub fn set_filter(&mut self, filter: FilterConfig) {
        self.filter = filter;
    }

    pub fn custom_filter(&self) -> Option<&dyn NodeFilter> {
        self.custom_filter.as_deref()
    }

    pub fn set_custom_filter(&mut self, custom: Option<Box<dyn NodeFilter>>) {
        self.custom_filter = custom;
    }

    /// Drops all nodes of the previous frame, keeping the arena allocation.
    pub(crate) fn clear(&mut self) {
        self.nodes.truncate(1);
        self.nodes[SENTINEL_ID] = Node::default();
        self.roi = Rect::default();
        self.source = None;
        self.cursor = None;
    }

    pub(crate) fn nodes_mut(&mut self) -> &mut Vec<Node> {
        &mut self.nodes
    }

    pub(crate) fn finish_build(&mut self, roi: Rect, source: Provenance) {
        self.roi = roi;
        self.source = Some(source);
        self.cursor = None;
    }

    /// Number of real blobs (sentinel excluded).
    pub fn len(&self) -> usize {
        self.nodes.len() - 1
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Arena slots, sentinel included.
    pub fn slot_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn root(&self) -> Option<NodeId> {
        (self.nodes.len() > 1).then_some(1)
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn blob(&self, id: NodeId) -> Option<&Blob> {
        self.nodes.get(id).map(|n| &n.blob)
    }

    /// All arena slots in pre-order; index 0 is the sentinel.
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes.get(id).and_then(|n| n.parent)
    }

    /// Climbs `levels` parents. `None` when that walks past the root.
    pub fn ancestor(&self, id: NodeId, levels: u32) -> Option<NodeId> {
        let mut current = id;
        for _ in 0..levels {
            current = self.parent(current)?;
        }
        Some(current)
    }

    pub fn children(&self, id: NodeId) -> Children<'_> {
        Children {
            tree: self,
            next: self.nodes.get(id).and_then(|n| n.first_child),
        }
    }

    /// Pre-order successor of `id`, following the child/sibling links.
    fn successor(&self, id: NodeId) -> Option<NodeId> {
        let node = self.nodes.get(id)?;
        if let Some(child) = node.first_child {
            return Some(child);
        }
        let mut current = id;
        loop {
            let n = &self.nodes[current];
            if let Some(sibling) = n.next_sibling {
                return Some(sibling);
            }
            current = n.parent?;
        }
    }

    /// Restarts the traversal and returns the root.
    pub fn first(&mut self) -> Option<NodeId> {
        self.cursor = self.root();
        self.cursor
    }

    /// Advances the traversal started by `first()`.
    pub fn next(&mut self) -> Option<NodeId> {
        self.cursor = self.cursor.and_then(|id| self.successor(id));
        self.cursor
    }

    /// Pre-order iterator over all real nodes.
    pub fn iter(&self) -> PreOrder<'_> {
        PreOrder {
            tree: self,
            next: self.root(),
        }
    }

    /// Indented dump of the whole tree, one node per line.
    pub fn print_tree(&self) -> String {
        let mut out = String::new();
        for node in self.iter() {
            let b = &node.blob;
            out.push_str(&"  ".repeat(node.tree_depth as usize));
            out.push_str(&format!(
                "#{} level={} area={} roi=({},{} {}x{})\n",
                b.id, b.depth_level, b.area, b.roi.x, b.roi.y, b.roi.width, b.roi.height
            ));
        }
        out
    }
}

impl fmt::Display for Blobtree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.print_tree())
    }
}

pub struct Children<'a> {
    tree: &'a Blobtree,
    next: Option<NodeId>,
}

impl<'a> Iterator for Children<'a> {
    type Item = &'a Node;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.tree.nodes.get(self.next?)?;
        self.next = node.next_sibling;
        Some(node)
    }
}

pub struct PreOrder<'a> {
    tree: &'a Blobtree,
    next: Option<NodeId>,
}

impl<'a> Iterator for PreOrder<'a> {
    type Item = &'a Node;

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.next?;
        self.next = self.tree.successor(id);
        self.tree.nodes.get(id)
    }
}
