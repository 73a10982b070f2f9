// THEORY:
// The filter engine gives consumers a simplified view of a blob forest without
// rebuilding it. Every node is judged by a composable predicate: a fixed set of
// range checks (area, tree depth, classification level, leaves only) followed by
// an optional custom filter. A rejected node is not removed; it is *collapsed*
// onto an ancestor, and everything that pointed at it is redirected there.
//
// Key architectural principles:
// 1.  **AND of Checks**: The built-in checks are all combined with logical AND. A
//     node failing any of them collapses onto its parent.
// 2.  **Custom Extension Point**: A `NodeFilter` runs last and may collapse a node
//     by any number of levels, e.g. "merge into the parent when nearly the same
//     size". Errors from it abort the current pass and are handed back to the
//     caller; the tree itself is never modified.
// 3.  **Collapse Map**: `filter_blob_ids` writes, for every node id, the id of the
//     node a reader should report instead. Because ids are in pre-order, every
//     ancestor is resolved before its descendants and one linear pass suffices,
//     independent of the image size.

use crate::core_modules::blob::{Node, NodeId, SENTINEL_ID};
use crate::core_modules::blobtree::Blobtree;
use crate::core_modules::workspace::Workspace;
use crate::error::{BlobError, BlobResult};
use serde::{Deserialize, Serialize};

/// Range filters applied to every node. Bounds are inclusive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterConfig {
    pub area_min: u32,
    pub area_max: u32,
    /// Root has tree depth 0.
    pub tree_depth_min: u32,
    pub tree_depth_max: u32,
    /// Bounds on the node's classification level.
    pub area_depth_min: u8,
    pub area_depth_max: u8,
    pub only_leaves: bool,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            area_min: 0,
            area_max: u32::MAX,
            tree_depth_min: 0,
            tree_depth_max: u32::MAX,
            area_depth_min: 0,
            area_depth_max: u8::MAX,
            only_leaves: false,
        }
    }
}

impl FilterConfig {
    /// True if `node` passes every built-in check.
    pub fn accepts(&self, node: &Node) -> bool {
        let blob = &node.blob;
        (self.area_min..=self.area_max).contains(&blob.area)
            && (self.tree_depth_min..=self.tree_depth_max).contains(&node.tree_depth)
            && (self.area_depth_min..=self.area_depth_max).contains(&blob.depth_level)
            && !(self.only_leaves && !node.is_leaf())
    }

    pub fn with_area(mut self, min: u32, max: u32) -> Self {
        self.area_min = min;
        self.area_max = max;
        self
    }

    pub fn with_tree_depth(mut self, min: u32, max: u32) -> Self {
        self.tree_depth_min = min;
        self.tree_depth_max = max;
        self
    }

    pub fn with_area_depth(mut self, min: u8, max: u8) -> Self {
        self.area_depth_min = min;
        self.area_depth_max = max;
        self
    }

    pub fn with_only_leaves(mut self, only_leaves: bool) -> Self {
        self.only_leaves = only_leaves;
        self
    }
}

/// Verdict for one node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterDecision {
    Keep,
    /// Reject the node and report the node this many parents up instead
    /// (1 = immediate parent). `Collapse(0)` is the same as `Keep`.
    Collapse(u32),
}

/// Custom predicate run after the built-in checks.
pub trait NodeFilter {
    fn evaluate(&self, tree: &Blobtree, node: &Node) -> anyhow::Result<FilterDecision>;
}

impl<F> NodeFilter for F
where
    F: Fn(&Blobtree, &Node) -> anyhow::Result<FilterDecision>,
{
    fn evaluate(&self, tree: &Blobtree, node: &Node) -> anyhow::Result<FilterDecision> {
        self(tree, node)
    }
}

/// Collapses a node into its parent when it covers at least `ratio` of the
/// parent's area, i.e. when the nesting adds almost nothing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimilarAreaFilter {
    pub ratio: f64,
}

impl NodeFilter for SimilarAreaFilter {
    fn evaluate(&self, tree: &Blobtree, node: &Node) -> anyhow::Result<FilterDecision> {
        let Some(parent) = node.parent.and_then(|p| tree.node(p)) else {
            return Ok(FilterDecision::Keep);
        };
        if parent.blob.area > 0 && node.blob.area as f64 >= self.ratio * parent.blob.area as f64 {
            Ok(FilterDecision::Collapse(1))
        } else {
            Ok(FilterDecision::Keep)
        }
    }
}

/// Judges node `id` against the tree's active filters.
pub fn evaluate(tree: &Blobtree, id: NodeId) -> BlobResult<FilterDecision> {
    let node = match tree.node(id) {
        Some(node) if id != SENTINEL_ID => node,
        _ => return Ok(FilterDecision::Keep),
    };
    if !tree.filter().accepts(node) {
        return Ok(FilterDecision::Collapse(1));
    }
    if let Some(custom) = tree.custom_filter() {
        let decision = custom
            .evaluate(tree, node)
            .map_err(|source| BlobError::Predicate { node: id, source })?;
        return Ok(match decision {
            FilterDecision::Collapse(0) => FilterDecision::Keep,
            other => other,
        });
    }
    Ok(FilterDecision::Keep)
}

/// Nodes accepted by the active filters, in traversal order.
pub fn passing_nodes(tree: &Blobtree) -> BlobResult<Vec<NodeId>> {
    let mut passing = Vec::new();
    for node in tree.iter() {
        if evaluate(tree, node.id())? == FilterDecision::Keep {
            passing.push(node.id());
        }
    }
    Ok(passing)
}

/// Writes the collapse map of `tree` into `workspace.blob_id_filtered`.
///
/// The workspace must still hold the labels of the pass that built `tree`.
/// On error the previous map is invalidated and the tree is left untouched.
pub fn filter_blob_ids(tree: &Blobtree, workspace: &mut Workspace) -> BlobResult<()> {
    let source = tree.source().ok_or(BlobError::StaleWorkspace)?;
    if source.width != workspace.width() || source.height != workspace.height() {
        return Err(BlobError::dimension_mismatch(
            workspace.width(),
            workspace.height(),
            format!("tree built for {}x{}", source.width, source.height),
        ));
    }
    if source.generation != workspace.generation() {
        return Err(BlobError::StaleWorkspace);
    }

    workspace.filtered_generation = None;
    let slots = tree.slot_count();
    workspace.blob_id_filtered[SENTINEL_ID] = SENTINEL_ID as u32;
    let mut collapsed = 0usize;
    for id in 1..slots {
        let target = match evaluate(tree, id)? {
            FilterDecision::Keep => id as u32,
            FilterDecision::Collapse(levels) => {
                collapsed += 1;
                match tree.ancestor(id, levels) {
                    Some(ancestor) => workspace.blob_id_filtered[ancestor],
                    None => SENTINEL_ID as u32,
                }
            }
        };
        workspace.blob_id_filtered[id] = target;
    }
    workspace.filtered_generation = Some(workspace.generation());

    tracing::trace!(nodes = slots - 1, collapsed, "collapse map written");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_modules::blob::{Grid, Rect};
    use crate::core_modules::blob_detector::blob_detector::find_blobs_depth;
    use crate::core_modules::depth_map::DepthMap;
    use crate::core_modules::workspace::ResetPolicy;

    /// Root (level 0, 7x5) > ring (level 1) > centre pair (level 2) > peak (level 3),
    /// plus a separate level-1 dot in the corner.
    fn nested() -> (Blobtree, Workspace) {
        let rows = [
            "0000000", //
            "0111110", //
            "0123210", //
            "0111110", //
            "0000001",
        ];
        let (w, h) = (7u32, 5u32);
        let frame: Vec<u8> = rows
            .iter()
            .flat_map(|r| r.bytes().map(|c| (c - b'0') * 50))
            .collect();
        let mut ws = Workspace::new(w, h, ResetPolicy::Eager).unwrap();
        let mut tree = Blobtree::new();
        find_blobs_depth(
            &mut tree,
            &frame,
            w,
            h,
            Rect::new(0, 0, w, h),
            &DepthMap::staircase(50, 50),
            &mut ws,
        )
        .unwrap();
        (tree, ws)
    }

    #[test]
    fn permissive_filter_is_identity() {
        let (tree, mut ws) = nested();
        filter_blob_ids(&tree, &mut ws).unwrap();
        let expected: Vec<u32> = (0..tree.slot_count() as u32).collect();
        assert_eq!(ws.blob_id_filtered(), expected.as_slice());
        assert_eq!(passing_nodes(&tree).unwrap().len(), tree.len());
    }

    #[test]
    fn rejected_nodes_collapse_onto_surviving_ancestor() {
        let (mut tree, mut ws) = nested();
        // Only level 1 survives: deeper nodes fold into the ring, the root into nothing.
        tree.set_filter(FilterConfig::default().with_area_depth(1, 1));
        filter_blob_ids(&tree, &mut ws).unwrap();
        let ring = tree.node(2).unwrap();
        assert_eq!(ring.blob.depth_level, 1);
        assert_eq!(ws.blob_id_filtered()[1], 0);
        assert_eq!(ws.blob_id_filtered()[3], 2);
        assert_eq!(ws.blob_id_filtered()[4], 2);
        assert_eq!(ws.filtered_id_at(3, 2), Some(2));
        assert_eq!(ws.filtered_id_at(0, 0), Some(0));
        assert_eq!(ws.filtered_id_at(6, 4), ws.node_id_at(6, 4));
    }

    #[test]
    fn only_leaves_rejects_exactly_inner_nodes() {
        let (mut tree, _) = nested();
        tree.set_filter(FilterConfig::default().with_only_leaves(true));
        let passing = passing_nodes(&tree).unwrap();
        let leaves: Vec<NodeId> = tree.iter().filter(|n| n.is_leaf()).map(|n| n.id()).collect();
        assert_eq!(passing, leaves);
        assert_eq!(passing.len(), 2);
    }

    #[test]
    fn custom_filter_can_skip_several_levels() {
        let (mut tree, mut ws) = nested();
        tree.set_custom_filter(Some(Box::new(
            |_: &Blobtree, node: &Node| -> anyhow::Result<FilterDecision> {
                Ok(if node.blob.depth_level == 3 {
                    FilterDecision::Collapse(2)
                } else {
                    FilterDecision::Keep
                })
            },
        )));
        filter_blob_ids(&tree, &mut ws).unwrap();
        let peak = tree.iter().find(|n| n.blob.depth_level == 3).unwrap().id();
        assert_eq!(ws.blob_id_filtered()[peak], 2);
    }

    #[test]
    fn custom_filter_error_aborts_the_pass_only() {
        let (mut tree, mut ws) = nested();
        filter_blob_ids(&tree, &mut ws).unwrap();
        tree.set_custom_filter(Some(Box::new(
            |_: &Blobtree, node: &Node| -> anyhow::Result<FilterDecision> {
                if node.blob.depth_level == 2 {
                    anyhow::bail!("refusing level 2");
                }
                Ok(FilterDecision::Keep)
            },
        )));
        let err = filter_blob_ids(&tree, &mut ws).unwrap_err();
        assert!(matches!(err, BlobError::Predicate { node: 3, .. }));
        assert!(!ws.has_filtered_ids());
        assert_eq!(ws.filtered_id_at(3, 2), None);

        tree.set_custom_filter(None);
        filter_blob_ids(&tree, &mut ws).unwrap();
        assert!(ws.has_filtered_ids());
    }

    #[test]
    fn similar_area_filter_merges_near_copies() {
        let (mut tree, mut ws) = nested();
        tree.set_custom_filter(Some(Box::new(SimilarAreaFilter { ratio: 0.9 })));
        filter_blob_ids(&tree, &mut ws).unwrap();
        // Nothing is nearly as large as its parent in this frame.
        let expected: Vec<u32> = (0..tree.slot_count() as u32).collect();
        assert_eq!(ws.blob_id_filtered(), expected.as_slice());

        tree.set_custom_filter(Some(Box::new(SimilarAreaFilter { ratio: 0.0 })));
        filter_blob_ids(&tree, &mut ws).unwrap();
        assert!(ws.blob_id_filtered()[1..].iter().all(|&id| id == 1));
    }

    #[test]
    fn stale_workspace_is_refused() {
        let (tree, mut ws) = nested();
        let (_, mut other) = nested();
        let frame = vec![0u8; 35];
        let mut newer = Blobtree::new();
        find_blobs_depth(
            &mut newer,
            &frame,
            7,
            5,
            Rect::new(0, 0, 7, 5),
            &DepthMap::threshold(1),
            &mut ws,
        )
        .unwrap();
        assert!(matches!(
            filter_blob_ids(&tree, &mut ws),
            Err(BlobError::StaleWorkspace)
        ));
        assert!(filter_blob_ids(&newer, &mut ws).is_ok());

        // A fresh workspace with a different generation history.
        other.begin_pass(Rect::new(0, 0, 7, 5), Grid::default());
        assert!(matches!(
            filter_blob_ids(&tree, &mut other),
            Err(BlobError::StaleWorkspace)
        ));
    }
}
