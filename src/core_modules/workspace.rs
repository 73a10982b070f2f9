// THEORY:
// The `Workspace` is the memory contract of the labeling engine. It owns every
// per-pixel and per-id buffer the forest builder and the filter engine write to,
// sized once for a fixed image size and reused frame after frame so the hot path
// never allocates.
//
// Buffers (all indexed by plain integers, no pointers):
// - `ids`:              pixel -> provisional id of the region it was labeled with.
// - `comp_same`:        provisional id -> union-find parent (root = smallest id).
// - `real_ids_inv`:     provisional id -> compacted node id in the Blobtree.
// - `blob_id_filtered`: node id -> id of the nearest node surviving the filters.
//
// Provisional ids start at 1, so the id arrays carry one extra slot: index 0 is
// the "no region" sentinel and always resolves to node 0.
//
// Key architectural principles:
// 1.  **No Implicit Resize**: A workspace serves exactly one (width, height). A
//     frame of another size is rejected; callers drop the workspace and build a
//     new one.
// 2.  **Explicit Reset Policy**: `ResetPolicy::Eager` clears the pixel id map
//     before every pass, so pixels outside the region of interest read as
//     "no region". `ResetPolicy::Lazy(sentinel)` skips that clear; untouched
//     pixels keep whatever an earlier pass left, unless `reset()` pinned them
//     to the sentinel. The pixel lookups only resolve pixels the last pass
//     actually sampled, so stale ids never leak into them.
// 3.  **Generations**: Every labeling pass bumps a generation counter. A tree
//     remembers the generation it was built in, which lets the filter engine
//     refuse to write a collapse map against labels from another pass.

use crate::core_modules::blob::{Grid, NodeId, Rect};
use crate::core_modules::blob_detector::BuildScratch;
use crate::error::{BlobError, BlobResult};
use serde::{Deserialize, Serialize};

/// What happens to the pixel id map between labeling passes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResetPolicy {
    /// Clear every pixel id to 0 ("no region") before each pass.
    #[default]
    Eager,
    /// Leave stale ids in place; `reset()` fills the map with this sentinel.
    /// The sentinel must be 0 or larger than the pixel count, otherwise it
    /// could be mistaken for a provisional id; `Workspace::new` rejects it.
    Lazy(u32),
}

impl ResetPolicy {
    pub fn sentinel(&self) -> u32 {
        match self {
            Self::Eager => 0,
            Self::Lazy(sentinel) => *sentinel,
        }
    }
}

/// Reusable labeling buffers for one image size.
#[derive(Debug)]
pub struct Workspace {
    pub(crate) width: u32,
    pub(crate) height: u32,
    pub(crate) policy: ResetPolicy,
    pub(crate) ids: Vec<u32>,
    pub(crate) comp_same: Vec<u32>,
    pub(crate) real_ids_inv: Vec<u32>,
    pub(crate) blob_id_filtered: Vec<u32>,
    /// Level of every provisional id of the last pass.
    pub(crate) id_levels: Vec<u8>,
    /// Pairs of provisional ids whose regions touch with differing levels.
    pub(crate) edges: Vec<(u32, u32)>,
    pub(crate) scratch: BuildScratch,
    /// Number of provisional ids handed out by the last pass.
    pub(crate) provisional_count: u32,
    /// Number of arena slots (sentinel included) of the tree built by the last pass.
    pub(crate) node_count: u32,
    pub(crate) generation: u64,
    pub(crate) filtered_generation: Option<u64>,
    /// Region and stride scanned by the last pass.
    pub(crate) pass_roi: Rect,
    pub(crate) pass_grid: Grid,
}

fn alloc_buffer<T: Clone>(len: usize, value: T, width: u32, height: u32) -> BlobResult<Vec<T>> {
    let mut buffer = Vec::new();
    buffer
        .try_reserve_exact(len)
        .map_err(|_| BlobError::Allocation {
            width,
            height,
            slots: len,
        })?;
    buffer.resize(len, value);
    Ok(buffer)
}

fn check_sentinel(policy: ResetPolicy, pixels: usize) -> BlobResult<()> {
    let sentinel = policy.sentinel();
    if sentinel != 0 && sentinel as usize <= pixels {
        return Err(BlobError::InvalidSentinel { sentinel, pixels });
    }
    Ok(())
}

impl Workspace {
    /// Allocates the buffers for `width` x `height` frames.
    pub fn new(width: u32, height: u32, policy: ResetPolicy) -> BlobResult<Self> {
        if width == 0 || height == 0 {
            return Err(BlobError::InvalidDimensions { width, height });
        }
        let pixels = (width as usize)
            .checked_mul(height as usize)
            .filter(|&p| p < u32::MAX as usize)
            .ok_or(BlobError::Allocation {
                width,
                height,
                slots: usize::MAX,
            })?;
        let slots = pixels + 1;
        check_sentinel(policy, pixels)?;

        let workspace = Self {
            width,
            height,
            policy,
            ids: alloc_buffer(pixels, policy.sentinel(), width, height)?,
            comp_same: alloc_buffer(slots, 0, width, height)?,
            real_ids_inv: alloc_buffer(slots, 0, width, height)?,
            blob_id_filtered: alloc_buffer(slots, 0, width, height)?,
            id_levels: alloc_buffer(slots, 0, width, height)?,
            edges: Vec::new(),
            scratch: BuildScratch::default(),
            provisional_count: 0,
            node_count: 0,
            generation: 0,
            filtered_generation: None,
            pass_roi: Rect::default(),
            pass_grid: Grid::default(),
        };
        tracing::debug!(width, height, ?policy, "workspace allocated");
        Ok(workspace)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn policy(&self) -> ResetPolicy {
        self.policy
    }

    pub fn set_policy(&mut self, policy: ResetPolicy) -> BlobResult<()> {
        check_sentinel(policy, self.ids.len())?;
        self.policy = policy;
        Ok(())
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn provisional_count(&self) -> u32 {
        self.provisional_count
    }

    /// Fails fast when a buffer of `len` bytes cannot be a frame of this workspace.
    pub fn check_frame(&self, len: usize) -> BlobResult<()> {
        if len != self.ids.len() {
            return Err(BlobError::dimension_mismatch(
                self.width,
                self.height,
                format!("buffer of {len} bytes"),
            ));
        }
        Ok(())
    }

    /// Fills the pixel id map with the policy's sentinel.
    pub fn reset(&mut self) {
        let sentinel = self.policy.sentinel();
        self.ids.fill(sentinel);
        self.filtered_generation = None;
        self.pass_roi = Rect::default();
    }

    /// Starts a labeling pass over `roi` sampled with `grid`: bumps the
    /// generation and applies the reset policy.
    pub(crate) fn begin_pass(&mut self, roi: Rect, grid: Grid) -> u64 {
        self.pass_roi = roi;
        self.pass_grid = grid;
        if self.policy == ResetPolicy::Eager {
            self.ids.fill(0);
        }
        self.edges.clear();
        self.provisional_count = 0;
        self.node_count = 0;
        self.filtered_generation = None;
        self.generation += 1;
        self.generation
    }

    /// Union-find lookup with path halving.
    #[inline]
    pub(crate) fn find(&mut self, mut id: u32) -> u32 {
        while self.comp_same[id as usize] != id {
            let parent = self.comp_same[id as usize];
            let grand = self.comp_same[parent as usize];
            self.comp_same[id as usize] = grand;
            id = grand;
        }
        id
    }

    /// Merges two classes; the smaller representative wins.
    #[inline]
    pub(crate) fn union(&mut self, a: u32, b: u32) -> u32 {
        let root_a = self.find(a);
        let root_b = self.find(b);
        if root_a == root_b {
            return root_a;
        }
        let (keep, drop) = if root_a < root_b {
            (root_a, root_b)
        } else {
            (root_b, root_a)
        };
        self.comp_same[drop as usize] = keep;
        keep
    }

    /// Raw provisional id of every pixel, row-major.
    pub fn ids(&self) -> &[u32] {
        &self.ids
    }

    pub fn comp_same(&self) -> &[u32] {
        &self.comp_same[..=self.provisional_count as usize]
    }

    /// Provisional id -> node id for the last pass.
    pub fn real_ids_inv(&self) -> &[u32] {
        &self.real_ids_inv[..=self.provisional_count as usize]
    }

    /// Node id -> filtered node id, written by the filter engine.
    pub fn blob_id_filtered(&self) -> &[u32] {
        &self.blob_id_filtered[..self.node_count as usize]
    }

    pub fn has_filtered_ids(&self) -> bool {
        self.filtered_generation == Some(self.generation)
    }

    /// True if the last pass labeled pixel `(x, y)`.
    pub fn was_sampled(&self, x: u32, y: u32) -> bool {
        let roi = self.pass_roi;
        let on_axis = |v: u32, start: u32, len: u32, stride: u32| {
            let offset = v - start;
            offset % stride.max(1) == 0 || offset == len - 1
        };
        roi.contains_point(x, y)
            && on_axis(x, roi.x, roi.width, self.pass_grid.width)
            && on_axis(y, roi.y, roi.height, self.pass_grid.height)
    }

    /// Node owning pixel `(x, y)` after the last pass, if it was labeled.
    pub fn node_id_at(&self, x: u32, y: u32) -> Option<NodeId> {
        if x >= self.width || y >= self.height || !self.was_sampled(x, y) {
            return None;
        }
        let id = self.ids[(y * self.width + x) as usize];
        if id == 0 || id > self.provisional_count {
            return None;
        }
        Some(self.real_ids_inv[id as usize] as NodeId)
    }

    /// Node reported for pixel `(x, y)` through the collapse map. `Some(0)`
    /// means every ancestor of the pixel's node was filtered out.
    pub fn filtered_id_at(&self, x: u32, y: u32) -> Option<NodeId> {
        if !self.has_filtered_ids() {
            return None;
        }
        self.node_id_at(x, y)
            .map(|node| self.blob_id_filtered[node] as NodeId)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_zero_dimensions() {
        let err = Workspace::new(0, 10, ResetPolicy::Eager).unwrap_err();
        assert!(matches!(err, BlobError::InvalidDimensions { width: 0, height: 10 }));
        assert!(err.is_fatal());
    }

    #[test]
    fn buffers_are_sized_to_the_image() {
        let ws = Workspace::new(4, 3, ResetPolicy::Eager).unwrap();
        assert_eq!(ws.ids().len(), 12);
        assert_eq!(ws.comp_same.len(), 13);
        assert_eq!(ws.real_ids_inv.len(), 13);
        assert_eq!(ws.blob_id_filtered.len(), 13);
        assert!(ws.check_frame(12).is_ok());
        assert!(matches!(
            ws.check_frame(11),
            Err(BlobError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn lazy_reset_uses_sentinel() {
        let mut ws = Workspace::new(2, 2, ResetPolicy::Lazy(7)).unwrap();
        assert!(ws.ids().iter().all(|&id| id == 7));
        ws.ids[0] = 3;
        ws.begin_pass(Rect::new(0, 0, 2, 2), Grid::default());
        assert_eq!(ws.ids()[0], 3);
        ws.reset();
        assert_eq!(ws.ids()[0], 7);
        assert_eq!(ws.node_id_at(0, 0), None);
    }

    #[test]
    fn eager_pass_clears_ids() {
        let mut ws = Workspace::new(2, 2, ResetPolicy::Eager).unwrap();
        ws.ids[3] = 2;
        let generation = ws.begin_pass(Rect::new(0, 0, 2, 2), Grid::default());
        assert_eq!(generation, 1);
        assert!(ws.ids().iter().all(|&id| id == 0));
    }

    #[test]
    fn lazy_sentinel_must_not_look_like_an_id() {
        let err = Workspace::new(4, 4, ResetPolicy::Lazy(16)).unwrap_err();
        assert!(matches!(err, BlobError::InvalidSentinel { sentinel: 16, pixels: 16 }));
        assert!(Workspace::new(4, 4, ResetPolicy::Lazy(17)).is_ok());
        assert!(Workspace::new(4, 4, ResetPolicy::Lazy(0)).is_ok());

        let mut ws = Workspace::new(4, 4, ResetPolicy::Eager).unwrap();
        assert!(ws.set_policy(ResetPolicy::Lazy(3)).is_err());
        assert_eq!(ws.policy(), ResetPolicy::Eager);
    }

    #[test]
    fn sampled_pixels_follow_roi_and_grid() {
        let mut ws = Workspace::new(10, 10, ResetPolicy::Eager).unwrap();
        assert!(!ws.was_sampled(0, 0));
        ws.begin_pass(Rect::new(2, 2, 6, 5), Grid::new(3, 2));
        // Columns 2, 5, 7 and rows 2, 4, 6.
        assert!(ws.was_sampled(2, 2));
        assert!(ws.was_sampled(7, 6));
        assert!(ws.was_sampled(5, 4));
        assert!(!ws.was_sampled(3, 2));
        assert!(!ws.was_sampled(2, 3));
        assert!(!ws.was_sampled(1, 2));
        assert!(!ws.was_sampled(8, 6));
    }

    #[test]
    fn union_keeps_smallest_representative() {
        let mut ws = Workspace::new(4, 4, ResetPolicy::Eager).unwrap();
        for id in 0..=6u32 {
            ws.comp_same[id as usize] = id;
        }
        ws.union(5, 6);
        ws.union(6, 2);
        assert_eq!(ws.find(5), 2);
        assert_eq!(ws.find(6), 2);
        assert_eq!(ws.find(3), 3);
    }
}
