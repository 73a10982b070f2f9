// THEORY:
// The `BlobDetector` is the engine of the region forest. It turns one grayscale
// frame into a `Blobtree` of nested regions using a single raster scan with
// union-find labeling, followed by a pass that stacks the labeled regions into
// a hierarchy by classification level.
//
// Key architectural principles & algorithm steps:
// 1.  **Sampling**: Only pixels on the sampling grid inside the region of
//     interest are visited. The last row and column of the region are always
//     sampled so that thin borders are never truncated.
// 2.  **Raster Labeling**: Each sample is compared with its left and upper
//     sampled neighbours (4-connectivity). Equal levels share a provisional id,
//     merging classes in the workspace's union-find array when both neighbours
//     match. Differing levels are remembered as an adjacency between the two
//     provisional ids.
// 3.  **Compaction**: Union-find classes are compacted into dense "flat zones",
//     maximal connected runs of one level, each with its sampled area and box.
// 4.  **Stacking**: Zones are visited from the deepest level to the shallowest.
//     A region at level L is everything connected at level >= L that contains
//     at least one zone of level L; regions already built at deeper levels that
//     touch it become its children. The shallower side is therefore always the
//     ancestor, and a parent's box and area cover all of its descendants.
// 5.  **Numbering**: The finished hierarchy is written into the tree arena in
//     pre-order, children ordered by where they first appear in the raster, and
//     every provisional id is mapped straight onto its node id.
//
// The threshold variant is the same engine with a two-level classification map,
// which yields a root for the whole region of interest and one flat layer of
// foreground children.
//
// All scratch memory lives in the workspace and is reused between frames.

use crate::core_modules::blob::{Blob, Grid, Node, Rect, SENTINEL_ID};
use crate::core_modules::blobtree::{Blobtree, Provenance};
use crate::core_modules::depth_map::DepthMap;
use crate::core_modules::workspace::Workspace;
use crate::error::{BlobError, BlobResult};

const NONE: u32 = u32::MAX;

#[derive(Debug, Clone, Copy)]
pub(crate) struct PendingNode {
    level: u8,
    area: u32,
    roi: Rect,
    parent: u32,
    /// Smallest zone index of the node, i.e. its first appearance in the raster.
    anchor: u32,
}

/// Per-frame buffers of the stacking step, kept in the workspace.
#[derive(Debug, Default)]
pub(crate) struct BuildScratch {
    zone_level: Vec<u8>,
    zone_area: Vec<u32>,
    zone_roi: Vec<Rect>,
    adj_start: Vec<u32>,
    adj_fill: Vec<u32>,
    adj: Vec<u32>,
    order: Vec<u32>,
    comp: Vec<u32>,
    top: Vec<u32>,
    processed: Vec<bool>,
    zone_node: Vec<u32>,
    pending: Vec<(u32, u32)>,
    nodes: Vec<PendingNode>,
    links: Vec<(u32, u32, u32)>,
    child_start: Vec<u32>,
    new_id: Vec<u32>,
    stack: Vec<(u32, usize, u32)>,
}

impl BuildScratch {
    fn reset(&mut self) {
        self.zone_level.clear();
        self.zone_area.clear();
        self.zone_roi.clear();
        self.adj_start.clear();
        self.adj_fill.clear();
        self.adj.clear();
        self.order.clear();
        self.comp.clear();
        self.top.clear();
        self.processed.clear();
        self.zone_node.clear();
        self.pending.clear();
        self.nodes.clear();
        self.links.clear();
        self.child_start.clear();
        self.new_id.clear();
        self.stack.clear();
    }
}

fn find_root(parent: &mut [u32], mut x: u32) -> u32 {
    while parent[x as usize] != x {
        let grand = parent[parent[x as usize] as usize];
        parent[x as usize] = grand;
        x = grand;
    }
    x
}

fn union_roots(parent: &mut [u32], a: u32, b: u32) {
    let ra = find_root(parent, a);
    let rb = find_root(parent, b);
    if ra != rb {
        parent[ra.max(rb) as usize] = ra.min(rb);
    }
}

pub mod blob_detector {
    use super::*; // Make helpers from parent module available.

    /// Two-level variant: background below `thresh`, foreground at or above it.
    pub fn find_blobs_threshold(
        tree: &mut Blobtree,
        frame: &[u8],
        width: u32,
        height: u32,
        roi: Rect,
        thresh: u8,
        workspace: &mut Workspace,
    ) -> BlobResult<()> {
        let map = DepthMap::threshold(thresh);
        find_blobs_depth(tree, frame, width, height, roi, &map, workspace)
    }

    /// Full hierarchy by classification level.
    pub fn find_blobs_depth(
        tree: &mut Blobtree,
        frame: &[u8],
        width: u32,
        height: u32,
        roi: Rect,
        depth_map: &DepthMap,
        workspace: &mut Workspace,
    ) -> BlobResult<()> {
        validate(tree, frame, width, height, roi, workspace)?;

        let grid = tree.grid();
        let generation = workspace.begin_pass(roi, grid);
        tree.clear();

        let xs = Grid::axis_samples(roi.x, roi.width, grid.width);
        let ys = Grid::axis_samples(roi.y, roi.height, grid.height);

        let provisional = label(frame, width, &xs, &ys, depth_map, workspace);
        workspace.provisional_count = provisional;

        let mut scratch = std::mem::take(&mut workspace.scratch);
        scratch.reset();
        compact_zones(workspace, &mut scratch, width, &xs, &ys);
        stack_levels(&mut scratch);
        write_arena(tree, workspace, &mut scratch);
        workspace.scratch = scratch;

        tree.finish_build(
            roi,
            Provenance {
                width,
                height,
                generation,
            },
        );

        tracing::debug!(
            generation,
            provisional_ids = provisional,
            blobs = tree.len(),
            samples = xs.len() * ys.len(),
            "blob forest built"
        );
        Ok(())
    }

    fn validate(
        tree: &Blobtree,
        frame: &[u8],
        width: u32,
        height: u32,
        roi: Rect,
        workspace: &Workspace,
    ) -> BlobResult<()> {
        if width != workspace.width() || height != workspace.height() {
            return Err(BlobError::dimension_mismatch(
                workspace.width(),
                workspace.height(),
                format!("frame of {width}x{height}"),
            ));
        }
        workspace.check_frame(frame.len())?;

        let right = roi.x as u64 + roi.width as u64;
        let bottom = roi.y as u64 + roi.height as u64;
        if right > width as u64 || bottom > height as u64 {
            return Err(BlobError::InvalidRoi {
                x: roi.x,
                y: roi.y,
                width: roi.width,
                height: roi.height,
                image_width: width,
                image_height: height,
            });
        }

        let grid = tree.grid();
        if grid.width == 0 || grid.height == 0 {
            return Err(BlobError::InvalidGrid {
                width: grid.width,
                height: grid.height,
            });
        }
        Ok(())
    }

    /// Raster pass. Returns the number of provisional ids handed out.
    fn label(
        frame: &[u8],
        width: u32,
        xs: &[u32],
        ys: &[u32],
        depth_map: &DepthMap,
        ws: &mut Workspace,
    ) -> u32 {
        let stride = width as usize;
        let mut next_id: u32 = 0;

        for (row_index, &y) in ys.iter().enumerate() {
            let row = y as usize * stride;
            let up_row = row_index.checked_sub(1).map(|i| ys[i] as usize * stride);
            let mut left: Option<(u32, u8)> = None;

            for &x in xs {
                let p = row + x as usize;
                let level = depth_map.level(frame[p]);
                let up = up_row.map(|r| {
                    let id = ws.ids[r + x as usize];
                    (id, ws.id_levels[id as usize])
                });

                let same_left = left.filter(|&(_, l)| l == level).map(|(id, _)| id);
                let same_up = up.filter(|&(_, l)| l == level).map(|(id, _)| id);
                let id = match (same_left, same_up) {
                    (Some(l), Some(u)) => {
                        if l != u {
                            ws.union(l, u);
                        }
                        l
                    }
                    (Some(l), None) => l,
                    (None, Some(u)) => u,
                    (None, None) => {
                        next_id += 1;
                        ws.comp_same[next_id as usize] = next_id;
                        ws.id_levels[next_id as usize] = level;
                        next_id
                    }
                };
                ws.ids[p] = id;

                if let Some((left_id, left_level)) = left {
                    if left_level != level {
                        ws.edges.push((left_id, id));
                    }
                }
                if let Some((up_id, up_level)) = up {
                    if up_level != level {
                        ws.edges.push((up_id, id));
                    }
                }
                left = Some((id, level));
            }
        }
        next_id
    }

    /// Collapses union-find classes into zones and measures them.
    /// Leaves `real_ids_inv` holding provisional id -> zone index.
    fn compact_zones(ws: &mut Workspace, s: &mut BuildScratch, width: u32, xs: &[u32], ys: &[u32]) {
        for id in 1..=ws.provisional_count {
            let root = ws.find(id);
            let zone = if root == id {
                let zone = s.zone_level.len() as u32;
                s.zone_level.push(ws.id_levels[id as usize]);
                zone
            } else {
                ws.real_ids_inv[root as usize]
            };
            ws.real_ids_inv[id as usize] = zone;
        }

        let zones = s.zone_level.len();
        s.zone_area.resize(zones, 0);
        s.zone_roi.resize(zones, Rect::default());
        let stride = width as usize;
        for &y in ys {
            for &x in xs {
                let id = ws.ids[y as usize * stride + x as usize];
                let z = ws.real_ids_inv[id as usize] as usize;
                s.zone_area[z] += 1;
                s.zone_roi[z] = s.zone_roi[z].union(&Rect::new(x, y, 1, 1));
            }
        }

        // Zone adjacency in compressed rows. Duplicated edges are harmless.
        s.adj_start.resize(zones + 1, 0);
        for &(a, b) in &ws.edges {
            let za = ws.real_ids_inv[a as usize] as usize;
            let zb = ws.real_ids_inv[b as usize] as usize;
            s.adj_start[za + 1] += 1;
            s.adj_start[zb + 1] += 1;
        }
        for z in 0..zones {
            s.adj_start[z + 1] += s.adj_start[z];
        }
        s.adj.resize(s.adj_start[zones] as usize, 0);
        s.adj_fill.extend_from_slice(&s.adj_start[..zones]);
        for &(a, b) in &ws.edges {
            let za = ws.real_ids_inv[a as usize];
            let zb = ws.real_ids_inv[b as usize];
            s.adj[s.adj_fill[za as usize] as usize] = zb;
            s.adj_fill[za as usize] += 1;
            s.adj[s.adj_fill[zb as usize] as usize] = za;
            s.adj_fill[zb as usize] += 1;
        }
    }

    /// Builds the level hierarchy over the zones, deepest level first.
    fn stack_levels(s: &mut BuildScratch) {
        let zones = s.zone_level.len();

        // Counting sort by level, descending, stable in zone index.
        let mut counts = [0u32; 256];
        for &level in &s.zone_level {
            counts[level as usize] += 1;
        }
        let mut fill = [0u32; 256];
        let mut acc = 0;
        for level in (0..256).rev() {
            fill[level] = acc;
            acc += counts[level];
        }
        s.order.resize(zones, 0);
        for z in 0..zones {
            let level = s.zone_level[z] as usize;
            s.order[fill[level] as usize] = z as u32;
            fill[level] += 1;
        }

        s.comp.extend(0..zones as u32);
        s.top.resize(zones, NONE);
        s.processed.resize(zones, false);
        s.zone_node.resize(zones, NONE);

        let mut start = 0;
        while start < zones {
            let level = s.zone_level[s.order[start] as usize];
            let mut end = start;
            while end < zones && s.zone_level[s.order[end] as usize] == level {
                end += 1;
            }

            // Deeper regions touching this level, captured before any merge.
            s.pending.clear();
            for i in start..end {
                let z = s.order[i];
                for k in s.adj_start[z as usize]..s.adj_start[z as usize + 1] {
                    let n = s.adj[k as usize];
                    if s.processed[n as usize] {
                        let root = find_root(&mut s.comp, n);
                        s.pending.push((z, s.top[root as usize]));
                    }
                }
            }

            for i in start..end {
                let z = s.order[i];
                s.processed[z as usize] = true;
                for k in s.adj_start[z as usize]..s.adj_start[z as usize + 1] {
                    let n = s.adj[k as usize];
                    if s.processed[n as usize] {
                        union_roots(&mut s.comp, z, n);
                    }
                }
            }

            for i in start..end {
                let z = s.order[i];
                let root = find_root(&mut s.comp, z) as usize;
                let top = s.top[root];
                let node = if top != NONE && s.nodes[top as usize].level == level {
                    top
                } else {
                    let node = s.nodes.len() as u32;
                    s.nodes.push(PendingNode {
                        level,
                        area: 0,
                        roi: Rect::default(),
                        parent: NONE,
                        anchor: z,
                    });
                    s.top[root] = node;
                    node
                };
                let pending = &mut s.nodes[node as usize];
                pending.area += s.zone_area[z as usize];
                pending.roi = pending.roi.union(&s.zone_roi[z as usize]);
                pending.anchor = pending.anchor.min(z);
                s.zone_node[z as usize] = node;
            }

            for k in 0..s.pending.len() {
                let (z, child) = s.pending[k];
                let parent = s.zone_node[z as usize];
                if child == NONE || child == parent || s.nodes[child as usize].parent != NONE {
                    continue;
                }
                s.nodes[child as usize].parent = parent;
                let (area, roi) = (s.nodes[child as usize].area, s.nodes[child as usize].roi);
                let p = &mut s.nodes[parent as usize];
                p.area += area;
                p.roi = p.roi.union(&roi);
            }

            start = end;
        }
    }

    /// Writes the hierarchy into the tree arena in pre-order and points every
    /// provisional id at its final node id.
    fn write_arena(tree: &mut Blobtree, ws: &mut Workspace, s: &mut BuildScratch) {
        let count = s.nodes.len();

        for (i, node) in s.nodes.iter().enumerate() {
            if node.parent != NONE {
                s.links.push((node.parent, node.anchor, i as u32));
            }
        }
        s.links.sort_unstable();
        s.child_start.resize(count + 1, 0);
        for &(parent, _, _) in &s.links {
            s.child_start[parent as usize + 1] += 1;
        }
        for i in 0..count {
            s.child_start[i + 1] += s.child_start[i];
        }

        let mut roots: Vec<(u32, u32)> = s
            .nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| n.parent == NONE)
            .map(|(i, n)| (n.anchor, i as u32))
            .collect();
        roots.sort_unstable();

        s.new_id.resize(count, 0);
        let arena = tree.nodes_mut();
        for &(_, root) in roots.iter().rev() {
            s.stack.push((root, SENTINEL_ID, 0));
        }
        while let Some((temp, parent, depth)) = s.stack.pop() {
            let id = arena.len();
            s.new_id[temp as usize] = id as u32;
            let pending = s.nodes[temp as usize];
            let (first, last) = (
                s.child_start[temp as usize] as usize,
                s.child_start[temp as usize + 1] as usize,
            );
            arena.push(Node {
                blob: Blob {
                    id: id as u32,
                    area: pending.area,
                    roi: pending.roi,
                    depth_level: pending.level,
                },
                parent: (parent != SENTINEL_ID).then_some(parent),
                first_child: None,
                next_sibling: None,
                child_count: (last - first) as u32,
                tree_depth: depth,
            });
            for k in (first..last).rev() {
                s.stack.push((s.links[k].2, id, depth + 1));
            }
        }

        // Sibling links, in anchor order.
        for temp in 0..count {
            let first = s.child_start[temp] as usize;
            let last = s.child_start[temp + 1] as usize;
            if first == last {
                continue;
            }
            let parent_id = s.new_id[temp] as usize;
            arena[parent_id].first_child = Some(s.new_id[s.links[first].2 as usize] as usize);
            for k in first..last - 1 {
                let current = s.new_id[s.links[k].2 as usize] as usize;
                arena[current].next_sibling = Some(s.new_id[s.links[k + 1].2 as usize] as usize);
            }
        }
        for pair in roots.windows(2) {
            let current = s.new_id[pair[0].1 as usize] as usize;
            arena[current].next_sibling = Some(s.new_id[pair[1].1 as usize] as usize);
        }

        ws.real_ids_inv[0] = SENTINEL_ID as u32;
        for id in 1..=ws.provisional_count as usize {
            let zone = ws.real_ids_inv[id] as usize;
            ws.real_ids_inv[id] = s.new_id[s.zone_node[zone] as usize];
        }
        ws.node_count = arena.len() as u32;
    }
}
