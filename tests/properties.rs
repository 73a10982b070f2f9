use blobtree::core_modules::blob::{Blob, Grid, Rect};
use blobtree::core_modules::blob_detector::blob_detector::find_blobs_depth;
use blobtree::core_modules::blobtree::Blobtree;
use blobtree::core_modules::depth_map::DepthMap;
use blobtree::core_modules::filter::{filter_blob_ids, passing_nodes, FilterConfig};
use blobtree::core_modules::tracker::{TrackState, Tracker, TrackerConfig};
use blobtree::core_modules::workspace::{ResetPolicy, Workspace};
use proptest::prelude::*;

/// Small frames with few distinct intensities, so regions actually form.
fn frame_strategy() -> impl Strategy<Value = (u32, u32, Vec<u8>)> {
    (1u32..12, 1u32..12).prop_flat_map(|(w, h)| {
        let pixels = (w * h) as usize;
        (
            Just(w),
            Just(h),
            prop::collection::vec(prop::sample::select(vec![0u8, 70, 100, 130, 250]), pixels),
        )
    })
}

fn build(w: u32, h: u32, frame: &[u8], grid: Grid) -> (Blobtree, Workspace) {
    let mut ws = Workspace::new(w, h, ResetPolicy::Eager).unwrap();
    let mut tree = Blobtree::with_grid(grid);
    find_blobs_depth(
        &mut tree,
        frame,
        w,
        h,
        Rect::new(0, 0, w, h),
        &DepthMap::staircase(60, 30),
        &mut ws,
    )
    .unwrap();
    (tree, ws)
}

type Detections = Vec<Vec<(u32, u32)>>;

fn detections_strategy() -> impl Strategy<Value = Detections> {
    prop::collection::vec(prop::collection::vec((0u32..200, 0u32..200), 0..6), 1..15)
}

fn run_tracker(frames: &Detections) -> Vec<Vec<(usize, TrackState)>> {
    let mut tracker = Tracker::new(TrackerConfig {
        minimal_frames_till_active: 2,
        max_missing_duration: 1,
        max_hands: 4,
        ..TrackerConfig::default()
    });
    frames
        .iter()
        .map(|points| {
            let blobs: Vec<Blob> = points
                .iter()
                .map(|&(x, y)| Blob {
                    id: 1,
                    area: 4,
                    roi: Rect::new(x, y, 2, 2),
                    depth_level: 1,
                })
                .collect();
            tracker.update(&blobs);
            tracker.tracks().iter().map(|t| (t.hand_id, t.state)).collect()
        })
        .collect()
}

proptest! {
    #[test]
    fn every_sampled_pixel_resolves_to_a_box_containing_it(
        (w, h, frame) in frame_strategy(),
        gx in 1u32..4,
        gy in 1u32..4,
    ) {
        let (tree, ws) = build(w, h, &frame, Grid::new(gx, gy));
        let xs: Vec<u32> = (0..w).filter(|x| x % gx == 0 || *x == w - 1).collect();
        let ys: Vec<u32> = (0..h).filter(|y| y % gy == 0 || *y == h - 1).collect();
        for &y in &ys {
            for &x in &xs {
                let id = ws.node_id_at(x, y);
                prop_assert!(id.is_some());
                let blob = tree.blob(id.unwrap()).unwrap();
                prop_assert!(blob.roi.contains_point(x, y));
                prop_assert_eq!(blob.depth_level, DepthMap::staircase(60, 30).level(frame[(y * w + x) as usize]));
            }
        }
    }

    #[test]
    fn children_are_deeper_and_inside_their_parent((w, h, frame) in frame_strategy()) {
        let (tree, _) = build(w, h, &frame, Grid::default());
        prop_assert!(!tree.is_empty());
        let mut area_sum = 0;
        for node in tree.iter() {
            match node.parent {
                Some(parent) => {
                    let p = tree.node(parent).unwrap();
                    prop_assert!(node.blob.depth_level > p.blob.depth_level);
                    prop_assert!(p.blob.roi.contains_rect(&node.blob.roi));
                    prop_assert!(node.id() > parent);
                    prop_assert_eq!(node.tree_depth, p.tree_depth + 1);
                }
                None => area_sum += node.blob.area,
            }
        }
        prop_assert_eq!(area_sum, w * h);
    }

    #[test]
    fn filtering_twice_gives_the_same_collapse_map(
        (w, h, frame) in frame_strategy(),
        area_min in 0u32..20,
        only_leaves in any::<bool>(),
    ) {
        let (mut tree, mut ws) = build(w, h, &frame, Grid::default());
        tree.set_filter(FilterConfig::default().with_area(area_min, u32::MAX).with_only_leaves(only_leaves));
        filter_blob_ids(&tree, &mut ws).unwrap();
        let first = ws.blob_id_filtered().to_vec();
        filter_blob_ids(&tree, &mut ws).unwrap();
        prop_assert_eq!(first, ws.blob_id_filtered().to_vec());
    }

    #[test]
    fn raising_area_min_never_admits_more_nodes(
        (w, h, frame) in frame_strategy(),
        low in 0u32..30,
        raise in 0u32..30,
    ) {
        let (mut tree, _) = build(w, h, &frame, Grid::default());
        tree.set_filter(FilterConfig::default().with_area(low, u32::MAX));
        let before = passing_nodes(&tree).unwrap().len();
        tree.set_filter(FilterConfig::default().with_area(low + raise, u32::MAX));
        let after = passing_nodes(&tree).unwrap().len();
        prop_assert!(after <= before);
    }

    #[test]
    fn tracker_is_deterministic(frames in detections_strategy()) {
        prop_assert_eq!(run_tracker(&frames), run_tracker(&frames));
    }

    #[test]
    fn hand_ids_stay_unique_and_bounded(frames in detections_strategy()) {
        for snapshot in run_tracker(&frames) {
            let mut ids: Vec<usize> = snapshot.iter().map(|(id, _)| *id).collect();
            prop_assert!(ids.iter().all(|&id| id < 4));
            let len = ids.len();
            ids.dedup();
            prop_assert_eq!(ids.len(), len);
        }
    }
}
