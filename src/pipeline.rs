// THEORY:
// The `pipeline` module is the top-level API of the engine. It owns the whole
// per-stream state as one context object (classification map, labeling
// workspace, blob forest, tracker) and runs the layers in order for each frame:
//
//   pixels -> classification -> forest builder -> filter engine -> tracker
//
// Nothing here is global; two pipelines never share memory. A pipeline serves
// one image size. When the stream changes size, `recreate` swaps in a fresh
// workspace and forgets all tracks, since identities do not carry across
// resolutions.

use crate::core_modules::blob::{Blob, Grid, Rect};
use crate::core_modules::blob_detector::blob_detector;
use crate::core_modules::blobtree::Blobtree;
use crate::core_modules::depth_map::{Classification, DepthMap};
use crate::core_modules::filter::{self, FilterConfig, NodeFilter};
use crate::core_modules::tracker::{Tracker, TrackerConfig};
use crate::core_modules::workspace::{ResetPolicy, Workspace};
use crate::error::BlobResult;
use serde::{Deserialize, Serialize};
use tracing::debug;

// Re-export key data structures for the public API.
pub use crate::core_modules::tracker::{Track, TrackFilter, TrackState};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub image_width: u32,
    pub image_height: u32,
    pub classification: Classification,
    pub grid: Grid,
    /// Scanned area; the whole image when `None`.
    pub roi: Option<Rect>,
    pub reset_policy: ResetPolicy,
    pub filter: FilterConfig,
    pub tracker: TrackerConfig,
}

impl PipelineConfig {
    pub fn new(image_width: u32, image_height: u32) -> Self {
        Self {
            image_width,
            image_height,
            classification: Classification::default(),
            grid: Grid::default(),
            roi: None,
            reset_policy: ResetPolicy::default(),
            // The root is the background, never something to track.
            filter: FilterConfig::default().with_tree_depth(1, u32::MAX),
            tracker: TrackerConfig::default(),
        }
    }

    pub fn effective_roi(&self) -> Rect {
        self.roi
            .unwrap_or_else(|| Rect::new(0, 0, self.image_width, self.image_height))
    }
}

/// Summary of one processed frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameReport {
    pub frame_id: u64,
    /// Nodes in the forest, filtered or not.
    pub blob_count: usize,
    /// Nodes that passed the filters and were handed to the tracker.
    pub detection_count: usize,
    pub active_tracks: usize,
    pub pending_tracks: usize,
    pub released_tracks: usize,
}

pub struct BlobPipeline {
    config: PipelineConfig,
    depth_map: DepthMap,
    workspace: Workspace,
    tree: Blobtree,
    tracker: Tracker,
    detections: Vec<Blob>,
}

impl BlobPipeline {
    pub fn new(config: PipelineConfig) -> BlobResult<Self> {
        let depth_map = DepthMap::from_classification(&config.classification)?;
        let workspace = Workspace::new(config.image_width, config.image_height, config.reset_policy)?;
        let mut tree = Blobtree::with_grid(config.grid);
        tree.set_filter(config.filter.clone());
        let tracker = Tracker::new(config.tracker.clone());
        Ok(Self {
            config,
            depth_map,
            workspace,
            tree,
            tracker,
            detections: Vec::new(),
        })
    }

    /// Runs every layer on one row-major grayscale frame.
    pub fn process_frame(&mut self, frame: &[u8]) -> BlobResult<FrameReport> {
        self.workspace.check_frame(frame.len())?;
        let (width, height) = (self.config.image_width, self.config.image_height);
        let roi = self.config.effective_roi();

        // Stage 1: Region forest
        match self.config.classification {
            Classification::Threshold(thresh) => blob_detector::find_blobs_threshold(
                &mut self.tree,
                frame,
                width,
                height,
                roi,
                thresh,
                &mut self.workspace,
            )?,
            _ => blob_detector::find_blobs_depth(
                &mut self.tree,
                frame,
                width,
                height,
                roi,
                &self.depth_map,
                &mut self.workspace,
            )?,
        }

        // Stage 2: Filtered view
        self.detections = self.refilter()?;

        // Stage 3: Identity over time
        self.tracker.update(&self.detections);

        let report = FrameReport {
            frame_id: self.tracker.frame_id(),
            blob_count: self.tree.len(),
            detection_count: self.detections.len(),
            active_tracks: self.tracker.active_count(),
            pending_tracks: self.tracker.pending_count(),
            released_tracks: self.tracker.filtered_tracks(TrackFilter::UP).len(),
        };
        debug!(?report, "frame processed");
        Ok(report)
    }

    /// Re-applies the filters to the current forest without rebuilding it or
    /// touching the tracker. Returns the blobs that pass.
    pub fn refilter(&mut self) -> BlobResult<Vec<Blob>> {
        filter::filter_blob_ids(&self.tree, &mut self.workspace)?;
        let passing = filter::passing_nodes(&self.tree)?;
        Ok(passing
            .into_iter()
            .filter_map(|id| self.tree.blob(id).copied())
            .collect())
    }

    /// Replaces the workspace for a new image size and drops all tracks.
    pub fn recreate(&mut self, image_width: u32, image_height: u32) -> BlobResult<()> {
        let workspace = Workspace::new(image_width, image_height, self.config.reset_policy)?;
        self.workspace = workspace;
        self.config.image_width = image_width;
        self.config.image_height = image_height;
        if let Some(roi) = self.config.roi {
            if roi.right() > image_width || roi.bottom() > image_height {
                self.config.roi = None;
            }
        }
        self.tree.clear();
        self.tracker.clear();
        self.detections.clear();
        Ok(())
    }

    pub fn set_classification(&mut self, classification: Classification) -> BlobResult<()> {
        self.depth_map = DepthMap::from_classification(&classification)?;
        self.config.classification = classification;
        Ok(())
    }

    pub fn set_grid(&mut self, grid: Grid) {
        self.tree.set_grid(grid);
        self.config.grid = grid;
    }

    pub fn set_roi(&mut self, roi: Option<Rect>) {
        self.config.roi = roi;
    }

    pub fn set_filter(&mut self, filter: FilterConfig) {
        self.tree.set_filter(filter.clone());
        self.config.filter = filter;
    }

    pub fn set_custom_filter(&mut self, custom: Option<Box<dyn NodeFilter>>) {
        self.tree.set_custom_filter(custom);
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn tree(&self) -> &Blobtree {
        &self.tree
    }

    /// Mutable access for the stateful `first()`/`next()` traversal.
    pub fn tree_mut(&mut self) -> &mut Blobtree {
        &mut self.tree
    }

    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    pub fn tracker(&self) -> &Tracker {
        &self.tracker
    }

    pub fn tracker_mut(&mut self) -> &mut Tracker {
        &mut self.tracker
    }

    /// Blobs handed to the tracker by the last frame.
    pub fn detections(&self) -> &[Blob] {
        &self.detections
    }

    pub fn get_filtered_tracks(&self, filter: TrackFilter) -> Vec<&Track> {
        self.tracker.filtered_tracks(filter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BlobError;

    fn square_frame(width: u32, height: u32, x0: u32, y0: u32, side: u32) -> Vec<u8> {
        let mut frame = vec![10u8; (width * height) as usize];
        for y in y0..y0 + side {
            for x in x0..x0 + side {
                frame[(y * width + x) as usize] = 220;
            }
        }
        frame
    }

    #[test]
    fn moving_square_keeps_its_hand_id() {
        let mut config = PipelineConfig::new(40, 30);
        config.tracker.minimal_frames_till_active = 2;
        let mut pipeline = BlobPipeline::new(config).unwrap();

        let first = pipeline.process_frame(&square_frame(40, 30, 5, 5, 6)).unwrap();
        assert_eq!(first.blob_count, 2);
        assert_eq!(first.detection_count, 1);
        assert_eq!(first.pending_tracks, 1);

        let second = pipeline.process_frame(&square_frame(40, 30, 8, 6, 6)).unwrap();
        assert_eq!(second.active_tracks, 1);
        let tracks = pipeline.get_filtered_tracks(TrackFilter::ALL_ACTIVE);
        assert_eq!(tracks[0].hand_id, 0);
        assert_eq!(tracks[0].state, TrackState::Down);
        assert_eq!(tracks[0].velocity, (3.0, 1.0));
    }

    #[test]
    fn wrong_frame_size_fails_fast() {
        let mut pipeline = BlobPipeline::new(PipelineConfig::new(8, 8)).unwrap();
        let err = pipeline.process_frame(&[0u8; 10]).unwrap_err();
        assert!(matches!(err, BlobError::DimensionMismatch { .. }));
        assert_eq!(pipeline.tracker().frame_id(), 0);
    }

    #[test]
    fn recreate_switches_image_size() {
        let mut pipeline = BlobPipeline::new(PipelineConfig::new(8, 8)).unwrap();
        pipeline.process_frame(&square_frame(8, 8, 2, 2, 3)).unwrap();
        pipeline.recreate(12, 6).unwrap();
        assert!(pipeline.tracker().tracks().is_empty());
        let report = pipeline.process_frame(&square_frame(12, 6, 1, 1, 2)).unwrap();
        assert_eq!(report.detection_count, 1);
        assert_eq!(pipeline.workspace().width(), 12);
    }

    #[test]
    fn staircase_classification_builds_nested_detections() {
        let mut config = PipelineConfig::new(10, 10);
        config.classification = Classification::Staircase {
            threshold: 60,
            step: 60,
        };
        let mut pipeline = BlobPipeline::new(config).unwrap();
        let mut frame = square_frame(10, 10, 2, 2, 6);
        for y in 4..6 {
            for x in 4..6 {
                frame[y * 10 + x] = 250;
            }
        }
        // 220 -> level 3, 250 -> level 4.
        let report = pipeline.process_frame(&frame).unwrap();
        assert_eq!(report.blob_count, 3);
        assert_eq!(report.detection_count, 2);
        let levels: Vec<u8> = pipeline.detections().iter().map(|b| b.depth_level).collect();
        assert_eq!(levels, vec![3, 4]);
    }

    #[test]
    fn refilter_applies_new_bounds_to_current_forest() {
        let mut pipeline = BlobPipeline::new(PipelineConfig::new(20, 20)).unwrap();
        let mut frame = square_frame(20, 20, 1, 1, 2);
        for y in 10..16 {
            for x in 10..16 {
                frame[y * 20 + x] = 200;
            }
        }
        pipeline.process_frame(&frame).unwrap();
        assert_eq!(pipeline.detections().len(), 2);

        pipeline.set_filter(
            FilterConfig::default()
                .with_tree_depth(1, u32::MAX)
                .with_area(10, u32::MAX),
        );
        let kept = pipeline.refilter().unwrap();
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].area, 36);
        assert_eq!(pipeline.workspace().filtered_id_at(1, 1), Some(0));
    }
}
