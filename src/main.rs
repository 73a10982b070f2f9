//! Example runner: feeds a sequence of grayscale images through the blob
//! pipeline as consecutive frames and prints the forest and the tracks.
//!
//! Usage:
//!   blobtree [OPTIONS] <IMAGES>...

use std::path::PathBuf;

use anyhow::Context;
use blobtree::core_modules::blob::Grid;
use blobtree::core_modules::depth_map::{Classification, DEFAULT_STAIRCASE_STEP, DEFAULT_THRESHOLD};
use blobtree::core_modules::filter::FilterConfig;
use blobtree::core_modules::utils::image_helper::image_helper;
use blobtree::logging::{init_logging, LoggingConfig};
use blobtree::pipeline::{BlobPipeline, PipelineConfig, TrackFilter};
use clap::{Parser, ValueEnum};
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Algorithm {
    /// Background / foreground split
    Thresh,
    /// Nested levels from a staircase classification
    Depth,
}

#[derive(Parser)]
#[command(
    name = "blobtree",
    about = "Hierarchical blob extraction and tracking over grayscale frames",
    version
)]
struct Cli {
    /// Frames, processed in order
    #[arg(required = true)]
    images: Vec<PathBuf>,

    #[arg(long, value_enum, default_value = "depth")]
    algorithm: Algorithm,

    /// Intensity where level 1 starts
    #[arg(long, default_value_t = DEFAULT_THRESHOLD)]
    thresh: u8,

    /// Intensities per level above the threshold (depth algorithm)
    #[arg(long, default_value_t = DEFAULT_STAIRCASE_STEP)]
    step: u8,

    /// Sampling stride in x and y
    #[arg(long, num_args = 2, value_names = ["GX", "GY"], default_values_t = [1, 1])]
    grid: Vec<u32>,

    #[arg(long, default_value_t = 0)]
    area_min: u32,

    #[arg(long, default_value_t = u32::MAX)]
    area_max: u32,

    #[arg(long, default_value_t = 1)]
    tree_depth_min: u32,

    #[arg(long, default_value_t = u32::MAX)]
    tree_depth_max: u32,

    #[arg(long, default_value_t = 0)]
    area_depth_min: u8,

    #[arg(long, default_value_t = u8::MAX)]
    area_depth_max: u8,

    #[arg(long)]
    only_leaves: bool,

    /// Frames a pending track needs before it becomes active
    #[arg(long, default_value_t = 3)]
    min_frames: u32,

    /// Print the forest of every frame
    #[arg(long)]
    print_tree: bool,

    /// Print frame reports and tracks as JSON lines
    #[arg(long)]
    json: bool,

    /// Emit log records as JSON
    #[arg(long)]
    log_json: bool,

    /// Write the coloured filtered id map of each frame into this directory
    #[arg(long)]
    id_map_dir: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn classification(&self) -> Classification {
        match self.algorithm {
            Algorithm::Thresh => Classification::Threshold(self.thresh),
            Algorithm::Depth => Classification::Staircase {
                threshold: self.thresh,
                step: self.step,
            },
        }
    }

    fn filter(&self) -> FilterConfig {
        FilterConfig::default()
            .with_area(self.area_min, self.area_max)
            .with_tree_depth(self.tree_depth_min, self.tree_depth_max)
            .with_area_depth(self.area_depth_min, self.area_depth_max)
            .with_only_leaves(self.only_leaves)
    }

    fn pipeline_config(&self, width: u32, height: u32) -> PipelineConfig {
        let mut config = PipelineConfig::new(width, height);
        config.classification = self.classification();
        config.grid = Grid::new(self.grid[0], self.grid[1]);
        config.filter = self.filter();
        config.tracker.minimal_frames_till_active = self.min_frames;
        config
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "info" };
    init_logging(&LoggingConfig {
        level: log_level.to_string(),
        json: cli.log_json,
    });

    if let Some(dir) = &cli.id_map_dir {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("creating {}", dir.display()))?;
    }

    let mut pipeline: Option<BlobPipeline> = None;
    for (index, path) in cli.images.iter().enumerate() {
        let (frame, width, height) = image_helper::load_luma(path)
            .with_context(|| format!("loading {}", path.display()))?;

        let pipeline = match &mut pipeline {
            Some(p) if p.config().image_width == width && p.config().image_height == height => p,
            Some(p) => {
                info!(width, height, "image size changed, recreating workspace");
                p.recreate(width, height)?;
                p
            }
            slot @ None => slot.insert(BlobPipeline::new(cli.pipeline_config(width, height))?),
        };

        let report = pipeline
            .process_frame(&frame)
            .with_context(|| format!("processing {}", path.display()))?;

        if cli.print_tree {
            println!("{}", pipeline.tree());
        }

        let tracks = pipeline.get_filtered_tracks(TrackFilter::ALL);
        if cli.json {
            println!("{}", serde_json::to_string(&report)?);
            println!("{}", serde_json::to_string(&tracks)?);
        } else {
            println!(
                "{}: {} blobs, {} detections, {} active, {} pending",
                path.display(),
                report.blob_count,
                report.detection_count,
                report.active_tracks,
                report.pending_tracks
            );
            for track in tracks {
                let (x, y) = track.position();
                println!(
                    "  hand {:>2} {:?} at ({x:.1}, {y:.1}) area={} seen={}",
                    track.hand_id, track.state, track.blob.area, track.seen_count
                );
            }
        }

        if let Some(dir) = &cli.id_map_dir {
            let rgb = image_helper::colorize_filtered_ids(pipeline.workspace(), pipeline.tree());
            let out = dir.join(format!("ids_{index:04}.png"));
            image_helper::save_rgb(&out, width, height, &rgb)
                .with_context(|| format!("writing {}", out.display()))?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_output_and_json_logs_are_separate_flags() {
        let cli = Cli::try_parse_from(["blobtree", "--json", "a.png"]).unwrap();
        assert!(cli.json);
        assert!(!cli.log_json);

        let cli = Cli::try_parse_from(["blobtree", "--log-json", "a.png"]).unwrap();
        assert!(!cli.json);
        assert!(cli.log_json);
        assert_eq!(cli.grid, vec![1, 1]);
    }
}
