pub mod blob;
pub mod blob_detector;
pub mod blobtree;
pub mod depth_map;
pub mod filter;
pub mod tracker;
pub mod utils;
pub mod workspace;
