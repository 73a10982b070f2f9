//! Error types for blob extraction, filtering and tracking.

use crate::core_modules::blob::NodeId;

/// Top-level error type for the blob engine.
#[derive(Debug, thiserror::Error)]
pub enum BlobError {
    #[error("Invalid dimensions: {width}x{height}")]
    InvalidDimensions { width: u32, height: u32 },

    #[error("Unable to allocate workspace for {width}x{height} ({slots} slots)")]
    Allocation { width: u32, height: u32, slots: usize },

    #[error("Dimension mismatch: expected {expected_width}x{expected_height}, got {message}")]
    DimensionMismatch {
        expected_width: u32,
        expected_height: u32,
        message: String,
    },

    #[error("Region of interest {x},{y} {width}x{height} exceeds image {image_width}x{image_height}")]
    InvalidRoi {
        x: u32,
        y: u32,
        width: u32,
        height: u32,
        image_width: u32,
        image_height: u32,
    },

    #[error("Invalid grid stride {width}x{height}")]
    InvalidGrid { width: u32, height: u32 },

    #[error("Level table must have 256 entries, got {len}")]
    InvalidLevelTable { len: usize },

    #[error("Lazy reset sentinel {sentinel} collides with provisional ids of a {pixels}-pixel image")]
    InvalidSentinel { sentinel: u32, pixels: usize },

    #[error("Workspace no longer holds the labels of this tree")]
    StaleWorkspace,

    #[error("Custom filter failed on node {node}: {source}")]
    Predicate {
        node: NodeId,
        #[source]
        source: anyhow::Error,
    },

    #[error(transparent)]
    Image(#[from] image::ImageError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Result type alias using BlobError.
pub type BlobResult<T> = Result<T, BlobError>;

impl BlobError {
    pub fn dimension_mismatch(width: u32, height: u32, msg: impl Into<String>) -> Self {
        Self::DimensionMismatch {
            expected_width: width,
            expected_height: height,
            message: msg.into(),
        }
    }

    /// True for errors that leave the caller's workspace unusable until it is recreated.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Allocation { .. } | Self::InvalidDimensions { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dimension_mismatch_message() {
        let err = BlobError::dimension_mismatch(20, 10, "buffer of 150 bytes");
        assert_eq!(
            err.to_string(),
            "Dimension mismatch: expected 20x10, got buffer of 150 bytes"
        );
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_predicate_error_keeps_source() {
        let err = BlobError::Predicate {
            node: 3,
            source: anyhow::anyhow!("boom"),
        };
        assert!(err.to_string().contains("node 3"));
        assert!(std::error::Error::source(&err).is_some());
    }
}
