//! Error taxonomy for the rendering pipeline.
//!
//! Allocation, initialization and stale-handle errors are fatal to the frame
//! and unwind to the frame driver. `MissingResource` is recovered by the
//! component that detects it (the actor or light is skipped for the frame).

use thiserror::Error;

use crate::PixelFormat;

/// Errors that can occur while rendering a frame or loading its inputs.
#[derive(Error, Debug)]
pub enum RenderError {
    #[error("Failed to allocate {format} image {width}x{height}: {reason}")]
    Allocation {
        format: PixelFormat,
        width: u32,
        height: u32,
        reason: String,
    },

    #[error("Stage used before initialization: {0}")]
    NotInitialized(&'static str),

    #[error("Missing resource: {0}")]
    MissingResource(String),

    #[error("Render target slot {slot} (generation {generation}) is no longer leased")]
    StaleTarget { slot: u32, generation: u32 },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl RenderError {
    /// Whether the error must abort the current frame.
    ///
    /// Missing assets are skipped locally and never reach the frame driver
    /// as fatal.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, RenderError::MissingResource(_))
    }
}

pub type RenderResult<T> = Result<T, RenderError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_resource_is_not_fatal() {
        assert!(!RenderError::MissingResource("shadow map".into()).is_fatal());
        assert!(RenderError::NotInitialized("shading").is_fatal());
    }

    #[test]
    fn test_allocation_message() {
        let err = RenderError::Allocation {
            format: PixelFormat::R8Unorm,
            width: 4,
            height: 2,
            reason: "budget exceeded".into(),
        };
        assert_eq!(
            err.to_string(),
            "Failed to allocate R8Unorm image 4x2: budget exceeded"
        );
    }
}
