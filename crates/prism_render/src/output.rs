//! The image a frame hands back to the caller.

use prism_core::DebugBuffer;

use crate::render_targets::RenderTarget;

/// Which single image the caller sees this frame.
///
/// `Empty` means "keep going" inside the traversal; any other value
/// short-circuits it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Output {
    #[default]
    Empty,
    /// The composited accumulator
    Final(RenderTarget),
    /// An intermediate buffer selected by the debug view
    Buffer {
        buffer: DebugBuffer,
        target: RenderTarget,
    },
}

impl Output {
    pub fn is_empty(&self) -> bool {
        matches!(self, Output::Empty)
    }

    pub fn target(&self) -> Option<RenderTarget> {
        match self {
            Output::Empty => None,
            Output::Final(target) => Some(*target),
            Output::Buffer { target, .. } => Some(*target),
        }
    }

    /// Name of the selected buffer (`Final` for the composite).
    pub fn buffer(&self) -> Option<DebugBuffer> {
        match self {
            Output::Empty => None,
            Output::Final(_) => Some(DebugBuffer::Final),
            Output::Buffer { buffer, .. } => Some(*buffer),
        }
    }
}
