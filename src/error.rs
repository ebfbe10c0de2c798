//! Error taxonomy for the capture and annotation path

use thiserror::Error;

use crate::capture::CaptureError;

/// Errors surfaced by [`FrameSource`](crate::capture::FrameSource) and
/// [`AnnotatedFrameProducer`](crate::overlay::AnnotatedFrameProducer)
#[derive(Debug, Error)]
pub enum OverlayError {
    /// The capture device could not be opened or never produced a frame
    #[error("capture device {source_id:?} unavailable: {reason}")]
    DeviceUnavailable {
        source_id: String,
        #[source]
        reason: CaptureError,
    },

    /// A device read failed, or the capture thread is no longer reading
    #[error("frame read failed: {0}")]
    ReadFailed(#[source] CaptureError),

    /// No frame has been published yet, or the latest one is empty
    #[error("no frame available")]
    NoFrameAvailable,

    /// The text recognizer returned an error for this frame
    #[error("text recognition failed: {0:#}")]
    RecognitionFailed(#[source] anyhow::Error),

    /// The annotated frame could not be encoded
    #[error("frame encoding failed: {0}")]
    FrameEncodingError(#[source] image::ImageError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_unavailable_message_names_source() {
        let err = OverlayError::DeviceUnavailable {
            source_id: "/dev/video3".to_string(),
            reason: CaptureError::NotFound("/dev/video3".to_string()),
        };
        let msg = err.to_string();
        assert!(msg.contains("/dev/video3"));
    }

    #[test]
    fn test_recognition_failed_keeps_context() {
        let inner = anyhow::anyhow!("session exploded").context("running detection model");
        let err = OverlayError::RecognitionFailed(inner);
        let msg = err.to_string();
        assert!(msg.contains("running detection model"));
        assert!(msg.contains("session exploded"));
    }

    #[test]
    fn test_read_failed_names_cause() {
        let err = OverlayError::ReadFailed(CaptureError::EndOfStream);
        assert_eq!(err.to_string(), "frame read failed: capture stream ended");
    }
}
