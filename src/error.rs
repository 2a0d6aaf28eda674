use serde::Serialize;

use crate::core::store::StoreError;

/// Detection-stage failures. Terminal for the request; the same image gives the same result,
/// so these are reported and never retried.
#[derive(Debug, thiserror::Error)]
pub enum DetectionError {
    #[error("Invalid image: {0}")]
    InvalidImage(String),

    #[error("No hand detected")]
    NoHandDetected,

    #[error("Hand too small: {ratio:.2} of the image (minimum {min:.2})")]
    HandTooSmall { ratio: f32, min: f32 },

    #[error("Hand is not fully open")]
    HandNotOpen,

    #[error("Back of the hand is facing the camera")]
    BackOfHand,
}

impl DetectionError {
    /// Stable numeric code the UI branches on.
    pub fn code(&self) -> u16 {
        match self {
            DetectionError::InvalidImage(_) => 1000,
            DetectionError::NoHandDetected => 1001,
            DetectionError::HandTooSmall { .. } => 1002,
            DetectionError::HandNotOpen => 1003,
            DetectionError::BackOfHand => 1004,
        }
    }

    pub fn suggestion(&self) -> &'static str {
        match self {
            DetectionError::InvalidImage(_) => {
                "The image could not be read. Check the file path and format."
            }
            DetectionError::NoHandDetected => {
                "No palm found. Keep the whole palm in frame against a plain background."
            }
            DetectionError::HandTooSmall { .. } => {
                "The palm is too small in the picture. Move your hand closer to the camera."
            }
            DetectionError::HandNotOpen => {
                "The hand does not look fully open. Spread your fingers and try again."
            }
            DetectionError::BackOfHand => {
                "The back of the hand was detected. Turn your hand so the palm faces the camera."
            }
        }
    }
}

/// Errors returned by the service operations.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error(transparent)]
    Detection(#[from] DetectionError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Internal error: {0:#}")]
    Internal(#[from] anyhow::Error),
}

impl ServiceError {
    pub fn code(&self) -> u16 {
        match self {
            ServiceError::Detection(e) => e.code(),
            ServiceError::Store(StoreError::NotFound(_)) => 4004,
            ServiceError::Store(StoreError::Validation(_)) => 4022,
            ServiceError::Store(StoreError::Backend(_)) | ServiceError::Internal(_) => 5000,
        }
    }

    pub fn suggestion(&self) -> String {
        match self {
            ServiceError::Detection(e) => e.suggestion().to_string(),
            ServiceError::Store(StoreError::NotFound(id)) => {
                format!("No detection with id {}. Run detection first.", id)
            }
            ServiceError::Store(StoreError::Validation(msg)) => {
                format!("Correction rejected: {}", msg)
            }
            ServiceError::Store(StoreError::Backend(_)) | ServiceError::Internal(_) => {
                "Something went wrong on our side. Please try again.".to_string()
            }
        }
    }

    pub fn to_body(&self) -> ErrorBody {
        ErrorBody {
            error_code: self.code(),
            message: self.to_string(),
            suggestion: self.suggestion(),
        }
    }
}

/// Serializable error shape for the boundary.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    pub error_code: u16,
    pub message: String,
    pub suggestion: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::store::DataId;

    #[test]
    fn test_detection_codes_are_stable() {
        assert_eq!(DetectionError::InvalidImage("x".into()).code(), 1000);
        assert_eq!(DetectionError::NoHandDetected.code(), 1001);
        assert_eq!(DetectionError::HandTooSmall { ratio: 0.1, min: 0.15 }.code(), 1002);
        assert_eq!(DetectionError::HandNotOpen.code(), 1003);
        assert_eq!(DetectionError::BackOfHand.code(), 1004);
        assert!(DetectionError::BackOfHand.suggestion().contains("palm faces the camera"));
    }

    #[test]
    fn test_service_error_body() {
        let err = ServiceError::from(StoreError::NotFound(DataId::new()));
        let body = err.to_body();
        assert_eq!(body.error_code, 4004);
        assert!(body.suggestion.contains("Run detection first"));

        let err = ServiceError::from(DetectionError::HandNotOpen);
        assert_eq!(err.to_body().error_code, 1003);
    }
}
