use crate::job::{VALID_DENOISE_VALUES, VALID_TILING_FACTORS};

/// Rejection reasons for an inbound job payload.
///
/// The `Display` text of each variant is the exact message returned to
/// the caller in the `{"error": ...}` result.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("Please provide input")]
    MissingPayload,

    #[error("Invalid JSON format in input")]
    InvalidJson,

    #[error("Input must be a JSON object or a JSON-encoded string")]
    InvalidFormat,

    #[error("Missing '{0}' parameter")]
    MissingField(&'static str),

    #[error("'{0}' must be a string containing a presigned URL")]
    NotAUrl(&'static str),

    #[error("'{field}' must be {expected}")]
    TypeMismatch {
        field: &'static str,
        expected: &'static str,
    },

    #[error("'tiling' must be one of {:?}", VALID_TILING_FACTORS)]
    InvalidTiling,

    #[error("'denoise' must be either '{}' or '{}'", VALID_DENOISE_VALUES[0], VALID_DENOISE_VALUES[1])]
    InvalidDenoise,
}
