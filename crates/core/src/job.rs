//! Job payload parsing and validation.
//!
//! The payload arrives from the host runtime as untrusted JSON, either as
//! an object or as a JSON-encoded string. [`validate_input`] turns it into
//! a [`JobRequest`] without touching the network or the filesystem.

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::error::ValidationError;

// ---------------------------------------------------------------------------
// Field names and allowed values
// ---------------------------------------------------------------------------

/// Presigned URL of the input asset (optional).
pub const FIELD_INPUT: &str = "input";
/// Resumable-upload endpoint receiving the outputs (required).
pub const FIELD_OUTPUT: &str = "output";
/// Generation parameters mapping.
pub const FIELD_PARAMS: &str = "params";
/// Recipe embedded directly in the payload.
pub const FIELD_WORKFLOW: &str = "workflow";
/// Tiling factor key inside `params`.
pub const FIELD_TILING: &str = "tiling";
/// Denoise strength key inside `params`.
pub const FIELD_DENOISE: &str = "denoise";

/// Accepted tiling factors.
pub const VALID_TILING_FACTORS: [u8; 4] = [2, 3, 4, 5];

/// Accepted denoise strengths, string-encoded as they appear on the wire.
pub const VALID_DENOISE_VALUES: [&str; 2] = ["0.4", "0.6"];

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Envelope handed to the worker by the host runtime.
#[derive(Debug, Clone, Deserialize)]
pub struct JobEnvelope {
    /// Host-assigned job identifier.
    #[serde(default = "generate_job_id")]
    pub id: String,
    /// Raw, unvalidated payload.
    #[serde(default)]
    pub input: Option<Value>,
}

fn generate_job_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Whether the deployment requires a `params` mapping on every job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamsPolicy {
    /// `params` may be omitted; it is still validated when present.
    Optional,
    /// `params` must be present (recipe is selected from it).
    Required,
}

/// Denoise strength accepted by the parameterized recipes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Denoise {
    Low,
    High,
}

impl Denoise {
    /// Wire representation (`"0.4"` or `"0.6"`).
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => VALID_DENOISE_VALUES[0],
            Self::High => VALID_DENOISE_VALUES[1],
        }
    }

    fn parse(raw: &str) -> Option<Self> {
        match raw {
            "0.4" => Some(Self::Low),
            "0.6" => Some(Self::High),
            _ => None,
        }
    }
}

/// Validated generation parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GenerationParams {
    pub tiling: u8,
    pub denoise: Denoise,
}

/// A validated job payload.
#[derive(Debug, Clone, PartialEq)]
pub struct JobRequest {
    /// Presigned URL of the asset to stage, if any.
    pub source_asset_url: Option<String>,
    /// tus creation endpoint for the outputs.
    pub destination_url: String,
    /// Recipe-selection parameters.
    pub params: Option<GenerationParams>,
    /// Recipe supplied inline; takes precedence over file-based recipes.
    pub workflow: Option<Map<String, Value>>,
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Parse and validate a raw job payload.
///
/// Accepts a JSON object or a string containing one. `null` and an
/// absent payload are both rejected with [`ValidationError::MissingPayload`].
pub fn validate_input(
    raw: Option<&Value>,
    policy: ParamsPolicy,
) -> Result<JobRequest, ValidationError> {
    let payload = match raw {
        None | Some(Value::Null) => return Err(ValidationError::MissingPayload),
        Some(Value::String(text)) => {
            let parsed: Value =
                serde_json::from_str(text).map_err(|_| ValidationError::InvalidJson)?;
            match parsed {
                Value::Object(map) => map,
                _ => return Err(ValidationError::InvalidFormat),
            }
        }
        Some(Value::Object(map)) => map.clone(),
        Some(_) => return Err(ValidationError::InvalidFormat),
    };

    let source_asset_url = match payload.get(FIELD_INPUT) {
        None | Some(Value::Null) => None,
        Some(Value::String(url)) => Some(url.clone()),
        Some(_) => return Err(ValidationError::NotAUrl(FIELD_INPUT)),
    };

    let destination_url = match payload.get(FIELD_OUTPUT) {
        Some(Value::String(url)) => url.clone(),
        _ => return Err(ValidationError::NotAUrl(FIELD_OUTPUT)),
    };

    let workflow = match payload.get(FIELD_WORKFLOW) {
        None | Some(Value::Null) => None,
        Some(Value::Object(map)) => Some(map.clone()),
        Some(_) => {
            return Err(ValidationError::TypeMismatch {
                field: FIELD_WORKFLOW,
                expected: "a JSON object",
            })
        }
    };

    let params = match payload.get(FIELD_PARAMS) {
        None | Some(Value::Null) => {
            if policy == ParamsPolicy::Required {
                return Err(ValidationError::MissingField(FIELD_PARAMS));
            }
            None
        }
        Some(Value::Object(map)) => Some(validate_params(map)?),
        Some(_) => {
            return Err(ValidationError::TypeMismatch {
                field: FIELD_PARAMS,
                expected: "a JSON object",
            })
        }
    };

    Ok(JobRequest {
        source_asset_url,
        destination_url,
        params,
        workflow,
    })
}

fn validate_params(params: &Map<String, Value>) -> Result<GenerationParams, ValidationError> {
    let tiling = params
        .get(FIELD_TILING)
        .and_then(tiling_factor)
        .ok_or(ValidationError::InvalidTiling)?;

    let denoise = params
        .get(FIELD_DENOISE)
        .and_then(Value::as_str)
        .and_then(Denoise::parse)
        .ok_or(ValidationError::InvalidDenoise)?;

    Ok(GenerationParams { tiling, denoise })
}

/// Integral numbers only; `2` and `2.0` are the same factor.
fn tiling_factor(value: &Value) -> Option<u8> {
    let factor = value.as_f64().filter(|f| f.fract() == 0.0)?;
    VALID_TILING_FACTORS
        .iter()
        .copied()
        .find(|&t| f64::from(t) == factor)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
