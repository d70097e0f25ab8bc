//! # Source Module
//!
//! Boundary to the external genealogy service. The crate only needs one
//! capability from it: execute an operation and report success, throttling,
//! or some other failure.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::fmt;

/// Base URL the service uses for every API reference.
pub const API_PREFIX: &str = "https://www.geni.com/api/";

/// Error type and message the service uses to signal throttling.
const THROTTLE_ERROR_TYPE: &str = "ApiException";
const THROTTLE_ERROR_MESSAGE: &str = "Rate limit exceeded.";

/// Failure of a fetch, either reported by the source or by the queue.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchError {
    /// The source asked us to slow down. Retried by the queue.
    RateLimited,
    /// Any other failure, with whatever detail the source supplied.
    Other { detail: Value },
    /// The queue gave up after the configured number of throttled attempts.
    RetriesExhausted { attempts: u32 },
    /// The queue worker is gone.
    Closed,
}

impl FetchError {
    pub fn other(detail: impl Into<Value>) -> Self {
        FetchError::Other {
            detail: detail.into(),
        }
    }
}

impl fmt::Display for FetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchError::RateLimited => write!(f, "rate limited"),
            FetchError::Other { detail } => write!(f, "operation failed: {detail}"),
            FetchError::RetriesExhausted { attempts } => {
                write!(f, "still rate limited after {attempts} attempts")
            }
            FetchError::Closed => write!(f, "request queue closed"),
        }
    }
}

impl std::error::Error for FetchError {}

/// An external fetch capability: `execute(opcode, args) -> result`.
#[async_trait]
pub trait FetchSource: Send + Sync {
    async fn execute(&self, opcode: &str, args: Value) -> Result<Value, FetchError>;
}

/// Interpret a raw service reply. Replies carrying an `error` object are
/// failures; the throttle error becomes [`FetchError::RateLimited`].
pub fn classify_response(response: Value) -> Result<Value, FetchError> {
    let Some(error) = response.get("error") else {
        return Ok(response);
    };
    let is_throttle = error.get("type").and_then(Value::as_str) == Some(THROTTLE_ERROR_TYPE)
        && error.get("message").and_then(Value::as_str) == Some(THROTTLE_ERROR_MESSAGE);
    if is_throttle {
        Err(FetchError::RateLimited)
    } else {
        Err(FetchError::Other {
            detail: error.clone(),
        })
    }
}

/// The operations the tree builder issues.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    /// A profile by its guid.
    Profile { guid: String },
    /// A profile by API reference (as found in union partner lists).
    ProfileByUrl { url: String },
    /// A batch of unions by numeric id.
    Unions { ids: Vec<String> },
}

impl Operation {
    pub fn opcode(&self) -> String {
        match self {
            Operation::Profile { guid } => format!("/profile-g{guid}"),
            Operation::ProfileByUrl { url } => {
                let path = url.strip_prefix(API_PREFIX).unwrap_or(url);
                if path.starts_with('/') {
                    path.to_string()
                } else {
                    format!("/{path}")
                }
            }
            Operation::Unions { .. } => "/union".to_string(),
        }
    }

    pub fn args(&self) -> Value {
        match self {
            Operation::Profile { .. } | Operation::ProfileByUrl { .. } => json!([]),
            Operation::Unions { ids } => json!({ "ids": ids }),
        }
    }
}
