//! The JSON envelope wrapped around every API payload.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Response, StatusCode};

/// Structured result: `{success, data, errors, warnings, timestamp}`.
///
/// `ApiResult<()>` is the data-less form used for commands and error paths;
/// its `data` field is omitted from the JSON.
///
/// # Examples
///
/// ```
/// use waypoint::http::{ApiResult, StatusCode};
///
/// let ok = ApiResult::ok(vec![1, 2, 3]);
/// assert!(ok.success);
/// assert_eq!(ok.to_response().status(), StatusCode::Ok);
///
/// let failed = ApiResult::<()>::fail("pawn not found");
/// assert_eq!(failed.errors, vec!["pawn not found".to_owned()]);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiResult<T> {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(default)]
    pub errors: Vec<String>,
    #[serde(default)]
    pub warnings: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

impl<T> ApiResult<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            errors: Vec::new(),
            warnings: Vec::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn fail(error: impl Into<String>) -> Self {
        Self::fail_many([error.into()])
    }

    /// A failure carrying several errors, e.g. validation messages.
    pub fn fail_many(errors: impl IntoIterator<Item = String>) -> Self {
        Self {
            success: false,
            data: None,
            errors: errors.into_iter().collect(),
            warnings: Vec::new(),
            timestamp: Utc::now(),
        }
    }

    /// A success that still carries warnings.
    pub fn partial(data: T, warnings: impl IntoIterator<Item = String>) -> Self {
        Self {
            warnings: warnings.into_iter().collect(),
            ..Self::ok(data)
        }
    }
}

impl ApiResult<()> {
    /// Success without a payload.
    pub fn done() -> Self {
        Self {
            data: None,
            ..Self::ok(())
        }
    }
}

impl<T: Serialize> ApiResult<T> {
    /// Writes the envelope with an explicit status, for callers that decide
    /// 400/401/404 themselves.
    pub fn into_response(&self, status: StatusCode) -> Response {
        Response::json(status, self)
    }

    /// Generic mapping: success → `200`, failure → `500`.
    pub fn to_response(&self) -> Response {
        let status = if self.success {
            StatusCode::Ok
        } else {
            StatusCode::InternalServerError
        };
        self.into_response(status)
    }
}
