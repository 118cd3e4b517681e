//! Handler error classification.
//!
//! [`ClassifiedError::classify`] maps any error a handler returns onto one of
//! four client-facing shapes. The whole `source()` chain is searched for each
//! kind before falling through to the next one, in this order:
//!
//! | Priority | Found in chain   | Variant        | Status              |
//! |---|---|---|---|
//! | 1 | [`FieldErrors`]  | `Validation`   | 400                 |
//! | 2 | [`RequestError`] | `Request`      | the error's own     |
//! | 3 | [`ShutdownError`]| `Shutdown`     | 500                 |
//! | 4 | anything else    | `Unclassified` | 500                 |
//!
//! Validation wins over everything else: it is the one failure the caller can
//! act on.

use std::collections::BTreeMap;
use std::error::Error as StdError;

use http::StatusCode;
use serde::Serialize;

use crate::error::{FieldErrors, RequestError, ShutdownError};

const VALIDATION_MESSAGE: &str = "data validation error";
const INTERNAL_MESSAGE: &str = "Internal Server Error";

/// The classified form of a handler error.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ClassifiedError {
    Validation { fields: BTreeMap<String, String> },
    Request { status: StatusCode, message: String },
    Shutdown { reason: String },
    Unclassified,
}

impl ClassifiedError {
    /// Classifies `err`. Pure: the same error always yields the same variant.
    pub fn classify(err: &(dyn StdError + 'static)) -> Self {
        if let Some(fields) = find::<FieldErrors>(err) {
            return Self::Validation { fields: fields.fields().clone() };
        }
        if let Some(req) = find::<RequestError>(err) {
            return Self::Request { status: req.status(), message: req.message().to_owned() };
        }
        if let Some(shutdown) = find::<ShutdownError>(err) {
            return Self::Shutdown { reason: shutdown.reason().to_owned() };
        }
        Self::Unclassified
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::Validation { .. } => StatusCode::BAD_REQUEST,
            Self::Request { status, .. } => *status,
            Self::Shutdown { .. } | Self::Unclassified => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// The JSON envelope sent to the client. Never carries the text of an
    /// unclassified error.
    pub fn body(&self) -> ErrorResponse {
        match self {
            Self::Validation { fields } => ErrorResponse {
                error: VALIDATION_MESSAGE.to_owned(),
                fields: Some(fields.clone()),
            },
            Self::Request { message, .. } => ErrorResponse::message(message.clone()),
            Self::Shutdown { .. } | Self::Unclassified => ErrorResponse::message(INTERNAL_MESSAGE),
        }
    }

    pub fn is_shutdown(&self) -> bool {
        matches!(self, Self::Shutdown { .. })
    }

    /// Short label for log records.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "validation",
            Self::Request { .. } => "request",
            Self::Shutdown { .. } => "shutdown",
            Self::Unclassified => "unclassified",
        }
    }
}

/// Wire shape of every error response.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fields: Option<BTreeMap<String, String>>,
}

impl ErrorResponse {
    pub fn message(error: impl Into<String>) -> Self {
        Self { error: error.into(), fields: None }
    }

    pub(crate) fn internal() -> Self {
        Self::message(INTERNAL_MESSAGE)
    }
}

fn find<'a, T: StdError + 'static>(err: &'a (dyn StdError + 'static)) -> Option<&'a T> {
    std::iter::successors(Some(err), |&e| e.source()).find_map(|e| e.downcast_ref::<T>())
}
