//! Boundary error: the shape a failed request would be reported in.
//!
//! An [`AppError`] pairs a status code with a user-facing message. The underlying
//! cause is kept as the error source for logs and is never part of the message.

use crate::services::UserError;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::error::Error as StdError;
use thiserror::Error;

pub const BAD_REQUEST: u16 = 400;
pub const NOT_FOUND: u16 = 404;
pub const INTERNAL: u16 = 500;

type BoxError = Box<dyn StdError + Send + Sync + 'static>;

#[derive(Debug, Error)]
#[error("{message}")]
pub struct AppError {
    status: u16,
    message: String,
    #[source]
    source: Option<BoxError>,
    context: BTreeMap<String, Value>,
}

impl AppError {
    pub fn new(status: u16, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            source: None,
            context: BTreeMap::new(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(BAD_REQUEST, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(NOT_FOUND, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(INTERNAL, message)
    }

    pub fn with_source(mut self, source: impl Into<BoxError>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    pub fn status_code(&self) -> u16 {
        self.status
    }

    pub fn user_message(&self) -> &str {
        &self.message
    }

    pub fn context(&self) -> &BTreeMap<String, Value> {
        &self.context
    }

    pub fn body(&self) -> ErrorBody {
        ErrorBody {
            status: self.status,
            error: self.message.clone(),
            context: self.context.clone(),
        }
    }
}

/// Serialized error envelope.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorBody {
    pub status: u16,
    pub error: String,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub context: BTreeMap<String, Value>,
}

impl From<UserError> for AppError {
    fn from(err: UserError) -> Self {
        let base = match &err {
            UserError::NotFound => AppError::not_found("user not found"),
            UserError::InvalidUser(reason) => AppError::bad_request(format!("invalid user data: {reason}")),
            UserError::AlreadyExists | UserError::Database(_) => AppError::internal("internal server error"),
        };
        base.with_source(err)
    }
}
