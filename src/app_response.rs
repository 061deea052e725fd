use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// JSON envelope returned by every C ABI function.
#[derive(Debug, Serialize, Deserialize)]
pub enum AppResponse {
    DatabaseError(String),
    SerializationError(String),
    NotFound(String),
    ValidationError(String),
    BadRequest(String),
    Conflict(String),
    Ok(String),
}

impl Display for AppResponse {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            AppResponse::DatabaseError(msg) => write!(f, "Database error: {}", msg),
            AppResponse::SerializationError(msg) => write!(f, "Serialization error: {}", msg),
            AppResponse::NotFound(msg) => write!(f, "Not found: {}", msg),
            AppResponse::ValidationError(msg) => write!(f, "Validation error: {}", msg),
            AppResponse::BadRequest(msg) => write!(f, "Bad Request: {}", msg),
            AppResponse::Conflict(msg) => write!(f, "Conflict: {}", msg),
            AppResponse::Ok(msg) => write!(f, "Ok: {}", msg),
        }
    }
}

impl From<AppError> for AppResponse {
    fn from(err: AppError) -> Self {
        match err {
            AppError::Storage(msg) => AppResponse::DatabaseError(msg),
            AppError::Serialization(e) => AppResponse::SerializationError(e.to_string()),
            AppError::Validation(msg) | AppError::Config(msg) => AppResponse::ValidationError(msg),
            AppError::NoActiveVisit => AppResponse::NotFound("No active visit".to_string()),
            err @ (AppError::ActiveVisitExists { .. } | AppError::SyncInProgress) => {
                AppResponse::Conflict(err.to_string())
            }
            err @ (AppError::Offline(_) | AppError::Remote(_)) => AppResponse::BadRequest(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for AppResponse {
    fn from(err: serde_json::Error) -> Self {
        AppResponse::SerializationError(format!("JSON serialization error: {}", err))
    }
}

impl AppResponse {
    pub fn success(msg: impl Into<String>) -> Self {
        AppResponse::Ok(msg.into())
    }
}
