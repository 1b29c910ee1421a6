use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("{0} not set")]
    MissingEnv(&'static str),
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("API error: {status} {body}")]
    Vendor { status: u16, body: String },
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),
    #[error("connection pool error: {0}")]
    Pool(#[from] diesel::r2d2::PoolError),
    #[error("migration error: {0}")]
    Migration(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("selector matched {count} posts: {selector}")]
    AmbiguousSelector { selector: String, count: usize },
    #[error("invalid input: {0}")]
    Validation(String),
    #[error("payment provider error: {0}")]
    Payment(String),
    #[error("{0} is not configured")]
    NotConfigured(&'static str),
    #[error("background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn http_status(&self) -> StatusCode {
        match self {
            Error::MissingEnv(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Error::Http(_) => StatusCode::BAD_GATEWAY,
            Error::Vendor { .. } => StatusCode::BAD_GATEWAY,
            Error::Json(_) => StatusCode::BAD_REQUEST,
            Error::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Error::Pool(_) => StatusCode::SERVICE_UNAVAILABLE,
            Error::Migration(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::AmbiguousSelector { .. } => StatusCode::CONFLICT,
            Error::Validation(_) => StatusCode::BAD_REQUEST,
            Error::Payment(_) => StatusCode::PAYMENT_REQUIRED,
            Error::NotConfigured(_) => StatusCode::SERVICE_UNAVAILABLE,
            Error::Join(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Vendor failures keep a short excerpt of the body; some APIs echo whole pages back.
    pub fn vendor(status: reqwest::StatusCode, body: &str) -> Self {
        let excerpt: String = body.chars().take(200).collect();
        Error::Vendor {
            status: status.as_u16(),
            body: excerpt,
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.http_status();
        if status.is_server_error() {
            tracing::error!("{self}");
        }
        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}
