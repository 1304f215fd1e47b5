use std::time::Duration;

use axum::{
    Json,
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use snafu::Snafu;
use tracing::{debug, error};

use crate::{
    auth, tenant, workload,
    error::{ControllerError, ErrorKind},
};

/// Message returned when a tenant hits its workload limit.
pub const QUOTA_EXCEEDED_MESSAGE: &str = "Maximum App deploy limit reached!";

#[derive(Debug, Snafu, strum::EnumDiscriminants)]
#[strum_discriminants(derive(strum::IntoStaticStr))]
#[snafu(visibility(pub(crate)))]
pub enum ApiError {
    #[snafu(display("failed to authenticate the caller"))]
    Authenticate { source: auth::Error },

    #[snafu(display("failed to resolve the namespace of the caller"))]
    ResolveTenant { source: tenant::Error },

    #[snafu(display("invalid request body"))]
    InvalidBody { source: JsonRejection },

    #[snafu(transparent)]
    Workload { source: workload::Error },

    #[snafu(display("request did not complete within {}", humantime::format_duration(*timeout)))]
    DeadlineExceeded { timeout: Duration },
}

impl ControllerError for ApiError {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::Authenticate { source } => source.kind(),
            Self::ResolveTenant { source } => source.kind(),
            Self::InvalidBody { .. } => ErrorKind::Validation,
            Self::Workload { source } => source.kind(),
            Self::DeadlineExceeded { .. } => ErrorKind::Upstream,
        }
    }

    fn category(&self) -> &'static str {
        match self {
            Self::Authenticate { source } => source.category(),
            Self::ResolveTenant { source } => source.category(),
            Self::Workload { source } => source.category(),
            Self::InvalidBody { .. } | Self::DeadlineExceeded { .. } => {
                ApiErrorDiscriminants::from(self).into()
            }
        }
    }
}

pub fn status_code(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::Auth => StatusCode::FORBIDDEN,
        ErrorKind::Validation => StatusCode::BAD_REQUEST,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Conflict => StatusCode::CONFLICT,
        ErrorKind::QuotaExceeded => StatusCode::TOO_MANY_REQUESTS,
        ErrorKind::Upstream => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    kind: ErrorKind,
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let kind = self.kind();
        let category = self.category();

        if kind == ErrorKind::Upstream {
            error!(
                category,
                error = &self as &dyn std::error::Error,
                "request failed"
            );
        } else {
            debug!(
                category,
                error = &self as &dyn std::error::Error,
                "request rejected"
            );
        }

        // Internal failures are logged with their full chain, the caller only learns which
        // step failed.
        let message = match kind {
            ErrorKind::QuotaExceeded => QUOTA_EXCEEDED_MESSAGE.to_owned(),
            ErrorKind::Upstream => self.to_string(),
            _ => error_chain(&self),
        };

        (status_code(kind), Json(ErrorBody { kind, message })).into_response()
    }
}

/// Joins the messages of `error` and all of its sources.
fn error_chain(error: &dyn std::error::Error) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}
