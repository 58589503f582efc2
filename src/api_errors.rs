use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::errors::{GatewayError, Stage};

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{message}")]
    BadGateway { stage: Stage, message: String },
    #[error("{0}")]
    Unavailable(String),
    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }
}

#[derive(Serialize)]
struct ErrBody {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    stage: Option<Stage>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (code, stage) = match &self {
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, None),
            ApiError::BadGateway { stage, .. } => (StatusCode::BAD_GATEWAY, Some(*stage)),
            ApiError::Unavailable(_) => (StatusCode::SERVICE_UNAVAILABLE, None),
            ApiError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, None),
        };
        let body = ErrBody {
            error: self.to_string(),
            stage,
        };
        (code, Json(body)).into_response()
    }
}

impl From<GatewayError> for ApiError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::InvalidRequest { field, message } => {
                ApiError::BadRequest(format!("{field}: {message}"))
            }
            GatewayError::UpstreamUnavailable { stage, source } => {
                let service = match stage {
                    Stage::Features => "feature store",
                    Stage::Inference => "model service",
                };
                ApiError::BadGateway {
                    stage,
                    message: format!("{service} unavailable: {source}"),
                }
            }
            GatewayError::PolicyFetchFailed { address, .. }
            | GatewayError::PolicyBootstrapFailed { address, .. } => {
                ApiError::Unavailable(format!("policy source {address} unavailable"))
            }
            GatewayError::Config { message } | GatewayError::Internal { message } => {
                ApiError::Internal(message)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ClientError;

    #[test]
    fn invalid_request_maps_to_400() {
        let resp = ApiError::from(GatewayError::invalid_request("user_id", "must not be empty"))
            .into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn upstream_failures_map_to_502_with_distinct_stage() {
        let features = ApiError::from(GatewayError::upstream(
            Stage::Features,
            ClientError::rejected("boom"),
        ));
        let inference = ApiError::from(GatewayError::upstream(
            Stage::Inference,
            ClientError::rejected("boom"),
        ));

        assert!(features.to_string().starts_with("feature store"));
        assert!(inference.to_string().starts_with("model service"));
        assert_eq!(features.into_response().status(), StatusCode::BAD_GATEWAY);
        assert_eq!(inference.into_response().status(), StatusCode::BAD_GATEWAY);
    }
}
