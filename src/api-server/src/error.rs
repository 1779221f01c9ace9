use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tracing::error;
use will_iam_authz::IamError;

pub type Result<T> = std::result::Result<T, ApiError>;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Iam(#[from] IamError),

    #[error("Bad request: {0}")]
    BadRequest(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Iam(err) => match err {
                IamError::MalformedPermission(_) | IamError::Validation(_) => StatusCode::BAD_REQUEST,
                IamError::Unauthenticated(_) | IamError::OAuth2(_) => StatusCode::UNAUTHORIZED,
                IamError::Forbidden(_) => StatusCode::FORBIDDEN,
                IamError::EntityNotFound { .. } => StatusCode::NOT_FOUND,
                IamError::LockTimeout { .. } => StatusCode::SERVICE_UNAVAILABLE,
                IamError::Delegation { .. } => StatusCode::BAD_GATEWAY,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(error = %self, status = status.as_u16(), "Request failed");
        }

        let body = Json(json!({
            "error": self.to_string(),
            "status": status.as_u16(),
        }));

        (status, body).into_response()
    }
}
