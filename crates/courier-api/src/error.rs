use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;
use tracing::{error, warn};

use courier_core::{FeedError, MessagingError, MessagingResult};
use courier_types::api::ErrorResponse;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error(transparent)]
    Messaging(#[from] MessagingError),

    #[error(transparent)]
    Feed(#[from] FeedError),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("upload larger than {0} bytes")]
    PayloadTooLarge(usize),

    #[error("media storage failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Messaging(e) if e.is_transient() => StatusCode::SERVICE_UNAVAILABLE,
            Self::Messaging(MessagingError::Validation(_)) | Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Messaging(MessagingError::Authorization(_)) => StatusCode::FORBIDDEN,
            Self::Messaging(MessagingError::NotFound(_)) | Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Messaging(MessagingError::TransientIo(_)) | Self::Feed(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            Self::Io(_) | Self::Join(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("Request failed: {}", self);
        } else {
            warn!("Request rejected ({}): {}", status.as_u16(), self);
        }

        (status, Json(ErrorResponse { error: self.to_string() })).into_response()
    }
}

/// Run a blocking core call off the async runtime.
pub async fn blocking<F, T>(f: F) -> Result<T, ApiError>
where
    F: FnOnce() -> MessagingResult<T> + Send + 'static,
    T: Send + 'static,
{
    Ok(tokio::task::spawn_blocking(f).await??)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn core_errors_map_to_statuses() {
        let cases = [
            (MessagingError::validation("x"), StatusCode::BAD_REQUEST),
            (MessagingError::authorization("x"), StatusCode::FORBIDDEN),
            (MessagingError::not_found("x"), StatusCode::NOT_FOUND),
            (
                MessagingError::TransientIo(anyhow::anyhow!("disk full")),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).status(), status);
        }
        assert_eq!(ApiError::from(FeedError::Closed).status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
