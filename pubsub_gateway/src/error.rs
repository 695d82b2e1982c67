use axum::response::{IntoResponse, Response};
use pubsub_gateway_backend::error::BackendError;
use thiserror::Error;

use crate::status::StatusPage;

/// A failed provider call, rendered as a redirect back to the page the request came from.
#[derive(Debug, Error)]
#[error("{operation} failed: {source}")]
pub struct AppError {
    page: StatusPage,
    operation: &'static str,
    #[source]
    source: BackendError,
}

impl AppError {
    pub fn admin(operation: &'static str) -> impl FnOnce(BackendError) -> Self {
        move |source| Self {
            page: StatusPage::Admin,
            operation,
            source,
        }
    }

    pub fn push_pull(operation: &'static str) -> impl FnOnce(BackendError) -> Self {
        move |source| Self {
            page: StatusPage::PushPull,
            operation,
            source,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        log::warn!("{}", self);
        self.page.redirect(&self.to_string()).into_response()
    }
}

/// Errors that stop the server from starting or running.
#[derive(Debug, Error)]
pub enum FatalError {
    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error("server I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use axum::http::{header, StatusCode};

    use super::*;

    #[test]
    fn renders_as_failure_redirect() {
        let err = AppError::admin("Topic creation")(BackendError::AlreadyExists(
            "Topic orders".to_string(),
        ));
        assert_eq!(
            err.to_string(),
            "Topic creation failed: Topic orders already exists"
        );

        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(
            response.headers()[header::LOCATION],
            "/admin-index.html?statusMessage=Topic%20creation%20failed%3A%20Topic%20orders%20already%20exists"
        );
    }
}
