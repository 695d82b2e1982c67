use google_cloud_gax::grpc::{Code, Status};
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BackendError {
    #[error("could not connect to Pub/Sub: {0}")]
    Connect(String),

    #[error("{0} was not found")]
    NotFound(String),

    #[error("{0} already exists")]
    AlreadyExists(String),

    #[error("Pub/Sub request failed ({code}): {message}")]
    Rpc { code: String, message: String },
}

impl From<Status> for BackendError {
    fn from(status: Status) -> Self {
        let message = status.message().to_owned();
        match status.code() {
            Code::NotFound => Self::NotFound(message),
            Code::AlreadyExists => Self::AlreadyExists(message),
            code => Self::Rpc {
                code: format!("{code:?}"),
                message,
            },
        }
    }
}
