use stagehand_core::TaskError;
use thiserror::Error;
use tonic::{Code, Status};

#[derive(Debug, Error)]
pub enum RpcError {
    #[error("transport error: {0}")]
    Transport(#[from] tonic::transport::Error),

    #[error("rpc failed: {0}")]
    Status(#[from] Status),

    #[error("handshake failed: {0}")]
    Handshake(String),

    #[error("invalid message: {0}")]
    InvalidMessage(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<RpcError> for TaskError {
    fn from(err: RpcError) -> Self {
        match err {
            RpcError::Status(status) => TaskError::from_status(status),
            other => TaskError::Transport(other.to_string()),
        }
    }
}

/// Mapping between engine errors and wire statuses.
pub(crate) trait StatusExt {
    fn from_status(status: Status) -> Self;
}

impl StatusExt for TaskError {
    fn from_status(status: Status) -> Self {
        let msg = status.message().to_string();
        match status.code() {
            Code::NotFound => match msg.rsplit_once('#') {
                Some((task, instance)) => TaskError::NotFound {
                    task: task.to_string(),
                    instance: instance.to_string(),
                },
                None => TaskError::NotFound {
                    task: msg,
                    instance: String::new(),
                },
            },
            Code::Unimplemented => TaskError::Unsupported(msg),
            Code::FailedPrecondition => TaskError::Closed,
            Code::Unavailable | Code::Cancelled | Code::DeadlineExceeded | Code::Unknown => {
                TaskError::Transport(msg)
            }
            _ => TaskError::Remote(msg),
        }
    }
}

pub(crate) fn to_status(err: TaskError) -> Status {
    match err {
        TaskError::NotFound { task, instance } => Status::not_found(format!("{task}#{instance}")),
        TaskError::Unsupported(msg) => Status::unimplemented(msg),
        TaskError::Closed => Status::failed_precondition("task is closed"),
        other => Status::internal(other.to_string()),
    }
}
