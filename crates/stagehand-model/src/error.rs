use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ModelError {
    #[error("empty task path")]
    EmptyPath,

    #[error("unknown task: {0}")]
    UnknownTask(String),

    #[error("dependency cycle through task: {0}")]
    Cycle(String),
}
