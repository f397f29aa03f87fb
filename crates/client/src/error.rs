use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientError {
    #[error("connection failed: {0}")]
    ConnectFailed(String),

    #[error("connection lost; gave up after {attempts} reconnect attempts")]
    RetriesExhausted { attempts: u32 },

    #[error("job '{0}' not found")]
    JobNotFound(String),

    #[error("final status of job '{0}' is unavailable")]
    JobUnavailable(String),

    #[error("client already connected")]
    AlreadyStarted,
}
