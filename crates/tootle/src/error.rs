use thiserror::Error;

/// Reasons a connection stops. None of these reach the client.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("failed to send frame: {0}")]
    Send(String),

    #[error("failed to receive frame: {0}")]
    Receive(String),

    #[error("peer closed the connection")]
    Closed,

    #[error("no pong within {0:?}")]
    KeepaliveTimeout(std::time::Duration),

    #[error("server shutting down")]
    Shutdown,
}
