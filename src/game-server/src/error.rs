use thiserror::Error;

#[derive(Debug, Error)]
pub enum GameServerError {
    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },
    #[error("REST server failed: {0}")]
    Serve(#[from] std::io::Error),
    #[error("server task did not finish cleanly: {0}")]
    Task(#[from] tokio::task::JoinError),
    #[error("server stopped before it was ready")]
    NotReady,
}

pub type Result<T> = std::result::Result<T, GameServerError>;
