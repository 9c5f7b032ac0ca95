use thiserror::Error;

#[derive(Debug, Error)]
pub enum GraphStoreError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("already exists: {0}")]
    AlreadyExists(String),
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),
    #[error("storage error: {0}")]
    Storage(String),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("teardown not confirmed; pass Teardown::YesIAmSure to delete backing storage")]
    TeardownNotConfirmed,
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl GraphStoreError {
    pub fn not_found<T: Into<String>>(msg: T) -> Self {
        GraphStoreError::NotFound(msg.into())
    }

    pub fn already_exists<T: Into<String>>(msg: T) -> Self {
        GraphStoreError::AlreadyExists(msg.into())
    }

    pub fn invalid_endpoint<T: Into<String>>(msg: T) -> Self {
        GraphStoreError::InvalidEndpoint(msg.into())
    }

    pub fn storage<T: Into<String>>(msg: T) -> Self {
        GraphStoreError::Storage(msg.into())
    }

    pub fn serialization<T: Into<String>>(msg: T) -> Self {
        GraphStoreError::Serialization(msg.into())
    }

    pub fn invalid_input<T: Into<String>>(msg: T) -> Self {
        GraphStoreError::InvalidInput(msg.into())
    }
}
