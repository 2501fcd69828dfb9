use thiserror::Error;

/// Errors from a single registration attempt against one base url
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RegistrationError {
    #[error("Invalid server address: {0}")]
    InvalidAddress(String),

    #[error("Transport failed: {0}")]
    Transport(String),

    #[error("Server rejected registration: {status}: {body}")]
    Rejected { status: u16, body: String },
}
