use thiserror::Error;

#[derive(Debug, Error)]
pub enum SshError {
    #[error("SSH connection error: {0}")]
    Connection(#[from] russh::Error),

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Address resolution failed: {0}")]
    Address(String),

    #[error("Key loading failed: {0}")]
    Key(#[from] russh::keys::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SFTP error: {0}")]
    Sftp(#[from] russh_sftp::client::error::Error),

    #[error("Command execution error: {0}")]
    Command(String),
}
