use thiserror::Error;

#[derive(Debug, Error)]
pub enum SshError {
    #[error("failed to spawn ssh client: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("remote command on {host} failed: {stderr}")]
    CommandFailed { host: String, stderr: String },

    #[error("failed to copy {path} to {host}: {stderr}")]
    CopyFailed {
        host: String,
        path: String,
        stderr: String,
    },

    #[error("could not stage password file: {0}")]
    PasswordFile(std::io::Error),
}
