use thiserror::Error;

#[derive(Debug, Error)]
pub enum VboxError {
    #[error("failed to spawn VBoxManage: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("VBoxManage {command} failed: {stderr}")]
    CommandFailed { command: String, stderr: String },

    #[error("VM '{0}' is not registered with the hypervisor")]
    NotFound(String),

    #[error("could not parse VBoxManage output: {0}")]
    Parse(String),
}

impl VboxError {
    pub fn command(command: &str, stderr: &str) -> Self {
        VboxError::CommandFailed {
            command: command.to_string(),
            stderr: stderr.trim().to_string(),
        }
    }
}
