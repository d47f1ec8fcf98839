pub mod errors;

use std::io::Write;
use std::net::Ipv4Addr;
use std::path::Path;

use log::debug;
use tempfile::NamedTempFile;

use crate::exec::{CmdOutput, Executor};

pub use errors::SshError;

const SSH_OPTIONS: [&str; 6] = [
    "-o",
    "StrictHostKeyChecking=no",
    "-o",
    "UserKnownHostsFile=/dev/null",
    "-o",
    "ConnectTimeout=10",
];

/// Remote-shell transport into a guest. Production runs `ssh`/`scp`
/// (optionally via `sshpass`); tests substitute a recording fake.
#[allow(async_fn_in_trait)]
pub trait RemoteShell {
    /// Run a command on the guest. Transport failures and non-zero remote
    /// exits both surface in the returned output's `success` flag.
    async fn run(&self, host: Ipv4Addr, command: &str) -> Result<CmdOutput, SshError>;

    /// Copy a local file onto the guest.
    async fn push(&self, host: Ipv4Addr, local: &Path, remote: &str) -> Result<(), SshError>;

    /// One cheap login attempt, for reachability polling. Never errors.
    async fn reachable(&self, host: Ipv4Addr) -> bool;

    /// Confirm the transport's host-side tooling is present before any
    /// mutation happens. In-memory fakes accept by default.
    async fn preflight(&self) -> Result<(), SshError> {
        Ok(())
    }

    /// Run a command and treat any failure as an error.
    async fn run_checked(&self, host: Ipv4Addr, command: &str) -> Result<CmdOutput, SshError> {
        let out = self.run(host, command).await?;
        if !out.success {
            return Err(SshError::CommandFailed {
                host: host.to_string(),
                stderr: if out.stderr.trim().is_empty() {
                    out.stdout.trim().to_string()
                } else {
                    out.stderr.trim().to_string()
                },
            });
        }
        Ok(out)
    }
}

#[derive(Debug, Clone)]
pub enum Auth {
    /// Key-based login, using whatever identities the user's agent/config
    /// provide.
    Key,
    /// Password login through `sshpass -f` with a 0600 temp file, so the
    /// secret never lands on a command line.
    Password(String),
}

/// OpenSSH client wrapper. Every call goes through the executor's mutating
/// entry point: in a simulated run the rendered command is printed and the
/// guest is never contacted.
pub struct OpenSsh {
    user: String,
    auth: Auth,
    executor: Executor,
}

impl OpenSsh {
    pub fn new(user: &str, auth: Auth, executor: Executor) -> Self {
        OpenSsh {
            user: user.to_string(),
            auth,
            executor,
        }
    }

    fn target(&self, host: Ipv4Addr) -> String {
        format!("{}@{}", self.user, host)
    }

    /// Write the password to a mode-0600 temp file for `sshpass -f`. The
    /// handle must stay alive until the child has run.
    fn password_file(password: &str) -> Result<NamedTempFile, SshError> {
        let mut file = NamedTempFile::new().map_err(SshError::PasswordFile)?;
        file.write_all(password.as_bytes())
            .map_err(SshError::PasswordFile)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o600);
            std::fs::set_permissions(file.path(), perms).map_err(SshError::PasswordFile)?;
        }
        Ok(file)
    }

    async fn invoke(&self, program: &str, args: &[&str]) -> Result<CmdOutput, SshError> {
        match &self.auth {
            Auth::Key => Ok(self.executor.mutate(program, args).await?),
            Auth::Password(password) => {
                let file = Self::password_file(password)?;
                let path = file.path().to_string_lossy().to_string();
                let mut full = vec!["-f", path.as_str(), program];
                full.extend_from_slice(args);
                let out = self.executor.mutate("sshpass", &full).await?;
                drop(file);
                Ok(out)
            }
        }
    }
}

impl RemoteShell for OpenSsh {
    async fn preflight(&self) -> Result<(), SshError> {
        // `ssh -V` prints its version to stderr and exits 0.
        let out = self.executor.query("ssh", &["-V"]).await?;
        if !out.success {
            return Err(SshError::CommandFailed {
                host: "localhost".to_string(),
                stderr: "ssh client is not usable on this host".to_string(),
            });
        }
        if matches!(self.auth, Auth::Password(_)) {
            let out = self.executor.query("sshpass", &["-V"]).await?;
            if !out.success {
                return Err(SshError::CommandFailed {
                    host: "localhost".to_string(),
                    stderr: "sshpass is required for password authentication".to_string(),
                });
            }
        }
        Ok(())
    }

    async fn run(&self, host: Ipv4Addr, command: &str) -> Result<CmdOutput, SshError> {
        let target = self.target(host);
        let mut args: Vec<&str> = SSH_OPTIONS.to_vec();
        if matches!(self.auth, Auth::Key) {
            // Without sshpass an unreachable key login must fail instead of
            // sitting on a password prompt.
            args.extend_from_slice(&["-o", "BatchMode=yes"]);
        }
        args.push(target.as_str());
        args.push(command);
        self.invoke("ssh", &args).await
    }

    async fn push(&self, host: Ipv4Addr, local: &Path, remote: &str) -> Result<(), SshError> {
        let local_str = local.to_string_lossy().to_string();
        let destination = format!("{}:{}", self.target(host), remote);
        let mut args: Vec<&str> = SSH_OPTIONS.to_vec();
        args.push(local_str.as_str());
        args.push(destination.as_str());
        let out = self.invoke("scp", &args).await?;
        if !out.success {
            return Err(SshError::CopyFailed {
                host: host.to_string(),
                path: local_str,
                stderr: out.stderr.trim().to_string(),
            });
        }
        Ok(())
    }

    async fn reachable(&self, host: Ipv4Addr) -> bool {
        match self.run(host, "true").await {
            Ok(out) => out.success,
            Err(e) => {
                debug!("ssh probe to {host} failed: {e}");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn dry_run_renders_instead_of_connecting() {
        let shell = OpenSsh::new("ci", Auth::Key, Executor::new(true, false));
        let out = shell
            .run(Ipv4Addr::new(10, 0, 2, 15), "hostnamectl set-hostname x")
            .await
            .unwrap();
        assert!(out.simulated);
        assert!(out.success);
    }

    #[tokio::test]
    async fn dry_run_probe_reports_reachable() {
        let shell = OpenSsh::new("ci", Auth::Key, Executor::new(true, false));
        assert!(shell.reachable(Ipv4Addr::new(10, 0, 2, 15)).await);
    }

    #[cfg(unix)]
    #[test]
    fn password_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;
        let file = OpenSsh::password_file("hunter2").unwrap();
        let mode = file.path().metadata().unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
        assert_eq!(std::fs::read_to_string(file.path()).unwrap(), "hunter2");
    }
}
