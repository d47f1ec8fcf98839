use std::process::Stdio;

use log::debug;
use tokio::process::Command;

/// Result of one external command, whether it actually ran or was only
/// rendered in dry-run mode.
#[derive(Debug, Clone)]
pub struct CmdOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
    pub simulated: bool,
}

impl CmdOutput {
    pub fn simulated_ok() -> Self {
        CmdOutput {
            success: true,
            stdout: String::new(),
            stderr: String::new(),
            simulated: true,
        }
    }
}

/// Shim in front of every external program invocation.
///
/// Queries always execute so validation and state checks stay real even in
/// dry-run mode; mutations are rendered to stdout instead of executed when
/// `dry_run` is set. With `debug`, every spawned command is traced.
#[derive(Debug, Clone, Copy, Default)]
pub struct Executor {
    pub dry_run: bool,
    pub debug: bool,
}

impl Executor {
    pub fn new(dry_run: bool, debug: bool) -> Self {
        Executor { dry_run, debug }
    }

    /// Run a read-only command. Executes in every mode.
    pub async fn query(&self, program: &str, args: &[&str]) -> std::io::Result<CmdOutput> {
        self.spawn(program, args).await
    }

    /// Run a state-mutating command. In dry-run mode the fully quoted
    /// command line is printed and a synthetic success returned.
    pub async fn mutate(&self, program: &str, args: &[&str]) -> std::io::Result<CmdOutput> {
        if self.dry_run {
            println!("+ {}", render(program, args));
            return Ok(CmdOutput::simulated_ok());
        }
        self.spawn(program, args).await
    }

    async fn spawn(&self, program: &str, args: &[&str]) -> std::io::Result<CmdOutput> {
        if self.debug {
            debug!("exec: {}", render(program, args));
        }
        let output = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await?;
        Ok(CmdOutput {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            simulated: false,
        })
    }
}

/// Render a command line with shell quoting, for dry-run output and traces.
pub fn render(program: &str, args: &[&str]) -> String {
    let mut parts = Vec::with_capacity(args.len() + 1);
    parts.push(quote(program));
    parts.extend(args.iter().map(|a| quote(a)));
    parts.join(" ")
}

/// Single-quote a word for a POSIX shell unless it is plainly safe.
pub fn quote(word: &str) -> String {
    if !word.is_empty()
        && word
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:@,+".contains(c))
    {
        word.to_string()
    } else {
        format!("'{}'", word.replace('\'', r"'\''"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_quotes_only_when_needed() {
        assert_eq!(render("VBoxManage", &["list", "vms"]), "VBoxManage list vms");
        assert_eq!(
            render("ssh", &["user@host", "echo hi"]),
            "ssh user@host 'echo hi'"
        );
        assert_eq!(render("sh", &["-c", "it's"]), r"sh -c 'it'\''s'");
        assert_eq!(render("x", &[""]), "x ''");
    }

    #[tokio::test]
    async fn dry_run_never_spawns_mutations() {
        let exec = Executor::new(true, false);
        // A program that cannot exist: spawning it would error, so a
        // successful simulated result proves nothing ran.
        let out = exec
            .mutate("vbclone-test-no-such-program", &["boom"])
            .await
            .unwrap();
        assert!(out.success);
        assert!(out.simulated);
    }

    #[tokio::test]
    async fn queries_execute_even_in_dry_run() {
        let exec = Executor::new(true, false);
        let out = exec.query("sh", &["-c", "echo live"]).await.unwrap();
        assert!(!out.simulated);
        assert!(out.success);
        assert_eq!(out.stdout.trim(), "live");
    }

    #[tokio::test]
    async fn failing_command_reports_status_and_stderr() {
        let exec = Executor::default();
        let out = exec.query("sh", &["-c", "echo oops >&2; exit 7"]).await.unwrap();
        assert!(!out.success);
        assert_eq!(out.stderr.trim(), "oops");
    }
}
