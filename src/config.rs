use std::path::PathBuf;

use clap::ValueEnum;
use serde::Serialize;
use thiserror::Error;

use crate::cli::CloneArgs;
use crate::provision::Stage;

/// The four attachment modes a config NIC can be wired to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkMode {
    Nat,
    Bridged,
    Hostonly,
    Natnetwork,
}

impl NetworkMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            NetworkMode::Nat => "nat",
            NetworkMode::Bridged => "bridged",
            NetworkMode::Hostonly => "hostonly",
            NetworkMode::Natnetwork => "natnetwork",
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("--{0} must not be empty")]
    EmptyArgument(&'static str),

    #[error("source and new VM names must differ (both are '{0}')")]
    SameVm(String),

    #[error("NIC index {0} is out of range (1-8)")]
    NicOutOfRange(u8),

    #[error("--use-sshpass requires a password (--pass)")]
    MissingPassword,
}

/// One run's configuration, built from the CLI exactly once and threaded
/// immutably through every stage.
#[derive(Debug, Clone, Serialize)]
pub struct RunConfig {
    pub base: String,
    pub name: String,
    pub hostname: String,
    pub snapshot: String,
    pub config_nic: u8,
    pub ssh_nic: Option<u8>,
    pub network: NetworkMode,
    pub user: String,
    #[serde(skip_serializing)]
    pub password: String,
    pub use_sshpass: bool,
    pub headless: bool,
    pub dry_run: bool,
    pub debug: bool,
    pub stop_after: Option<Stage>,
    pub github_key: bool,
    pub github_key_upload: bool,
    pub tool_path: Option<PathBuf>,
}

impl RunConfig {
    pub fn from_args(args: &CloneArgs) -> Result<Self, ConfigError> {
        let base = args.base.trim();
        let name = args.name.trim();
        if base.is_empty() {
            return Err(ConfigError::EmptyArgument("base"));
        }
        if name.is_empty() {
            return Err(ConfigError::EmptyArgument("name"));
        }
        if base == name {
            return Err(ConfigError::SameVm(name.to_string()));
        }
        // clap bounds these already; re-checked so a RunConfig built in
        // code honors the same invariants.
        for nic in std::iter::once(args.config_nic).chain(args.ssh_nic) {
            if !(1..=8).contains(&nic) {
                return Err(ConfigError::NicOutOfRange(nic));
            }
        }
        if args.use_sshpass && args.pass.is_empty() {
            return Err(ConfigError::MissingPassword);
        }

        let hostname = args
            .hostname
            .as_deref()
            .map(str::trim)
            .filter(|h| !h.is_empty())
            .unwrap_or(name)
            .to_string();

        Ok(RunConfig {
            base: base.to_string(),
            name: name.to_string(),
            hostname,
            snapshot: args.snapshot.clone(),
            config_nic: args.config_nic,
            ssh_nic: args.ssh_nic,
            network: args.network,
            user: args.user.clone(),
            password: args.pass.clone(),
            use_sshpass: args.use_sshpass,
            headless: !args.gui,
            dry_run: args.dry_run,
            debug: args.debug,
            stop_after: args.stop_after,
            github_key: !args.no_github_key,
            github_key_upload: args.github_key_upload,
            tool_path: args.tool.clone(),
        })
    }

    /// Resolved configuration as pretty JSON for `--print-vars`; the
    /// password is never serialized.
    pub fn render_vars(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}
