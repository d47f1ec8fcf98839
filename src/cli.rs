use std::path::PathBuf;

use clap::{ArgGroup, Args, Parser, Subcommand};

use crate::config::NetworkMode;
use crate::provision::Stage;

#[derive(Parser, Debug)]
#[command(
    name = "vbclone",
    version,
    about = "Linked-clone VM provisioning for VirtualBox",
    long_about = None
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Clone a prepared base VM and provision the clone end to end
    Clone(CloneArgs),
    /// Interactively select clones to power off and delete
    Teardown(TeardownArgs),
    /// Bulk operations on GitHub SSH keys
    Keys(KeysArgs),
}

#[derive(Args, Debug)]
pub struct CloneArgs {
    /// Source VM to clone from; must be powered off
    #[arg(long)]
    pub base: String,

    /// Name for the new VM (also the default hostname)
    #[arg(long)]
    pub name: String,

    /// Hostname for the guest, when it should differ from the VM name
    #[arg(long)]
    pub hostname: Option<String>,

    /// NIC to attach to the requested network mode
    #[arg(long, value_parser = clap::value_parser!(u8).range(1..=8))]
    pub config_nic: u8,

    /// NIC whose IP is used for SSH; auto-detected when omitted
    #[arg(long, value_parser = clap::value_parser!(u8).range(1..=8))]
    pub ssh_nic: Option<u8>,

    /// Network attachment mode for the config NIC
    #[arg(long, value_enum)]
    pub network: NetworkMode,

    /// Snapshot on the base VM that clones link against
    #[arg(long, default_value = "base-clean")]
    pub snapshot: String,

    /// Guest login user
    #[arg(long, default_value = "ci")]
    pub user: String,

    /// Guest login password, used with --use-sshpass
    #[arg(long, default_value = "")]
    pub pass: String,

    /// Authenticate with the password via sshpass instead of SSH keys
    #[arg(long)]
    pub use_sshpass: bool,

    /// Start the VM with a display instead of headless
    #[arg(long)]
    pub gui: bool,

    /// Print state-changing commands instead of executing them
    #[arg(long)]
    pub dry_run: bool,

    /// Trace every external command
    #[arg(long)]
    pub debug: bool,

    /// Exit successfully after the named stage completes
    #[arg(long, value_enum, value_name = "STAGE")]
    pub stop_after: Option<Stage>,

    /// Print the resolved run configuration and exit
    #[arg(long)]
    pub print_vars: bool,

    /// Upload the generated guest key to GitHub
    #[arg(long)]
    pub github_key_upload: bool,

    /// Skip GitHub key provisioning on the guest entirely
    #[arg(long, conflicts_with = "github_key_upload")]
    pub no_github_key: bool,

    /// Path to the github-ssh-key binary pushed to the guest
    /// (default: next to this executable)
    #[arg(long, value_name = "PATH")]
    pub tool: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct TeardownArgs {
    /// Only offer VMs whose name matches this regular expression
    #[arg(long, value_name = "REGEX")]
    pub filter: Option<String>,

    /// Delete each VM's GitHub key (titled with the VM name); the default
    #[arg(long, conflicts_with = "no_github_delete")]
    pub github_delete: bool,

    /// Leave GitHub keys alone
    #[arg(long)]
    pub no_github_delete: bool,

    /// Print state-changing commands instead of executing them
    #[arg(long)]
    pub dry_run: bool,

    /// Skip the confirmation prompt
    #[arg(long)]
    pub force: bool,
}

#[derive(Args, Debug)]
#[command(group = ArgGroup::new("operation").required(true).args(
    ["list", "delete", "self_delete", "match_prefix"]
))]
pub struct KeysArgs {
    /// List keys as a numbered table
    #[arg(long)]
    pub list: bool,

    /// Interactively select keys to delete
    #[arg(long)]
    pub delete: bool,

    /// Delete the key titled with this host's short hostname
    #[arg(long)]
    pub self_delete: bool,

    /// Delete every key whose title starts with this literal prefix
    #[arg(long = "match", value_name = "PREFIX")]
    pub match_prefix: Option<String>,

    /// Assume yes on confirmations
    #[arg(long)]
    pub yes: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn clone_requires_base_name_nic_and_network() {
        let err = Cli::try_parse_from(["vbclone", "clone", "--base", "img"]);
        assert!(err.is_err());
    }

    #[test]
    fn nic_indices_outside_1_to_8_are_rejected() {
        for bad in ["0", "9"] {
            let err = Cli::try_parse_from([
                "vbclone", "clone", "--base", "img", "--name", "vm-1", "--config-nic", bad,
                "--network", "nat",
            ]);
            assert!(err.is_err(), "config-nic {bad} should be rejected");
        }
    }

    #[test]
    fn network_mode_names_match_the_documented_set() {
        for mode in ["nat", "bridged", "hostonly", "natnetwork"] {
            let cli = Cli::try_parse_from([
                "vbclone", "clone", "--base", "img", "--name", "vm-1", "--config-nic", "1",
                "--network", mode,
            ]);
            assert!(cli.is_ok(), "mode {mode} should parse");
        }
        assert!(Cli::try_parse_from([
            "vbclone", "clone", "--base", "img", "--name", "vm-1", "--config-nic", "1",
            "--network", "bridge",
        ])
        .is_err());
    }

    #[test]
    fn stop_after_accepts_stage_names() {
        let cli = Cli::try_parse_from([
            "vbclone", "clone", "--base", "img", "--name", "vm-1", "--config-nic", "1",
            "--network", "nat", "--stop-after", "github-ssh-key",
        ])
        .unwrap();
        let Command::Clone(args) = cli.command else {
            panic!("expected clone");
        };
        assert_eq!(args.stop_after, Some(Stage::GithubSshKey));
    }

    #[test]
    fn keys_requires_exactly_one_operation() {
        assert!(Cli::try_parse_from(["vbclone", "keys"]).is_err());
        assert!(Cli::try_parse_from(["vbclone", "keys", "--list", "--delete"]).is_err());
        assert!(Cli::try_parse_from(["vbclone", "keys", "--match", "vm-"]).is_ok());
    }
}
