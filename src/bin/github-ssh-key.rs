//! Guest-side GitHub SSH key provisioner. Pushed into each clone by the
//! provisioning pipeline and run there as the login user; also usable by
//! hand on any host.

use std::path::PathBuf;
use std::process::Stdio;

use clap::Parser;
use log::{error, warn};

use vbclone::github::{GithubClient, GithubError};
use vbclone::guestkey::{short_hostname, KeyProvisioner, STORE_HOST};
use vbclone::EXIT_AUTH;

#[derive(Parser, Debug)]
#[command(
    name = "github-ssh-key",
    version,
    about = "Generate and register this host's GitHub SSH key"
)]
struct Args {
    /// Comment for the public key (default: <user>@<shorthost>)
    #[arg(long)]
    email: Option<String>,

    /// Register the public key with GitHub under this host's name
    #[arg(long, conflicts_with = "no_upload")]
    upload: bool,

    /// Do not upload (the default)
    #[arg(long)]
    no_upload: bool,

    /// Print the public key
    #[arg(long)]
    print: bool,

    /// Regenerate even if this host is already provisioned
    #[arg(long)]
    force: bool,
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    if let Err(err) = run(args).await {
        error!("{err:#}");
        let code = match err.downcast_ref::<GithubError>() {
            Some(GithubError::Unauthenticated) => EXIT_AUTH,
            _ => 1,
        };
        std::process::exit(code);
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    let hostname = short_hostname();
    let user = std::env::var("USER").unwrap_or_else(|_| "root".to_string());
    let email = args
        .email
        .unwrap_or_else(|| format!("{user}@{hostname}"));

    let tool = KeyProvisioner {
        ssh_dir: ssh_dir()?,
        hostname,
        email,
        upload: args.upload,
        print: args.print,
        force: args.force,
    };

    // Only a run that will (re)generate needs host keys or a store session.
    let will_generate = args.force || !tool.marker_path().exists();

    let scanned = if will_generate {
        scan_host_keys().await
    } else {
        None
    };

    let store = if args.upload && will_generate {
        Some(GithubClient::from_env()?)
    } else {
        None
    };

    tool.run(store.as_ref(), scanned.as_deref()).await
}

fn ssh_dir() -> anyhow::Result<PathBuf> {
    dirs::home_dir()
        .map(|home| home.join(".ssh"))
        .ok_or_else(|| anyhow::anyhow!("could not determine the home directory"))
}

/// Current public host keys of the store host, for known-hosts seeding.
async fn scan_host_keys() -> Option<String> {
    let output = tokio::process::Command::new("ssh-keyscan")
        .arg(STORE_HOST)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .output()
        .await;
    match output {
        Ok(out) if out.status.success() && !out.stdout.is_empty() => {
            Some(String::from_utf8_lossy(&out.stdout).to_string())
        }
        _ => {
            warn!("ssh-keyscan {STORE_HOST} failed; known_hosts will not be seeded");
            None
        }
    }
}
