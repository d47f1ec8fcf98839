use std::io::Write;
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, bail, Context};
use clap::ValueEnum;
use log::{debug, info, warn};
use serde::Serialize;
use tempfile::NamedTempFile;
use tokio::time::sleep;
use uuid::Uuid;

use crate::config::{NetworkMode, RunConfig};
use crate::exec::quote;
use crate::ip;
use crate::poll;
use crate::ssh::RemoteShell;
use crate::vbox::{Hypervisor, VmState};

/// Pause after `startvm` so the hypervisor finishes the state transition
/// before we begin querying the new VM.
const POST_START_PAUSE: Duration = Duration::from_secs(3);

/// SSH-return budget after the reboot: 90 × 2 s.
const SSH_WAIT_ATTEMPTS: u32 = 90;
const SSH_WAIT_DELAY: Duration = Duration::from_secs(2);

/// Where the guest-side tool ends up on the guest.
const GUEST_TOOL_PATH: &str = "$HOME/.local/bin/github-ssh-key";

/// The pipeline's checkpoints, in execution order. Every name is a valid
/// `--stop-after` target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Stage {
    Validate,
    Snapshot,
    Clone,
    Mac,
    Network,
    Start,
    Ip,
    Ssh,
    Reboot,
    Wait,
    SmokeTest,
    PushTool,
    InstallTool,
    GithubSshKey,
    Summary,
}

impl Stage {
    pub const ALL: [Stage; 15] = [
        Stage::Validate,
        Stage::Snapshot,
        Stage::Clone,
        Stage::Mac,
        Stage::Network,
        Stage::Start,
        Stage::Ip,
        Stage::Ssh,
        Stage::Reboot,
        Stage::Wait,
        Stage::SmokeTest,
        Stage::PushTool,
        Stage::InstallTool,
        Stage::GithubSshKey,
        Stage::Summary,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Stage::Validate => "validate",
            Stage::Snapshot => "snapshot",
            Stage::Clone => "clone",
            Stage::Mac => "mac",
            Stage::Network => "network",
            Stage::Start => "start",
            Stage::Ip => "ip",
            Stage::Ssh => "ssh",
            Stage::Reboot => "reboot",
            Stage::Wait => "wait",
            Stage::SmokeTest => "smoke-test",
            Stage::PushTool => "push-tool",
            Stage::InstallTool => "install-tool",
            Stage::GithubSshKey => "github-ssh-key",
            Stage::Summary => "summary",
        }
    }
}

/// State produced by earlier stages and consumed by later ones; nothing
/// here outlives the run.
#[derive(Debug, Default)]
struct StageState {
    ip: Option<Ipv4Addr>,
    staged_tool: Option<String>,
}

/// Drive every stage in order, honoring the early-stop checkpoint.
pub async fn run_pipeline<H, S>(cfg: &RunConfig, hypervisor: &H, shell: &S) -> anyhow::Result<()>
where
    H: Hypervisor,
    S: RemoteShell,
{
    let mut state = StageState::default();
    for stage in Stage::ALL {
        info!("=== stage: {} ===", stage.name());
        run_stage(stage, cfg, hypervisor, shell, &mut state)
            .await
            .with_context(|| format!("stage '{}' failed", stage.name()))?;
        if cfg.stop_after == Some(stage) {
            info!("Stopping after stage '{}' as requested", stage.name());
            return Ok(());
        }
    }
    Ok(())
}

async fn run_stage<H, S>(
    stage: Stage,
    cfg: &RunConfig,
    hypervisor: &H,
    shell: &S,
    state: &mut StageState,
) -> anyhow::Result<()>
where
    H: Hypervisor,
    S: RemoteShell,
{
    match stage {
        Stage::Validate => stage_validate(cfg, hypervisor, shell).await,
        Stage::Snapshot => stage_snapshot(cfg, hypervisor).await,
        Stage::Clone => stage_clone(cfg, hypervisor).await,
        Stage::Mac => stage_mac(cfg, hypervisor).await,
        Stage::Network => stage_network(cfg, hypervisor).await,
        Stage::Start => stage_start(cfg, hypervisor).await,
        Stage::Ip => stage_ip(cfg, hypervisor, state).await,
        Stage::Ssh => stage_ssh(cfg, shell, state).await,
        Stage::Reboot => stage_reboot(cfg, shell, state).await,
        Stage::Wait => stage_wait(cfg, shell, state).await,
        Stage::SmokeTest => stage_smoke_test(cfg, shell, state).await,
        Stage::PushTool => stage_push_tool(cfg, shell, state).await,
        Stage::InstallTool => stage_install_tool(cfg, shell, state).await,
        Stage::GithubSshKey => stage_github_key(cfg, shell, state).await,
        Stage::Summary => stage_summary(cfg, hypervisor, state).await,
    }
}

fn require_ip(cfg: &RunConfig, state: &StageState) -> anyhow::Result<Ipv4Addr> {
    state
        .ip
        .ok_or_else(|| anyhow!("no IP address was discovered for '{}'", cfg.name))
}

async fn stage_validate<H, S>(cfg: &RunConfig, hypervisor: &H, shell: &S) -> anyhow::Result<()>
where
    H: Hypervisor,
    S: RemoteShell,
{
    let version = hypervisor
        .version()
        .await
        .context("VBoxManage is not usable on this host")?;
    debug!("VBoxManage version {version}");
    shell
        .preflight()
        .await
        .context("SSH tooling is not usable on this host")?;

    let source = hypervisor
        .vm_info(&cfg.base)
        .await
        .with_context(|| format!("source VM '{}' could not be inspected", cfg.base))?;
    if source.state != VmState::PoweredOff {
        bail!(
            "source VM '{}' must be powered off before cloning (currently {})",
            cfg.base,
            source.state.as_str()
        );
    }
    if hypervisor.vm_exists(&cfg.name).await? {
        bail!("a VM named '{}' is already registered", cfg.name);
    }
    info!("Preconditions hold for cloning '{}' -> '{}'", cfg.base, cfg.name);
    Ok(())
}

async fn stage_snapshot<H: Hypervisor>(cfg: &RunConfig, hypervisor: &H) -> anyhow::Result<()> {
    let existing = hypervisor.snapshot_list(&cfg.base).await?;
    if existing.iter().any(|s| s == &cfg.snapshot) {
        info!(
            "Snapshot '{}' already exists on '{}', reusing it",
            cfg.snapshot, cfg.base
        );
        return Ok(());
    }
    info!("Taking snapshot '{}' on '{}'", cfg.snapshot, cfg.base);
    hypervisor.snapshot_take(&cfg.base, &cfg.snapshot).await?;
    Ok(())
}

async fn stage_clone<H: Hypervisor>(cfg: &RunConfig, hypervisor: &H) -> anyhow::Result<()> {
    info!(
        "Creating linked clone '{}' from '{}'@'{}'",
        cfg.name, cfg.base, cfg.snapshot
    );
    hypervisor
        .clone_from_snapshot(&cfg.base, &cfg.snapshot, &cfg.name)
        .await?;
    Ok(())
}

async fn stage_mac<H: Hypervisor>(cfg: &RunConfig, hypervisor: &H) -> anyhow::Result<()> {
    // Fresh MACs keep the clone from fighting the base VM (or sibling
    // clones) over DHCP leases and ARP entries.
    info!("Regenerating MAC on NIC {}", cfg.config_nic);
    hypervisor.regenerate_mac(&cfg.name, cfg.config_nic).await?;
    if let Some(ssh_nic) = cfg.ssh_nic {
        if ssh_nic != cfg.config_nic {
            info!("Regenerating MAC on NIC {ssh_nic}");
            hypervisor.regenerate_mac(&cfg.name, ssh_nic).await?;
        }
    }
    Ok(())
}

async fn stage_network<H: Hypervisor>(cfg: &RunConfig, hypervisor: &H) -> anyhow::Result<()> {
    let nic = cfg.config_nic;
    match cfg.network {
        NetworkMode::Nat => {
            info!("Attaching NIC {nic} to NAT");
            hypervisor.attach_nat(&cfg.name, nic).await?;
        }
        NetworkMode::Bridged => {
            let interfaces = hypervisor.bridged_interfaces().await?;
            let interface = interfaces.first().cloned().unwrap_or_default();
            if interface.is_empty() {
                warn!("host reports no bridge-capable interfaces; the attach will fail");
            }
            info!("Attaching NIC {nic} to bridged interface '{interface}'");
            hypervisor.attach_bridged(&cfg.name, nic, &interface).await?;
        }
        NetworkMode::Hostonly => {
            let interfaces = hypervisor.hostonly_interfaces().await?;
            let interface = interfaces.first().cloned().unwrap_or_default();
            if interface.is_empty() {
                warn!("host reports no host-only interfaces; the attach will fail");
            }
            info!("Attaching NIC {nic} to host-only interface '{interface}'");
            hypervisor
                .attach_hostonly(&cfg.name, nic, &interface)
                .await?;
        }
        NetworkMode::Natnetwork => {
            // The source VM is assumed to already sit on the right NAT
            // network; the clone joins the same one.
            let network = hypervisor
                .nat_network_of(&cfg.base, nic)
                .await?
                .unwrap_or_default();
            if network.is_empty() {
                warn!(
                    "source VM '{}' reports no NAT network on NIC {nic}; the attach will fail",
                    cfg.base
                );
            }
            info!("Attaching NIC {nic} to NAT network '{network}'");
            hypervisor
                .attach_nat_network(&cfg.name, nic, &network)
                .await?;
        }
    }
    Ok(())
}

async fn stage_start<H: Hypervisor>(cfg: &RunConfig, hypervisor: &H) -> anyhow::Result<()> {
    info!(
        "Starting '{}' ({})",
        cfg.name,
        if cfg.headless { "headless" } else { "gui" }
    );
    hypervisor.start_vm(&cfg.name, cfg.headless).await?;
    if !cfg.dry_run {
        sleep(POST_START_PAUSE).await;
    }
    Ok(())
}

async fn stage_ip<H: Hypervisor>(
    cfg: &RunConfig,
    hypervisor: &H,
    state: &mut StageState,
) -> anyhow::Result<()> {
    state.ip = match cfg.ssh_nic {
        Some(adapter) => {
            info!("Waiting for an IP on adapter {adapter}");
            let found = ip::discover_targeted(
                hypervisor,
                &cfg.name,
                adapter,
                ip::TARGETED_ATTEMPTS,
                ip::TARGETED_DELAY,
            )
            .await
            .ok_or_else(|| {
                anyhow!(
                    "adapter {adapter} of '{}' never reported an IPv4 address",
                    cfg.name
                )
            })?;
            Some(found)
        }
        None => match ip::discover_auto(hypervisor, &cfg.name, ip::RACE_ATTEMPTS, ip::RACE_DELAY)
            .await
        {
            Some((adapter, found)) => {
                info!("Adapter {adapter} reported {found}");
                Some(found)
            }
            None => {
                warn!(
                    "no adapter of '{}' reported an IPv4 address; stages needing SSH will fail",
                    cfg.name
                );
                None
            }
        },
    };
    if let Some(found) = state.ip {
        info!("Guest IP: {found}");
    }
    Ok(())
}

async fn stage_ssh<S: RemoteShell>(
    cfg: &RunConfig,
    shell: &S,
    state: &mut StageState,
) -> anyhow::Result<()> {
    let host = require_ip(cfg, state)?;
    info!("Setting hostname to '{}'", cfg.hostname);
    shell
        .run_checked(
            host,
            &format!("sudo hostnamectl set-hostname {}", quote(&cfg.hostname)),
        )
        .await?;
    Ok(())
}

async fn stage_reboot<S: RemoteShell>(
    cfg: &RunConfig,
    shell: &S,
    state: &mut StageState,
) -> anyhow::Result<()> {
    let host = require_ip(cfg, state)?;
    info!("Rebooting '{}'", cfg.name);
    // The connection drops as the guest goes down; that is the expected
    // outcome, not a failure.
    match shell.run(host, "sudo reboot").await {
        Ok(out) if out.success => debug!("reboot accepted"),
        Ok(out) => debug!("reboot connection dropped (expected): {}", out.stderr.trim()),
        Err(e) => debug!("reboot connection dropped (expected): {e}"),
    }
    Ok(())
}

async fn stage_wait<S: RemoteShell>(
    cfg: &RunConfig,
    shell: &S,
    state: &mut StageState,
) -> anyhow::Result<()> {
    let host = require_ip(cfg, state)?;
    info!("Waiting for SSH on {host} to come back");
    let back = poll::until(SSH_WAIT_ATTEMPTS, SSH_WAIT_DELAY, || shell.reachable(host)).await;
    if !back {
        bail!(
            "'{}' did not answer SSH within {}s after the reboot",
            cfg.name,
            u64::from(SSH_WAIT_ATTEMPTS) * SSH_WAIT_DELAY.as_secs()
        );
    }
    info!("Guest is back");
    Ok(())
}

async fn stage_smoke_test<S: RemoteShell>(
    cfg: &RunConfig,
    shell: &S,
    state: &mut StageState,
) -> anyhow::Result<()> {
    if !cfg.github_key {
        info!("GitHub key provisioning disabled, skipping");
        return Ok(());
    }
    let host = require_ip(cfg, state)?;
    let nonce = Uuid::new_v4();
    let remote = format!("/tmp/vbclone-smoke-{nonce}.sh");

    let mut script = NamedTempFile::new().context("staging smoke-test script")?;
    writeln!(script, "#!/bin/sh")?;
    writeln!(script, "echo smoke-{nonce}")?;
    script.flush()?;

    shell.push(host, script.path(), &remote).await?;
    let out = shell
        .run_checked(host, &format!("sh {remote} && rm -f {remote}"))
        .await?;
    if !out.simulated && !out.stdout.contains(&format!("smoke-{nonce}")) {
        bail!("smoke-test script ran but did not echo its marker");
    }
    info!("File transfer and remote execution confirmed");
    Ok(())
}

fn default_tool_path() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join("github-ssh-key")))
        .unwrap_or_else(|| PathBuf::from("github-ssh-key"))
}

async fn stage_push_tool<S: RemoteShell>(
    cfg: &RunConfig,
    shell: &S,
    state: &mut StageState,
) -> anyhow::Result<()> {
    if !cfg.github_key {
        info!("GitHub key provisioning disabled, skipping");
        return Ok(());
    }
    let host = require_ip(cfg, state)?;
    let local = cfg.tool_path.clone().unwrap_or_else(default_tool_path);
    if !cfg.dry_run && !local.exists() {
        bail!(
            "guest tool not found at {} (build it alongside vbclone or pass --tool)",
            local.display()
        );
    }
    let remote = format!("/tmp/github-ssh-key-{}", Uuid::new_v4());
    info!("Pushing {} to {remote}", local.display());
    shell.push(host, &local, &remote).await?;
    state.staged_tool = Some(remote);
    Ok(())
}

async fn stage_install_tool<S: RemoteShell>(
    cfg: &RunConfig,
    shell: &S,
    state: &mut StageState,
) -> anyhow::Result<()> {
    if !cfg.github_key {
        info!("GitHub key provisioning disabled, skipping");
        return Ok(());
    }
    let host = require_ip(cfg, state)?;
    let staged = state
        .staged_tool
        .as_deref()
        .ok_or_else(|| anyhow!("push-tool did not stage the guest tool"))?;
    info!("Installing guest tool to {GUEST_TOOL_PATH}");
    shell
        .run_checked(
            host,
            &format!(
                "mkdir -p \"$HOME/.local/bin\" && install -m 0755 {staged} \"{GUEST_TOOL_PATH}\" && rm -f {staged}"
            ),
        )
        .await?;
    Ok(())
}

async fn stage_github_key<S: RemoteShell>(
    cfg: &RunConfig,
    shell: &S,
    state: &mut StageState,
) -> anyhow::Result<()> {
    if !cfg.github_key {
        info!("GitHub key provisioning disabled, skipping");
        return Ok(());
    }
    let host = require_ip(cfg, state)?;
    let email = format!("{}@{}", cfg.user, cfg.hostname);
    let mut command = format!("\"{GUEST_TOOL_PATH}\" --email {}", quote(&email));
    if cfg.github_key_upload {
        command.push_str(" --upload");
        match std::env::var("GITHUB_TOKEN") {
            Ok(token) if !token.is_empty() => {
                let prefix = if cfg.dry_run {
                    // Never render the secret in a simulated command line.
                    "GITHUB_TOKEN=**** ".to_string()
                } else {
                    format!("GITHUB_TOKEN={} ", quote(&token))
                };
                command.insert_str(0, &prefix);
            }
            _ => warn!("GITHUB_TOKEN is not set on the host; the guest upload may fail"),
        }
    }
    info!("Provisioning GitHub SSH key on the guest (as {})", cfg.user);
    shell.run_checked(host, &command).await?;
    Ok(())
}

async fn stage_summary<H: Hypervisor>(
    cfg: &RunConfig,
    hypervisor: &H,
    state: &StageState,
) -> anyhow::Result<()> {
    println!("---------------------------------------------");
    println!("VM:         {}", cfg.name);
    println!("Hostname:   {}", cfg.hostname);
    println!("Snapshot:   {} (base: {})", cfg.snapshot, cfg.base);
    println!(
        "Config NIC: {} ({})",
        cfg.config_nic,
        cfg.network.as_str()
    );
    match cfg.ssh_nic {
        Some(nic) => println!("SSH NIC:    {nic}"),
        None => println!("SSH NIC:    auto-detect"),
    }
    match state.ip {
        Some(found) => println!("IP:         {found}"),
        None => println!("IP:         not discovered"),
    }

    let adapters = ip::snapshot_all(hypervisor, &cfg.name).await;
    if adapters.is_empty() {
        println!("Adapters:   none reported");
    } else {
        println!("Adapters:");
        for (adapter, addr) in adapters {
            println!("  {adapter}: {addr}");
        }
    }

    // One last state read straight from the hypervisor, as a cross-check
    // against everything the pipeline believes it did.
    match hypervisor.vm_info(&cfg.name).await {
        Ok(info) => {
            println!("State:      {}", info.state.as_str());
            for nic in info.nics {
                println!("  nic{}: {}", nic.index, nic.mode);
            }
        }
        Err(e) => println!("State:      unavailable ({e})"),
    }
    println!("---------------------------------------------");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_order_matches_the_checkpoint_contract() {
        let names: Vec<&str> = Stage::ALL.iter().map(|s| s.name()).collect();
        assert_eq!(
            names,
            [
                "validate",
                "snapshot",
                "clone",
                "mac",
                "network",
                "start",
                "ip",
                "ssh",
                "reboot",
                "wait",
                "smoke-test",
                "push-tool",
                "install-tool",
                "github-ssh-key",
                "summary",
            ]
        );
    }
}
