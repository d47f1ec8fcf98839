use anyhow::Context;
use inquire::{Confirm, Text};
use log::{error, info, warn};
use regex::Regex;

use crate::github::CredentialStore;
use crate::keys;
use crate::vbox::{Hypervisor, VmState};

#[derive(Debug, Clone, Default)]
pub struct TeardownOpts {
    pub filter: Option<String>,
    pub github_delete: bool,
    pub dry_run: bool,
    pub force: bool,
}

/// Interactive teardown: pick VMs from a numbered list, optionally delete
/// their paired GitHub keys, power them off and unregister them. Per-VM
/// failures are reported and the batch continues.
pub async fn run<H, C>(
    opts: &TeardownOpts,
    hypervisor: &H,
    store: Option<&C>,
) -> anyhow::Result<()>
where
    H: Hypervisor,
    C: CredentialStore,
{
    let mut vms = hypervisor.list_vms().await?;
    if let Some(pattern) = &opts.filter {
        let re = Regex::new(pattern).context("invalid --filter pattern")?;
        vms.retain(|name| re.is_match(name));
    }
    if vms.is_empty() {
        println!("No VMs match.");
        return Ok(());
    }

    for (position, name) in vms.iter().enumerate() {
        println!("{:>3}) {name}", position + 1);
    }
    let input = Text::new("VMs to delete (space-separated indices):")
        .prompt()
        .context("selection aborted")?;
    let picks = keys::parse_selection(&input, vms.len())?;

    println!("Selected:");
    for &index in &picks {
        println!("  {}", vms[index]);
    }
    if !opts.force {
        let confirmed = Confirm::new("Power off and delete the selected VMs?")
            .with_default(false)
            .prompt()
            .context("confirmation aborted")?;
        if !confirmed {
            println!("Cancelled.");
            return Ok(());
        }
    }

    for &index in &picks {
        let name = &vms[index];
        if let Err(e) = teardown_one(opts, hypervisor, store, name).await {
            error!("Teardown of '{name}' failed: {e:#}");
        }
    }
    Ok(())
}

async fn teardown_one<H, C>(
    opts: &TeardownOpts,
    hypervisor: &H,
    store: Option<&C>,
    name: &str,
) -> anyhow::Result<()>
where
    H: Hypervisor,
    C: CredentialStore,
{
    if opts.github_delete {
        match store {
            Some(_) if opts.dry_run => {
                println!("+ would delete the GitHub key titled '{name}'");
            }
            Some(store) => match keys::delete_by_title(store, name).await {
                Ok(true) => {}
                Ok(false) => info!("No GitHub key titled '{name}'"),
                // The VM still gets removed; a stale key is recoverable,
                // a half-deleted VM is not.
                Err(e) => error!("Could not delete the GitHub key for '{name}': {e}"),
            },
            None => warn!("no GitHub session; leaving any key titled '{name}' in place"),
        }
    }

    // State is queried, never assumed: only a running VM gets a poweroff.
    let info = hypervisor.vm_info(name).await?;
    if info.state == VmState::Running {
        info!("Powering off '{name}'");
        hypervisor.poweroff_vm(name).await?;
    }

    info!("Deleting '{name}'");
    hypervisor.delete_vm(name).await?;
    Ok(())
}
