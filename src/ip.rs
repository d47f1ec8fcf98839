use std::net::Ipv4Addr;
use std::time::Duration;

use log::{debug, info};

use crate::poll;
use crate::vbox::Hypervisor;

/// Budget for an explicitly requested adapter: up to 90 s of waiting.
pub const TARGETED_ATTEMPTS: u32 = 90;
pub const TARGETED_DELAY: Duration = Duration::from_secs(1);

/// Budget per adapter when racing across all of them; 8 adapters bound the
/// total wait at 80 s.
pub const RACE_ATTEMPTS: u32 = 10;
pub const RACE_DELAY: Duration = Duration::from_secs(1);

pub const FIRST_ADAPTER: u8 = 1;
pub const LAST_ADAPTER: u8 = 8;

/// Poll one adapter's guest property until it reports a valid IPv4 or the
/// budget runs out. Query errors count as "not yet ready" and are retried.
pub async fn discover_targeted<H: Hypervisor>(
    hypervisor: &H,
    vm: &str,
    adapter: u8,
    attempts: u32,
    delay: Duration,
) -> Option<Ipv4Addr> {
    poll::until_some(attempts, delay, || async {
        match hypervisor.guest_ip(vm, adapter).await {
            Ok(ip) => ip,
            Err(e) => {
                debug!("guest-property query on {vm} adapter {adapter}: {e}");
                None
            }
        }
    })
    .await
}

/// Race adapters 1..=8 in ascending index order with a small per-adapter
/// budget; the first adapter (by index, not by response time) holding a
/// valid address wins.
pub async fn discover_auto<H: Hypervisor>(
    hypervisor: &H,
    vm: &str,
    attempts_per_adapter: u32,
    delay: Duration,
) -> Option<(u8, Ipv4Addr)> {
    for adapter in FIRST_ADAPTER..=LAST_ADAPTER {
        info!("Probing adapter {adapter} for an IP address");
        if let Some(ip) =
            discover_targeted(hypervisor, vm, adapter, attempts_per_adapter, delay).await
        {
            return Some((adapter, ip));
        }
    }
    None
}

/// One-shot, no-retry view of every adapter's current address, for the
/// end-of-run summary.
pub async fn snapshot_all<H: Hypervisor>(hypervisor: &H, vm: &str) -> Vec<(u8, Ipv4Addr)> {
    let mut report = Vec::new();
    for adapter in FIRST_ADAPTER..=LAST_ADAPTER {
        if let Ok(Some(ip)) = hypervisor.guest_ip(vm, adapter).await {
            report.push((adapter, ip));
        }
    }
    report
}
