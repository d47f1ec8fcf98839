use std::net::Ipv4Addr;

use log::debug;

use crate::exec::Executor;
use crate::vbox::errors::VboxError;
use crate::vbox::models::{
    accept_ipv4, machinereadable_value, parse_guest_property, parse_interface_names,
    parse_snapshot_names, parse_vm_list, VmInfo,
};

/// IP reported for any adapter while simulating: VirtualBox's default NAT
/// guest address, so downstream stages have something to thread through.
pub const SIMULATED_GUEST_IP: Ipv4Addr = Ipv4Addr::new(10, 0, 2, 15);

/// The narrow slice of hypervisor control this tooling consumes. The
/// production implementation shells out to `VBoxManage`; tests substitute an
/// in-memory fake that records calls.
#[allow(async_fn_in_trait)]
pub trait Hypervisor {
    async fn version(&self) -> Result<String, VboxError>;
    async fn list_vms(&self) -> Result<Vec<String>, VboxError>;
    async fn vm_exists(&self, name: &str) -> Result<bool, VboxError>;
    async fn vm_info(&self, name: &str) -> Result<VmInfo, VboxError>;
    async fn snapshot_list(&self, vm: &str) -> Result<Vec<String>, VboxError>;
    async fn snapshot_take(&self, vm: &str, snapshot: &str) -> Result<(), VboxError>;
    async fn clone_from_snapshot(
        &self,
        source: &str,
        snapshot: &str,
        new_name: &str,
    ) -> Result<(), VboxError>;
    async fn regenerate_mac(&self, vm: &str, nic: u8) -> Result<(), VboxError>;
    async fn attach_nat(&self, vm: &str, nic: u8) -> Result<(), VboxError>;
    async fn attach_bridged(&self, vm: &str, nic: u8, interface: &str) -> Result<(), VboxError>;
    async fn attach_hostonly(&self, vm: &str, nic: u8, interface: &str) -> Result<(), VboxError>;
    async fn attach_nat_network(&self, vm: &str, nic: u8, network: &str) -> Result<(), VboxError>;
    async fn start_vm(&self, vm: &str, headless: bool) -> Result<(), VboxError>;
    async fn poweroff_vm(&self, vm: &str) -> Result<(), VboxError>;
    async fn delete_vm(&self, vm: &str) -> Result<(), VboxError>;
    /// Current IPv4 on one adapter via the guest-property channel, if the
    /// guest has reported one. Adapter indices are 1-based.
    async fn guest_ip(&self, vm: &str, adapter: u8) -> Result<Option<Ipv4Addr>, VboxError>;
    async fn bridged_interfaces(&self) -> Result<Vec<String>, VboxError>;
    async fn hostonly_interfaces(&self) -> Result<Vec<String>, VboxError>;
    /// NAT-network name the given NIC of `vm` is attached to, if any.
    async fn nat_network_of(&self, vm: &str, nic: u8) -> Result<Option<String>, VboxError>;
}

/// `VBoxManage` CLI wrapper. All mutations flow through the executor so
/// dry-run renders them instead of running them; queries always execute.
pub struct VBoxManage {
    program: String,
    executor: Executor,
}

impl VBoxManage {
    pub fn new(executor: Executor) -> Self {
        Self::with_program("VBoxManage", executor)
    }

    pub fn with_program(program: &str, executor: Executor) -> Self {
        VBoxManage {
            program: program.to_string(),
            executor,
        }
    }

    async fn checked_query(&self, label: &str, args: &[&str]) -> Result<String, VboxError> {
        let out = self.executor.query(&self.program, args).await?;
        if !out.success {
            return Err(VboxError::command(label, &out.stderr));
        }
        Ok(out.stdout)
    }

    async fn checked_mutate(&self, label: &str, args: &[&str]) -> Result<(), VboxError> {
        let out = self.executor.mutate(&self.program, args).await?;
        if !out.success {
            return Err(VboxError::command(label, &out.stderr));
        }
        Ok(())
    }

    async fn showvminfo(&self, name: &str) -> Result<String, VboxError> {
        let out = self
            .executor
            .query(&self.program, &["showvminfo", name, "--machinereadable"])
            .await?;
        if !out.success {
            if out.stderr.contains("Could not find a registered machine") {
                return Err(VboxError::NotFound(name.to_string()));
            }
            return Err(VboxError::command("showvminfo", &out.stderr));
        }
        Ok(out.stdout)
    }
}

impl Hypervisor for VBoxManage {
    async fn version(&self) -> Result<String, VboxError> {
        let out = self.checked_query("--version", &["--version"]).await?;
        Ok(out.trim().to_string())
    }

    async fn list_vms(&self) -> Result<Vec<String>, VboxError> {
        let out = self.checked_query("list vms", &["list", "vms"]).await?;
        Ok(parse_vm_list(&out))
    }

    async fn vm_exists(&self, name: &str) -> Result<bool, VboxError> {
        Ok(self.list_vms().await?.iter().any(|vm| vm == name))
    }

    async fn vm_info(&self, name: &str) -> Result<VmInfo, VboxError> {
        let out = self.showvminfo(name).await?;
        VmInfo::parse(&out).ok_or_else(|| VboxError::Parse(format!("showvminfo for '{name}'")))
    }

    async fn snapshot_list(&self, vm: &str) -> Result<Vec<String>, VboxError> {
        let out = self
            .executor
            .query(
                &self.program,
                &["snapshot", vm, "list", "--machinereadable"],
            )
            .await?;
        if !out.success {
            // A VM without snapshots is reported as a failure, not an empty
            // list.
            if out.stderr.contains("does not have any snapshots")
                || out.stdout.contains("does not have any snapshots")
            {
                return Ok(Vec::new());
            }
            return Err(VboxError::command("snapshot list", &out.stderr));
        }
        Ok(parse_snapshot_names(&out.stdout))
    }

    async fn snapshot_take(&self, vm: &str, snapshot: &str) -> Result<(), VboxError> {
        self.checked_mutate("snapshot take", &["snapshot", vm, "take", snapshot])
            .await
    }

    async fn clone_from_snapshot(
        &self,
        source: &str,
        snapshot: &str,
        new_name: &str,
    ) -> Result<(), VboxError> {
        self.checked_mutate(
            "clonevm",
            &[
                "clonevm", source, "--snapshot", snapshot, "--options", "link", "--name",
                new_name, "--register",
            ],
        )
        .await
    }

    async fn regenerate_mac(&self, vm: &str, nic: u8) -> Result<(), VboxError> {
        let flag = format!("--macaddress{nic}");
        self.checked_mutate("modifyvm", &["modifyvm", vm, &flag, "auto"])
            .await
    }

    async fn attach_nat(&self, vm: &str, nic: u8) -> Result<(), VboxError> {
        let flag = format!("--nic{nic}");
        self.checked_mutate("modifyvm", &["modifyvm", vm, &flag, "nat"])
            .await
    }

    async fn attach_bridged(&self, vm: &str, nic: u8, interface: &str) -> Result<(), VboxError> {
        let nic_flag = format!("--nic{nic}");
        let adapter_flag = format!("--bridgeadapter{nic}");
        self.checked_mutate(
            "modifyvm",
            &["modifyvm", vm, &nic_flag, "bridged", &adapter_flag, interface],
        )
        .await
    }

    async fn attach_hostonly(&self, vm: &str, nic: u8, interface: &str) -> Result<(), VboxError> {
        let nic_flag = format!("--nic{nic}");
        let adapter_flag = format!("--hostonlyadapter{nic}");
        self.checked_mutate(
            "modifyvm",
            &["modifyvm", vm, &nic_flag, "hostonly", &adapter_flag, interface],
        )
        .await
    }

    async fn attach_nat_network(&self, vm: &str, nic: u8, network: &str) -> Result<(), VboxError> {
        let nic_flag = format!("--nic{nic}");
        let net_flag = format!("--nat-network{nic}");
        self.checked_mutate(
            "modifyvm",
            &["modifyvm", vm, &nic_flag, "natnetwork", &net_flag, network],
        )
        .await
    }

    async fn start_vm(&self, vm: &str, headless: bool) -> Result<(), VboxError> {
        let kind = if headless { "headless" } else { "gui" };
        self.checked_mutate("startvm", &["startvm", vm, "--type", kind])
            .await
    }

    async fn poweroff_vm(&self, vm: &str) -> Result<(), VboxError> {
        self.checked_mutate("controlvm", &["controlvm", vm, "poweroff"])
            .await
    }

    async fn delete_vm(&self, vm: &str) -> Result<(), VboxError> {
        self.checked_mutate("unregistervm", &["unregistervm", vm, "--delete"])
            .await
    }

    async fn guest_ip(&self, vm: &str, adapter: u8) -> Result<Option<Ipv4Addr>, VboxError> {
        if self.executor.dry_run {
            // The clone never boots in a simulated run; hand downstream
            // stages a placeholder so their logic still executes.
            return Ok(Some(SIMULATED_GUEST_IP));
        }
        // Guest properties index adapters from 0, the CLI surface from 1.
        let property = format!("/VirtualBox/GuestInfo/Net/{}/V4/IP", adapter - 1);
        let out = self
            .executor
            .query(&self.program, &["guestproperty", "get", vm, &property])
            .await?;
        if !out.success {
            return Err(VboxError::command("guestproperty get", &out.stderr));
        }
        let value = parse_guest_property(&out.stdout);
        debug!("guest property {property} on {vm}: {value:?}");
        Ok(value.as_deref().and_then(accept_ipv4))
    }

    async fn bridged_interfaces(&self) -> Result<Vec<String>, VboxError> {
        let out = self
            .checked_query("list bridgedifs", &["list", "bridgedifs"])
            .await?;
        Ok(parse_interface_names(&out))
    }

    async fn hostonly_interfaces(&self) -> Result<Vec<String>, VboxError> {
        let out = self
            .checked_query("list hostonlyifs", &["list", "hostonlyifs"])
            .await?;
        Ok(parse_interface_names(&out))
    }

    async fn nat_network_of(&self, vm: &str, nic: u8) -> Result<Option<String>, VboxError> {
        let out = self.showvminfo(vm).await?;
        // Field name changed across VirtualBox releases.
        let value = machinereadable_value(&out, &format!("nat-network{nic}"))
            .or_else(|| machinereadable_value(&out, &format!("natnet{nic}")));
        Ok(value.filter(|v| !v.is_empty() && v != "nat"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn dry_run_mutations_do_not_require_the_program() {
        // The program name cannot resolve; only the dry-run short-circuit
        // can make this succeed.
        let vbox = VBoxManage::with_program(
            "vboxmanage-test-missing",
            Executor::new(true, false),
        );
        vbox.start_vm("some-vm", true).await.unwrap();
        vbox.regenerate_mac("some-vm", 1).await.unwrap();
    }

    #[tokio::test]
    async fn dry_run_fabricates_a_guest_ip() {
        let vbox = VBoxManage::with_program(
            "vboxmanage-test-missing",
            Executor::new(true, false),
        );
        let ip = vbox.guest_ip("some-vm", 1).await.unwrap();
        assert_eq!(ip, Some(SIMULATED_GUEST_IP));
    }
}
