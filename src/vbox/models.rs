use std::net::Ipv4Addr;

/// Hypervisor-reported machine state, as printed in the `VMState` field of
/// `showvminfo --machinereadable`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VmState {
    PoweredOff,
    Running,
    Saved,
    Paused,
    Aborted,
    Other(String),
}

impl VmState {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "poweroff" => VmState::PoweredOff,
            "running" => VmState::Running,
            "saved" => VmState::Saved,
            "paused" => VmState::Paused,
            "aborted" => VmState::Aborted,
            other => VmState::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            VmState::PoweredOff => "poweroff",
            VmState::Running => "running",
            VmState::Saved => "saved",
            VmState::Paused => "paused",
            VmState::Aborted => "aborted",
            VmState::Other(s) => s,
        }
    }
}

/// One NIC line from `showvminfo`: adapter index and attachment mode
/// ("nat", "bridged", "hostonly", "natnetwork", "none", ...).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NicAttachment {
    pub index: u8,
    pub mode: String,
}

#[derive(Debug, Clone)]
pub struct VmInfo {
    pub state: VmState,
    pub nics: Vec<NicAttachment>,
}

impl VmInfo {
    pub fn parse(machinereadable: &str) -> Option<Self> {
        let state = VmState::parse(&machinereadable_value(machinereadable, "VMState")?);
        let mut nics = Vec::new();
        for index in 1..=8u8 {
            if let Some(mode) = machinereadable_value(machinereadable, &format!("nic{index}")) {
                if mode != "none" {
                    nics.push(NicAttachment { index, mode });
                }
            }
        }
        Some(VmInfo { state, nics })
    }
}

/// Extract one `key="value"` (or bare `key=value`) field from
/// `--machinereadable` output.
pub fn machinereadable_value(output: &str, key: &str) -> Option<String> {
    for line in output.lines() {
        let Some((k, v)) = line.split_once('=') else {
            continue;
        };
        if k.trim() == key {
            return Some(v.trim().trim_matches('"').to_string());
        }
    }
    None
}

/// Parse `VBoxManage list vms` output (`"name" {uuid}` per line) into names.
pub fn parse_vm_list(output: &str) -> Vec<String> {
    output
        .lines()
        .filter_map(|line| {
            let line = line.trim();
            let rest = line.strip_prefix('"')?;
            let end = rest.find('"')?;
            Some(rest[..end].to_string())
        })
        .collect()
}

/// Parse `VBoxManage list bridgedifs|hostonlyifs` output: every `Name:` line
/// names one interface, in the order the host reports them.
pub fn parse_interface_names(output: &str) -> Vec<String> {
    output
        .lines()
        .filter_map(|line| {
            let value = line.strip_prefix("Name:")?.trim();
            if value.is_empty() {
                None
            } else {
                Some(value.to_string())
            }
        })
        .collect()
}

/// Parse `VBoxManage guestproperty get` output. A set property prints
/// `Value: <v>`; an unset one prints `No value set!`.
pub fn parse_guest_property(output: &str) -> Option<String> {
    for line in output.lines() {
        if let Some(value) = line.strip_prefix("Value:") {
            return Some(value.trim().to_string());
        }
    }
    None
}

/// Snapshot names from `snapshot <vm> list --machinereadable`
/// (`SnapshotName="base-clean"`, `SnapshotName-1="second"`, ...).
pub fn parse_snapshot_names(output: &str) -> Vec<String> {
    output
        .lines()
        .filter_map(|line| {
            let (k, v) = line.split_once('=')?;
            if k.starts_with("SnapshotName") {
                Some(v.trim().trim_matches('"').to_string())
            } else {
                None
            }
        })
        .collect()
}

/// Accept a guest-property value only if the whole trimmed string is a
/// dotted-quad IPv4 address. Empty strings, partial values and placeholders
/// like "No value set!" all fall out here.
pub fn accept_ipv4(raw: &str) -> Option<Ipv4Addr> {
    raw.trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SHOWVMINFO: &str = r#"name="ci-worker-3"
VMState="poweroff"
nic1="nat"
natnet1="nat"
nic2="hostonly"
hostonlyadapter2="vboxnet0"
nic3="none"
nic4="none"
"#;

    #[test]
    fn machinereadable_fields() {
        assert_eq!(
            machinereadable_value(SHOWVMINFO, "VMState").as_deref(),
            Some("poweroff")
        );
        assert_eq!(
            machinereadable_value(SHOWVMINFO, "hostonlyadapter2").as_deref(),
            Some("vboxnet0")
        );
        assert_eq!(machinereadable_value(SHOWVMINFO, "nic9"), None);
    }

    #[test]
    fn vm_info_collects_attached_nics_only() {
        let info = VmInfo::parse(SHOWVMINFO).unwrap();
        assert_eq!(info.state, VmState::PoweredOff);
        assert_eq!(info.nics.len(), 2);
        assert_eq!(info.nics[0].index, 1);
        assert_eq!(info.nics[0].mode, "nat");
        assert_eq!(info.nics[1].index, 2);
        assert_eq!(info.nics[1].mode, "hostonly");
    }

    #[test]
    fn vm_list_lines() {
        let out = "\"base-image\" {0c5f...}\n\"ci-worker-1\" {9a1b...}\n";
        assert_eq!(parse_vm_list(out), vec!["base-image", "ci-worker-1"]);
    }

    #[test]
    fn interface_name_lines() {
        let out = "Name:            vboxnet0\nGUID:            786f...\nDHCP:            Disabled\nName:            vboxnet1\n";
        assert_eq!(parse_interface_names(out), vec!["vboxnet0", "vboxnet1"]);
    }

    #[test]
    fn guest_property_value_and_absence() {
        assert_eq!(
            parse_guest_property("Value: 192.168.56.101\n").as_deref(),
            Some("192.168.56.101")
        );
        assert_eq!(parse_guest_property("No value set!\n"), None);
    }

    #[test]
    fn snapshot_names() {
        let out = "SnapshotName=\"base-clean\"\nSnapshotUUID=\"...\"\nSnapshotName-1=\"after-updates\"\n";
        assert_eq!(
            parse_snapshot_names(out),
            vec!["base-clean", "after-updates"]
        );
    }

    #[test]
    fn ipv4_acceptance_vectors() {
        assert_eq!(accept_ipv4("192.168.1.5"), "192.168.1.5".parse().ok());
        assert_eq!(accept_ipv4("10.0.0.255"), "10.0.0.255".parse().ok());
        assert_eq!(accept_ipv4(""), None);
        assert_eq!(accept_ipv4("256.1.1.1"), None);
        assert_eq!(accept_ipv4("no value set"), None);
        assert_eq!(accept_ipv4("10.0.0"), None);
    }
}
