pub mod client;
pub mod errors;
pub mod models;

pub use client::{Hypervisor, VBoxManage};
pub use errors::VboxError;
pub use models::{accept_ipv4, NicAttachment, VmInfo, VmState};
