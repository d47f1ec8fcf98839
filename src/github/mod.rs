pub mod client;
pub mod errors;
pub mod models;

pub use client::{CredentialStore, GithubClient};
pub use errors::GithubError;
pub use models::SshKeyRecord;
