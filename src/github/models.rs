use serde::{Deserialize, Serialize};

/// One public-key record in the credential store: opaque numeric id plus the
/// human-chosen title this tooling keys everything on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SshKeyRecord {
    pub id: u64,
    pub title: String,
    #[serde(default)]
    pub key: String,
}

#[derive(Debug, Serialize)]
pub struct NewKeyRequest<'a> {
    pub title: &'a str,
    pub key: &'a str,
}

#[derive(Debug, Deserialize)]
pub struct AuthenticatedUser {
    pub login: String,
}
