use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use log::{debug, info, warn};
use rand_core::OsRng;
use ssh_key::{Algorithm, LineEnding, PrivateKey};

use crate::github::CredentialStore;

/// Zero-byte file whose existence means "this host is already provisioned".
pub const MARKER_FILE: &str = ".github-ssh-key.done";

/// The credential-store host the client-config stanza targets.
pub const STORE_HOST: &str = "github.com";

/// Per-host GitHub SSH key provisioner. All paths hang off `ssh_dir` so
/// tests can point it at a scratch directory.
#[derive(Debug, Clone)]
pub struct KeyProvisioner {
    pub ssh_dir: PathBuf,
    pub hostname: String,
    pub email: String,
    pub upload: bool,
    pub print: bool,
    pub force: bool,
}

impl KeyProvisioner {
    pub fn key_path(&self) -> PathBuf {
        self.ssh_dir.join(format!("id_ed25519_{}", self.hostname))
    }

    pub fn public_key_path(&self) -> PathBuf {
        self.ssh_dir.join(format!("id_ed25519_{}.pub", self.hostname))
    }

    pub fn marker_path(&self) -> PathBuf {
        self.ssh_dir.join(MARKER_FILE)
    }

    /// Run the full lifecycle: keypair, client config, known-hosts seed,
    /// optional upload, marker. `scanned_host_keys` is the output of
    /// `ssh-keyscan` against the store host, collected by the caller;
    /// `store` is only consulted when uploading.
    pub async fn run<C: CredentialStore>(
        &self,
        store: Option<&C>,
        scanned_host_keys: Option<&str>,
    ) -> anyhow::Result<()> {
        fs::create_dir_all(&self.ssh_dir)
            .with_context(|| format!("creating {}", self.ssh_dir.display()))?;

        if self.marker_path().exists() && !self.force {
            info!(
                "'{}' is already provisioned (marker present), nothing to do",
                self.hostname
            );
            if self.upload {
                // The marker wins over a late upload request; regeneration
                // via --force is the only way to upload after the fact.
                warn!(
                    "--upload requested but the provisioning marker exists; \
                     re-run with --force to regenerate and upload"
                );
            }
            if self.print {
                self.print_public_key()?;
            }
            return Ok(());
        }

        if self.force && self.key_path().exists() {
            warn!(
                "regenerating keypair for '{}'; any previously uploaded copy is not revoked",
                self.hostname
            );
        }

        self.generate_keypair()?;
        self.ensure_config_stanza()?;
        match scanned_host_keys {
            Some(keys) => self.append_known_hosts(keys)?,
            None => warn!("no host keys scanned; {STORE_HOST} will prompt on first connect"),
        }

        if self.upload {
            let Some(store) = store else {
                bail!(crate::github::GithubError::Unauthenticated);
            };
            let login = store.auth_status().await?;
            debug!("authenticated to the credential store as {login}");
            let public = fs::read_to_string(self.public_key_path())?;
            store.add_key(&self.hostname, &public).await?;
        }

        // Written last: its presence asserts everything above completed.
        fs::File::create(self.marker_path())?;
        info!("Provisioning complete for '{}'", self.hostname);

        if self.print {
            self.print_public_key()?;
        }
        Ok(())
    }

    fn generate_keypair(&self) -> anyhow::Result<()> {
        info!("Generating ed25519 keypair for '{}'", self.hostname);
        let private =
            PrivateKey::random(&mut OsRng, Algorithm::Ed25519).context("generating keypair")?;
        let mut public = private.public_key().clone();
        public.set_comment(&self.email);

        let pem = private
            .to_openssh(LineEnding::LF)
            .context("encoding private key")?;
        let key_path = self.key_path();
        fs::write(&key_path, pem.as_bytes())?;
        restrict_permissions(&key_path)?;

        let public_line = public.to_openssh().context("encoding public key")?;
        fs::write(self.public_key_path(), format!("{public_line}\n"))?;
        Ok(())
    }

    /// Append the client-config stanza unless a `Host github.com` pattern
    /// is already configured, so repeated --force runs do not pile up
    /// duplicates.
    fn ensure_config_stanza(&self) -> anyhow::Result<()> {
        let config_path = self.ssh_dir.join("config");
        let existing = fs::read_to_string(&config_path).unwrap_or_default();
        let present = existing.lines().any(|line| {
            line.trim()
                .strip_prefix("Host ")
                .map(|hosts| hosts.split_whitespace().any(|h| h == STORE_HOST))
                .unwrap_or(false)
        });
        if present {
            debug!("client config already has a {STORE_HOST} stanza");
            return Ok(());
        }

        let stanza = format!(
            "\nHost {STORE_HOST}\n  User git\n  IdentityFile {}\n  IdentitiesOnly yes\n",
            self.key_path().display()
        );
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&config_path)?;
        file.write_all(stanza.as_bytes())?;
        info!("Added {STORE_HOST} stanza to {}", config_path.display());
        Ok(())
    }

    /// Plain append; duplicate known-hosts lines across runs are tolerated.
    fn append_known_hosts(&self, scanned: &str) -> anyhow::Result<()> {
        let path = self.ssh_dir.join("known_hosts");
        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        file.write_all(scanned.as_bytes())?;
        if !scanned.ends_with('\n') {
            file.write_all(b"\n")?;
        }
        debug!("seeded {} with {STORE_HOST} host keys", path.display());
        Ok(())
    }

    fn print_public_key(&self) -> anyhow::Result<()> {
        let public = fs::read_to_string(self.public_key_path())
            .with_context(|| format!("reading {}", self.public_key_path().display()))?;
        print!("{public}");
        Ok(())
    }
}

fn restrict_permissions(path: &Path) -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
    }
    #[cfg(not(unix))]
    {
        let _ = path;
    }
    Ok(())
}

/// Short hostname of the machine we are running on: `$HOSTNAME` when set,
/// otherwise the `hostname` command, truncated at the first dot.
pub fn short_hostname() -> String {
    let full = std::env::var("HOSTNAME")
        .ok()
        .filter(|h| !h.trim().is_empty())
        .or_else(|| {
            std::process::Command::new("hostname")
                .output()
                .ok()
                .and_then(|out| String::from_utf8(out.stdout).ok())
                .map(|h| h.trim().to_string())
                .filter(|h| !h.is_empty())
        })
        .unwrap_or_else(|| "unknown-host".to_string());
    full.split('.').next().unwrap_or(&full).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::github::{GithubError, SshKeyRecord};
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeStore {
        authenticated: bool,
        added: Mutex<Vec<(String, String)>>,
    }

    impl CredentialStore for FakeStore {
        async fn auth_status(&self) -> Result<String, GithubError> {
            if self.authenticated {
                Ok("tester".to_string())
            } else {
                Err(GithubError::Unauthenticated)
            }
        }

        async fn list_keys(&self) -> Result<Vec<SshKeyRecord>, GithubError> {
            Ok(Vec::new())
        }

        async fn add_key(&self, title: &str, public_key: &str) -> Result<(), GithubError> {
            self.added
                .lock()
                .unwrap()
                .push((title.to_string(), public_key.to_string()));
            Ok(())
        }

        async fn delete_key(&self, _id: u64) -> Result<(), GithubError> {
            Ok(())
        }
    }

    fn provisioner(dir: &Path) -> KeyProvisioner {
        KeyProvisioner {
            ssh_dir: dir.to_path_buf(),
            hostname: "vm-a".to_string(),
            email: "ci@vm-a".to_string(),
            upload: false,
            print: false,
            force: false,
        }
    }

    #[tokio::test]
    async fn second_run_regenerates_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let tool = provisioner(dir.path());
        let store: Option<&FakeStore> = None;

        tool.run(store, Some("github.com ssh-ed25519 AAAA\n"))
            .await
            .unwrap();
        let key_before = fs::read(tool.key_path()).unwrap();
        let marker_mtime_before = fs::metadata(tool.marker_path()).unwrap().modified().unwrap();

        tool.run(store, Some("github.com ssh-ed25519 AAAA\n"))
            .await
            .unwrap();
        let key_after = fs::read(tool.key_path()).unwrap();
        let marker_mtime_after = fs::metadata(tool.marker_path()).unwrap().modified().unwrap();

        assert_eq!(key_before, key_after);
        assert_eq!(marker_mtime_before, marker_mtime_after);
    }

    #[tokio::test]
    async fn force_discards_the_old_keypair() {
        let dir = tempfile::tempdir().unwrap();
        let mut tool = provisioner(dir.path());
        let store: Option<&FakeStore> = None;

        tool.run(store, None).await.unwrap();
        let first = fs::read(tool.key_path()).unwrap();

        tool.force = true;
        tool.run(store, None).await.unwrap();
        let second = fs::read(tool.key_path()).unwrap();

        assert_ne!(first, second);
    }

    #[tokio::test]
    async fn upload_after_marker_is_not_retroactive() {
        let dir = tempfile::tempdir().unwrap();
        let mut tool = provisioner(dir.path());
        let store = FakeStore {
            authenticated: true,
            ..FakeStore::default()
        };

        tool.run(Some(&store), None).await.unwrap();
        tool.upload = true;
        tool.run(Some(&store), None).await.unwrap();

        assert!(store.added.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn upload_registers_the_key_under_the_hostname() {
        let dir = tempfile::tempdir().unwrap();
        let mut tool = provisioner(dir.path());
        tool.upload = true;
        let store = FakeStore {
            authenticated: true,
            ..FakeStore::default()
        };

        tool.run(Some(&store), None).await.unwrap();

        let added = store.added.lock().unwrap();
        assert_eq!(added.len(), 1);
        assert_eq!(added[0].0, "vm-a");
        assert!(added[0].1.starts_with("ssh-ed25519 "));
        assert!(added[0].1.contains("ci@vm-a"));
    }

    #[tokio::test]
    async fn unauthenticated_upload_fails_before_the_marker() {
        let dir = tempfile::tempdir().unwrap();
        let mut tool = provisioner(dir.path());
        tool.upload = true;
        let store = FakeStore::default();

        let err = tool.run(Some(&store), None).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<GithubError>(),
            Some(GithubError::Unauthenticated)
        ));
        assert!(!tool.marker_path().exists());
    }

    #[tokio::test]
    async fn config_stanza_is_not_duplicated() {
        let dir = tempfile::tempdir().unwrap();
        let mut tool = provisioner(dir.path());
        let store: Option<&FakeStore> = None;

        tool.run(store, None).await.unwrap();
        tool.force = true;
        tool.run(store, None).await.unwrap();

        let config = fs::read_to_string(dir.path().join("config")).unwrap();
        let stanzas = config
            .lines()
            .filter(|l| l.trim().starts_with("Host "))
            .count();
        assert_eq!(stanzas, 1);
    }

    #[tokio::test]
    async fn known_hosts_appends_are_tolerated_to_duplicate() {
        let dir = tempfile::tempdir().unwrap();
        let mut tool = provisioner(dir.path());
        let store: Option<&FakeStore> = None;
        let scanned = "github.com ssh-ed25519 AAAA\n";

        tool.run(store, Some(scanned)).await.unwrap();
        tool.force = true;
        tool.run(store, Some(scanned)).await.unwrap();

        let known = fs::read_to_string(dir.path().join("known_hosts")).unwrap();
        assert_eq!(known.matches("ssh-ed25519 AAAA").count(), 2);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn private_key_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let tool = provisioner(dir.path());
        let store: Option<&FakeStore> = None;
        tool.run(store, None).await.unwrap();
        let mode = fs::metadata(tool.key_path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
