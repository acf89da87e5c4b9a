use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use crate::error::{Error, Result};
use crate::secret::{CredentialPath, SecretString};

/// Narrow capability interface over the external secret store.
///
/// Reads return an empty value for absent entries; [`resolve_credential`]
/// turns that into the hard error required-credential lookups need.
#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn read(&self, path: &CredentialPath) -> Result<SecretString>;
    async fn write(&self, path: &CredentialPath, value: &str) -> Result<()>;
}

/// Read a credential that must be present, failing on empty values.
pub async fn resolve_credential(
    store: &dyn SecretStore,
    path: &CredentialPath,
) -> Result<SecretString> {
    let value = store.read(path).await?;
    if value.is_blank() {
        return Err(Error::MissingCredential {
            path: path.to_string(),
        });
    }
    Ok(value)
}

/// `pass`-backed store.  Each operation is a single short-lived subprocess;
/// the store directory override travels on the child's environment only.
pub struct PassStore {
    pass_bin: PathBuf,
    store_dir: Option<PathBuf>,
}

impl PassStore {
    pub fn new(store_dir: Option<PathBuf>) -> Result<Self> {
        let pass_bin = which::which("pass").map_err(|_| {
            Error::SecretStore("`pass` not found on PATH, install password-store".to_string())
        })?;
        Ok(Self { pass_bin, store_dir })
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.pass_bin);
        if let Some(dir) = &self.store_dir {
            cmd.env("PASSWORD_STORE_DIR", dir);
        }
        cmd
    }
}

#[async_trait]
impl SecretStore for PassStore {
    async fn read(&self, path: &CredentialPath) -> Result<SecretString> {
        let output = self
            .command()
            .arg("show")
            .arg(path.to_string())
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| Error::SecretStore(format!("unable to run pass: {}", e)))?;

        // pass exits non-zero for entries that don't exist; callers treat
        // empty as absent, so both cases collapse to an empty value here.
        if !output.status.success() {
            debug!(path = %path, "pass show returned non-zero, treating as absent");
            return Ok(SecretString::default());
        }

        let mut value = String::from_utf8_lossy(&output.stdout).into_owned();
        // pass appends exactly one newline; interior newlines (recovery
        // codes) must survive.
        if value.ends_with('\n') {
            value.pop();
        }
        Ok(SecretString::new(value))
    }

    async fn write(&self, path: &CredentialPath, value: &str) -> Result<()> {
        let mut child = self
            .command()
            .args(["insert", "-m", "-f"])
            .arg(path.to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| Error::SecretStore(format!("unable to run pass: {}", e)))?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::SecretStore("pass stdin unavailable".to_string()))?;
        stdin.write_all(value.as_bytes()).await?;
        stdin.write_all(b"\n").await?;
        drop(stdin);

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| Error::SecretStore(format!("pass did not exit cleanly: {}", e)))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::SecretStore(format!(
                "pass insert {} failed: {}",
                path,
                stderr.trim()
            )));
        }

        debug!(path = %path, "stored secret");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct MapStore(std::collections::HashMap<String, String>);

    #[async_trait]
    impl SecretStore for MapStore {
        async fn read(&self, path: &CredentialPath) -> Result<SecretString> {
            Ok(SecretString::new(
                self.0.get(&path.to_string()).cloned().unwrap_or_default(),
            ))
        }

        async fn write(&self, _path: &CredentialPath, _value: &str) -> Result<()> {
            Ok(())
        }
    }

    fn path(item: &str) -> CredentialPath {
        CredentialPath::new("bots", "acme.widgets", "github.com", item)
    }

    #[tokio::test]
    async fn resolve_present_credential() {
        let mut map = std::collections::HashMap::new();
        map.insert("bots/acme.widgets/github.com/username".to_string(), "bot".to_string());
        let store = MapStore(map);

        let value = resolve_credential(&store, &path("username")).await.unwrap();
        assert_eq!(value.expose(), "bot");
    }

    #[tokio::test]
    async fn resolve_absent_credential_fails() {
        let store = MapStore(std::collections::HashMap::new());

        let err = resolve_credential(&store, &path("password")).await.unwrap_err();
        match err {
            Error::MissingCredential { path } => {
                assert_eq!(path, "bots/acme.widgets/github.com/password");
            }
            other => panic!("expected MissingCredential, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn whitespace_only_counts_as_absent() {
        let mut map = std::collections::HashMap::new();
        map.insert("bots/acme.widgets/github.com/username".to_string(), "\n".to_string());
        let store = MapStore(map);

        assert!(resolve_credential(&store, &path("username")).await.is_err());
    }
}
