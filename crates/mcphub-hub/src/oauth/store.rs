//! On-disk OAuth state
//!
//! Client registrations and token sets live under a hub-owned
//! per-server directory: `<base>/servers/<name>/{client,tokens}.json`.
//! Files are written 0600 on Unix. Writes for one server are
//! serialized by the owning provider.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{de::DeserializeOwned, Serialize};
use tracing::debug;

use super::registration::ClientRegistration;
use super::token::StoredTokens;

const CLIENT_FILE: &str = "client.json";
const TOKENS_FILE: &str = "tokens.json";

/// Default base directory: `<data-dir>/mcp-hub`.
pub fn default_base_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("mcp-hub")
}

/// File-backed OAuth state for one server.
#[derive(Debug, Clone)]
pub struct OAuthStore {
    dir: PathBuf,
}

impl OAuthStore {
    pub fn new(base_dir: &Path, server: &str) -> Self {
        Self {
            dir: base_dir.join("servers").join(server),
        }
    }

    pub async fn load_registration(&self) -> Result<Option<ClientRegistration>> {
        self.read_json(CLIENT_FILE).await
    }

    pub async fn save_registration(&self, registration: &ClientRegistration) -> Result<()> {
        self.write_json(CLIENT_FILE, registration).await
    }

    pub async fn load_tokens(&self) -> Result<Option<StoredTokens>> {
        self.read_json(TOKENS_FILE).await
    }

    pub async fn save_tokens(&self, tokens: &StoredTokens) -> Result<()> {
        self.write_json(TOKENS_FILE, tokens).await
    }

    pub async fn clear_tokens(&self) -> Result<()> {
        let path = self.dir.join(TOKENS_FILE);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).context(format!("failed to remove '{}'", path.display())),
        }
    }

    async fn read_json<T: DeserializeOwned>(&self, file: &str) -> Result<Option<T>> {
        let path = self.dir.join(file);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e).context(format!("failed to read '{}'", path.display())),
        };
        let value = serde_json::from_slice(&bytes)
            .with_context(|| format!("corrupt OAuth state in '{}'", path.display()))?;
        Ok(Some(value))
    }

    async fn write_json<T: Serialize>(&self, file: &str, value: &T) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("failed to create '{}'", self.dir.display()))?;

        let path = self.dir.join(file);
        let bytes = serde_json::to_vec_pretty(value)?;
        tokio::fs::write(&path, bytes)
            .await
            .with_context(|| format!("failed to write '{}'", path.display()))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o600);
            tokio::fs::set_permissions(&path, perms).await?;
        }

        debug!(path = %path.display(), "OAuth state persisted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn store(dir: &Path) -> OAuthStore {
        OAuthStore::new(dir, "test-server")
    }

    #[tokio::test]
    async fn roundtrips_registration_and_tokens() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store(tmp.path());

        assert!(store.load_registration().await.unwrap().is_none());

        let registration = ClientRegistration {
            client_id: "c1".into(),
            client_secret: Some("s".into()),
            redirect_uri: "http://127.0.0.1:7100/callback".into(),
            issuer: "https://auth.example".into(),
        };
        store.save_registration(&registration).await.unwrap();
        let loaded = store.load_registration().await.unwrap().unwrap();
        assert_eq!(loaded.client_id, "c1");

        let tokens = StoredTokens {
            access_token: "at".into(),
            refresh_token: Some("rt".into()),
            obtained_at: Utc::now(),
            lifetime_secs: Some(3600),
        };
        store.save_tokens(&tokens).await.unwrap();
        let loaded = store.load_tokens().await.unwrap().unwrap();
        assert_eq!(loaded.lifetime_secs, Some(3600));

        store.clear_tokens().await.unwrap();
        assert!(store.load_tokens().await.unwrap().is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn token_file_is_private() {
        use std::os::unix::fs::PermissionsExt;

        let tmp = tempfile::tempdir().unwrap();
        let store = store(tmp.path());
        let tokens = StoredTokens {
            access_token: "at".into(),
            refresh_token: None,
            obtained_at: Utc::now(),
            lifetime_secs: None,
        };
        store.save_tokens(&tokens).await.unwrap();

        let path = tmp.path().join("servers/test-server/tokens.json");
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[tokio::test]
    async fn clearing_missing_tokens_is_fine() {
        let tmp = tempfile::tempdir().unwrap();
        store(tmp.path()).clear_tokens().await.unwrap();
    }
}
