use crate::types::VersionList;
use anyhow::{bail, Context, Result};
use log::{info, warn};
use reqwest::{StatusCode, Url};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Bearer token issued by the authorization service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub token: String,
    #[serde(default)]
    pub saved_at: Option<String>,
}

impl Session {
    pub fn new(token: String) -> Self {
        Self {
            token,
            saved_at: Some(chrono::Utc::now().to_rfc3339()),
        }
    }
}

/// Persists the session token between runs
pub struct SessionStore {
    session_path: PathBuf,
}

impl SessionStore {
    pub fn new() -> Result<Self> {
        let data_dir = crate::config::data_dir()?;
        Ok(Self::with_path(data_dir.join("session.json")))
    }

    pub fn with_path(session_path: PathBuf) -> Self {
        Self { session_path }
    }

    pub fn load(&self) -> Result<Option<Session>> {
        if !self.session_path.exists() {
            return Ok(None);
        }

        let content = fs::read_to_string(&self.session_path)
            .context("Failed to read session file")?;

        let session: Session = serde_json::from_str(&content)
            .context("Failed to parse session file")?;

        Ok(Some(session))
    }

    pub fn save(&self, session: &Session) -> Result<()> {
        if let Some(parent) = self.session_path.parent() {
            fs::create_dir_all(parent).context("Failed to create launcher data directory")?;
        }

        let json = serde_json::to_string_pretty(session)
            .context("Failed to serialize session")?;

        fs::write(&self.session_path, json)
            .context("Failed to write session file")?;

        // The token is a credential
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mut perms = fs::metadata(&self.session_path)?.permissions();
            perms.set_mode(0o600);
            fs::set_permissions(&self.session_path, perms)?;
        }

        Ok(())
    }

    pub fn delete(&self) -> Result<()> {
        if self.session_path.exists() {
            fs::remove_file(&self.session_path)
                .context("Failed to delete session file")?;
        }
        Ok(())
    }

    /// Load the stored session and check it with the service. A token the
    /// service rejects is deleted so the next run asks for a new login.
    /// When the service cannot be reached the session is kept.
    pub async fn load_verified(&self, client: &AuthClient) -> Result<Option<Session>> {
        let Some(session) = self.load()? else {
            return Ok(None);
        };

        match client.verify(&session.token).await {
            Ok(true) => Ok(Some(session)),
            Ok(false) => {
                warn!("Stored session was rejected; log in again");
                self.delete()?;
                Ok(None)
            }
            Err(e) => {
                warn!("Could not verify session: {:#}", e);
                Ok(Some(session))
            }
        }
    }

    pub fn session_path(&self) -> &Path {
        &self.session_path
    }
}

/// Client for the authorization service that gates mod downloads
pub struct AuthClient {
    client: reqwest::Client,
    base_url: Url,
}

impl AuthClient {
    pub fn new(base_url: &str, request_timeout: Option<Duration>) -> Result<Self> {
        let mut base_url = Url::parse(base_url)
            .with_context(|| format!("Invalid authorization service URL {}", base_url))?;

        // Url::join drops the last path segment unless the base ends with '/'
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let client = reqwest::Client::builder()
            .timeout(request_timeout.unwrap_or(Duration::from_secs(30)))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self { client, base_url })
    }

    fn endpoint(&self, name: &str, query: &[(&str, &str)]) -> Result<Url> {
        let mut url = self.base_url.join(name).context("Failed to build service URL")?;
        url.query_pairs_mut().extend_pairs(query);
        Ok(url)
    }

    /// Versions the token is allowed to install
    pub async fn list_versions(&self, token: &str) -> Result<Vec<String>> {
        let url = self.endpoint("versions", &[("token", token)])?;

        let response = self.client.get(url)
            .send()
            .await
            .context("Failed to send request to authorization service")?;

        if !response.status().is_success() {
            bail!("Authorization service returned error: {}", response.status());
        }

        let versions: VersionList = response.json()
            .await
            .context("Failed to parse version list")?;

        Ok(versions.into_vec())
    }

    /// `Ok(false)` when the service rejects the token, `Err` when it cannot be asked
    pub async fn verify(&self, token: &str) -> Result<bool> {
        let url = self.endpoint("versions", &[("token", token)])?;

        let response = self.client.get(url)
            .send()
            .await
            .context("Failed to send request to authorization service")?;

        match response.status() {
            s if s.is_success() => Ok(true),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Ok(false),
            s => bail!("Authorization service returned error: {}", s),
        }
    }

    /// Authenticated download URL for one version's mod archive
    pub fn download_url(&self, token: &str, version: &str) -> Result<String> {
        let url = self.endpoint("download", &[("token", token), ("version", version)])?;
        info!("Using authenticated download for version {}", version);
        Ok(url.to_string())
    }
}
