use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const TOOLKIT_URL: &str =
    "https://github.com/DaRealLando123/DaysFM/releases/download/Tools/KH2FM.Toolkit.exe";
const ENGLISH_PATCH_URL: &str =
    "https://github.com/DaRealLando123/DaysFM/releases/download/Tools/English.Patch.kh2patch";
const PCSX2_URL: &str =
    "https://github.com/DaRealLando123/DaysFM/releases/download/Tools/PCSX2.1.6.0.7z";
const DEFAULT_VERSION: &str = "0.034";
const DEFAULT_ARCHIVE_URL: &str =
    "https://github.com/DaRealLando123/DaysFM/releases/download/Alpha/v0.034.Alpha.7z";

/// Launcher configuration, read from `config.toml` in the data directory.
/// Every field has a default so an empty or missing file is valid.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LauncherConfig {
    pub paths: PathsConfig,
    pub assets: AssetsConfig,
    pub default_version: String,
    /// Version name -> mod archive
    pub versions: BTreeMap<String, VersionConfig>,
    pub auth: AuthConfig,
    pub tools: ToolsConfig,
    pub emulator: EmulatorConfig,
    pub image: ImageConfig,
    pub install: InstallConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Parent of every per-version installation root
    #[serde(skip_serializing_if = "Option::is_none")]
    pub install_root: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AssetsConfig {
    pub translation_patch_url: String,
    pub toolkit_url: String,
    pub emulator_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionConfig {
    pub archive_url: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Authorization service exposing `/versions` and `/download`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    pub sevenzip: String,
    /// Program the patch tool is run through, e.g. `wine`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub patch_runner: Option<String>,
    /// Program the emulator is run through
    #[serde(skip_serializing_if = "Option::is_none")]
    pub emulator_runner: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmulatorConfig {
    /// Executable path relative to the emulator directory
    pub executable: String,
    pub args: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageConfig {
    /// MD5 of the clean disc image; unchecked when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected_md5: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct InstallConfig {
    /// Upper bound for any single download, extraction or patch step
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step_timeout_secs: Option<u64>,
    /// Timeout for establishing HTTP requests
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_timeout_secs: Option<u64>,
}

impl Default for LauncherConfig {
    fn default() -> Self {
        let mut versions = BTreeMap::new();
        versions.insert(
            DEFAULT_VERSION.to_string(),
            VersionConfig {
                archive_url: DEFAULT_ARCHIVE_URL.to_string(),
            },
        );

        Self {
            paths: PathsConfig::default(),
            assets: AssetsConfig::default(),
            default_version: DEFAULT_VERSION.to_string(),
            versions,
            auth: AuthConfig::default(),
            tools: ToolsConfig::default(),
            emulator: EmulatorConfig::default(),
            image: ImageConfig::default(),
            install: InstallConfig::default(),
        }
    }
}

impl Default for AssetsConfig {
    fn default() -> Self {
        Self {
            translation_patch_url: ENGLISH_PATCH_URL.to_string(),
            toolkit_url: TOOLKIT_URL.to_string(),
            emulator_url: PCSX2_URL.to_string(),
        }
    }
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            sevenzip: "7z".to_string(),
            patch_runner: None,
            emulator_runner: None,
        }
    }
}

impl Default for EmulatorConfig {
    fn default() -> Self {
        Self {
            executable: "pcsx2.exe".to_string(),
            args: vec!["--fullscreen".to_string(), "--nogui".to_string()],
        }
    }
}

impl LauncherConfig {
    /// Load the config from a specific file. A missing file yields defaults.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let config: LauncherConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        Ok(config)
    }

    /// Write the config to a specific file, creating its directory
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;

        fs::write(path, content).context("Failed to write config file")?;

        Ok(())
    }

    pub fn default_path() -> Result<PathBuf> {
        Ok(data_dir()?.join("config.toml"))
    }

    /// Directory holding one subdirectory per installed version
    pub fn install_root(&self) -> Result<PathBuf> {
        match &self.paths.install_root {
            Some(root) => Ok(root.clone()),
            None => Ok(data_dir()?.join("downloads")),
        }
    }

    pub fn archive_url(&self, version: &str) -> Option<&str> {
        self.versions.get(version).map(|v| v.archive_url.as_str())
    }

    pub fn version_names(&self) -> Vec<String> {
        self.versions.keys().cloned().collect()
    }

    pub fn step_timeout(&self) -> Option<Duration> {
        self.install.step_timeout_secs.map(Duration::from_secs)
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.install.request_timeout_secs.map(Duration::from_secs)
    }
}

/// Data directory shared by the config file and the session store
pub fn data_dir() -> Result<PathBuf> {
    let base = dirs::data_dir().context("Could not find data directory")?;
    Ok(base.join("kingdom-launcher"))
}
