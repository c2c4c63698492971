//! The install pipeline.
//!
//! ```text
//! AcquiringImage -> DownloadingPrimaryAsset -> ExtractingPrimaryAsset
//!   -> DownloadingTranslationPatch -> DownloadingPatchTool -> ApplyingPatches
//!   -> DownloadingEmulator/ExtractingEmulator (skipped if present) -> Finalizing
//! ```
//!
//! Every step runs to completion before the next one starts. The existing
//! image at the installation root is copied, never moved, into the
//! workspace, and the patched result only replaces it once it exists. A run
//! that fails anywhere leaves the installation root as it was and the
//! workspace on disk for inspection.

use crate::context::LauncherContext;
use crate::download::DownloadClient;
use crate::error::{DownloadError, ExtractError, InstallError, PatchError};
use crate::extract::SevenZip;
use crate::image::{digest_matches, md5_file, IMAGE_EXTENSIONS};
use crate::layout::{InstallLayout, PATCH_EXTENSION};
use crate::patcher::Toolkit;
use crate::progress::ProgressSink;
use crate::prompt::Prompt;
use crate::session::AuthClient;
use crate::types::{InstallOutcome, PipelineStep};
use anyhow::Context;
use log::{info, warn};
use std::path::{Path, PathBuf};
use tokio::fs;

const IMAGE_READY_QUESTION: &str = "DaysFM requires a clean KH2FM ISO. Do you have one ready to select?";
const IMAGE_PICKER_TITLE: &str = "Select your clean Kingdom Hearts 2 Final Mix ISO";

#[allow(async_fn_in_trait)]
pub trait Downloader {
    async fn fetch(&self, url: &str, destination: &Path, progress: &dyn ProgressSink) -> Result<u64, DownloadError>;
}

#[allow(async_fn_in_trait)]
pub trait Extractor {
    async fn unpack(&self, archive: &Path, target_dir: &Path, progress: &dyn ProgressSink) -> Result<(), ExtractError>;
}

#[allow(async_fn_in_trait)]
pub trait Patcher {
    async fn patch(&self, tool: &Path, patch_files: &[String], progress: &dyn ProgressSink) -> Result<(), PatchError>;
}

impl Downloader for DownloadClient {
    async fn fetch(&self, url: &str, destination: &Path, progress: &dyn ProgressSink) -> Result<u64, DownloadError> {
        self.download(url, destination, |p| progress.percent(p)).await
    }
}

impl Extractor for SevenZip {
    async fn unpack(&self, archive: &Path, target_dir: &Path, progress: &dyn ProgressSink) -> Result<(), ExtractError> {
        self.extract(archive, target_dir, |p| progress.percent(p)).await
    }
}

impl Patcher for Toolkit {
    async fn patch(&self, tool: &Path, patch_files: &[String], progress: &dyn ProgressSink) -> Result<(), PatchError> {
        self.apply_patches(tool, patch_files, |line| progress.log(line)).await
    }
}

/// Where each remote asset comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetSources {
    pub archive_url: String,
    pub translation_patch_url: String,
    pub toolkit_url: String,
    pub emulator_url: String,
}

impl AssetSources {
    /// Resolve the sources for `version`. With a session and a configured
    /// authorization service the mod archive comes from the service.
    pub fn resolve(ctx: &LauncherContext, version: &str) -> anyhow::Result<Self> {
        let assets = &ctx.config.assets;

        let archive_url = match (&ctx.session, &ctx.config.auth.base_url) {
            (Some(session), Some(base)) => {
                AuthClient::new(base, ctx.config.request_timeout())?.download_url(&session.token, version)?
            }
            _ => ctx
                .config
                .archive_url(version)
                .map(str::to_string)
                .ok_or_else(|| InstallError::UnknownVersion(version.to_string()))?,
        };

        Ok(Self {
            archive_url,
            translation_patch_url: assets.translation_patch_url.clone(),
            toolkit_url: assets.toolkit_url.clone(),
            emulator_url: assets.emulator_url.clone(),
        })
    }
}

pub struct Installer<D, E, P> {
    layout: InstallLayout,
    sources: AssetSources,
    downloader: D,
    extractor: E,
    patcher: P,
    expected_md5: Option<String>,
}

pub type StandardInstaller = Installer<DownloadClient, SevenZip, Toolkit>;

impl StandardInstaller {
    /// Installer wired to the real HTTP client, 7-Zip and toolkit
    pub fn standard(ctx: &LauncherContext, version: &str) -> anyhow::Result<Self> {
        let limits = ctx.step_limits();
        let sources = AssetSources::resolve(ctx, version)?;

        let downloader = DownloadClient::new(ctx.config.request_timeout(), limits.clone())
            .context("Failed to create HTTP client")?;
        let extractor = SevenZip::new(ctx.config.tools.sevenzip.clone(), limits.clone());
        let patcher = Toolkit::new(ctx.config.tools.patch_runner.clone(), limits);

        Ok(Installer::new(ctx.layout(version)?, sources, downloader, extractor, patcher)
            .with_expected_md5(ctx.config.image.expected_md5.clone()))
    }
}

impl<D: Downloader, E: Extractor, P: Patcher> Installer<D, E, P> {
    pub fn new(layout: InstallLayout, sources: AssetSources, downloader: D, extractor: E, patcher: P) -> Self {
        Self {
            layout,
            sources,
            downloader,
            extractor,
            patcher,
            expected_md5: None,
        }
    }

    /// Reject user-selected images whose MD5 differs from `md5`
    pub fn with_expected_md5(mut self, md5: Option<String>) -> Self {
        self.expected_md5 = md5;
        self
    }

    pub fn layout(&self) -> &InstallLayout {
        &self.layout
    }

    pub fn downloader(&self) -> &D {
        &self.downloader
    }

    pub fn patcher(&self) -> &P {
        &self.patcher
    }

    /// Run the whole pipeline
    pub async fn run(&self, prompt: &mut dyn Prompt, progress: &dyn ProgressSink) -> Result<InstallOutcome, InstallError> {
        let workspace = self.layout.workspace();

        // Leftovers of a failed run must not be patched or finalized again
        match fs::remove_dir_all(workspace.dir()).await {
            Ok(()) => info!("Cleared workspace left by a previous run"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(InstallError::io("Failed to clear workspace", e)),
        }

        fs::create_dir_all(workspace.dir())
            .await
            .map_err(|e| InstallError::io("Failed to create workspace", e))?;

        info!("Installing DaysFM v{} into {}", self.layout.version(), self.layout.version_dir().display());

        progress.step(PipelineStep::AcquiringImage);
        if !self.acquire_image(prompt).await? {
            info!("Install cancelled at image selection");
            return Ok(InstallOutcome::Cancelled);
        }

        progress.step(PipelineStep::DownloadingPrimaryAsset);
        self.downloader
            .fetch(&self.sources.archive_url, &workspace.patch_archive(), progress)
            .await?;

        progress.step(PipelineStep::ExtractingPrimaryAsset);
        self.extractor
            .unpack(&workspace.patch_archive(), workspace.dir(), progress)
            .await?;

        progress.step(PipelineStep::DownloadingTranslationPatch);
        self.downloader
            .fetch(&self.sources.translation_patch_url, &workspace.translation_patch(), progress)
            .await?;

        progress.step(PipelineStep::DownloadingPatchTool);
        self.downloader
            .fetch(&self.sources.toolkit_url, &workspace.toolkit(), progress)
            .await?;

        progress.step(PipelineStep::ApplyingPatches);
        let patch_files = find_patch_files(workspace.dir()).await?;
        if patch_files.is_empty() {
            return Err(InstallError::NoPatchesFound);
        }
        self.patcher.patch(&workspace.toolkit(), &patch_files, progress).await?;

        self.acquire_emulator(progress).await?;

        progress.step(PipelineStep::Finalizing);
        self.finalize().await?;

        info!("DaysFM v{} installed", self.layout.version());
        Ok(InstallOutcome::Installed)
    }

    /// Put a working copy of the image in the workspace.
    /// Returns `false` when the user declines or cancels.
    async fn acquire_image(&self, prompt: &mut dyn Prompt) -> Result<bool, InstallError> {
        let installed = self.layout.image();
        let working = self.layout.workspace().image();

        if non_empty_file(&installed).await {
            info!("Found ISO. Copying to workspace...");
            fs::copy(&installed, &working)
                .await
                .map_err(|e| InstallError::io("Error copying ISO", e))?;
            return Ok(true);
        }

        if !prompt.confirm(IMAGE_READY_QUESTION) {
            return Ok(false);
        }
        let Some(selected) = prompt.select_file(IMAGE_PICKER_TITLE, IMAGE_EXTENSIONS) else {
            return Ok(false);
        };

        if let Some(expected) = &self.expected_md5 {
            let path = selected.clone();
            let actual = tokio::task::spawn_blocking(move || md5_file(&path))
                .await
                .map_err(|e| InstallError::io("Failed to hash ISO", std::io::Error::other(e)))?
                .map_err(|e| InstallError::io("Failed to hash ISO", e))?;
            if !digest_matches(&actual, expected) {
                return Err(InstallError::ImageMismatch { actual });
            }
        }

        info!("Copying {} to workspace", selected.display());
        fs::copy(&selected, &working)
            .await
            .map_err(|e| InstallError::io("Error copying ISO", e))?;

        Ok(true)
    }

    /// Fetch and unpack the emulator unless it is already installed. The
    /// package is unpacked next to its final place and renamed in, so a
    /// failed extraction never leaves a half-filled emulator directory behind.
    async fn acquire_emulator(&self, progress: &dyn ProgressSink) -> Result<(), InstallError> {
        let emulator_dir = self.layout.emulator_dir();
        if emulator_dir.is_dir() {
            info!("Emulator already present, skipping download");
            return Ok(());
        }

        let archive = self.layout.emulator_archive();
        let staging = self.layout.emulator_staging_dir();

        progress.step(PipelineStep::DownloadingEmulator);
        self.downloader
            .fetch(&self.sources.emulator_url, &archive, progress)
            .await?;

        progress.step(PipelineStep::ExtractingEmulator);
        if staging.exists() {
            fs::remove_dir_all(&staging)
                .await
                .map_err(|e| InstallError::io("Failed to clear emulator staging directory", e))?;
        }
        self.extractor.unpack(&archive, &staging, progress).await?;
        fs::rename(&staging, &emulator_dir)
            .await
            .map_err(|e| InstallError::io("Failed to move emulator into place", e))?;

        if let Err(e) = fs::remove_file(&archive).await {
            warn!("Could not remove {}: {}", archive.display(), e);
        }

        Ok(())
    }

    /// Swap the patched image into the installation root and drop the workspace
    async fn finalize(&self) -> Result<(), InstallError> {
        let workspace = self.layout.workspace();
        let patched = workspace.patched_image();

        if !non_empty_file(&patched).await {
            return Err(InstallError::Finalization { expected: patched });
        }

        fs::rename(&patched, self.layout.image())
            .await
            .map_err(|e| InstallError::io("Failed to move patched ISO into place", e))?;

        info!("Deleting temporary files...");
        if let Err(e) = fs::remove_dir_all(workspace.dir()).await {
            warn!("Temp folder warning: {}", e);
        }

        Ok(())
    }
}

/// Names of the patch files directly inside `dir`, sorted
pub async fn find_patch_files(dir: &Path) -> Result<Vec<String>, InstallError> {
    let mut entries = fs::read_dir(dir)
        .await
        .map_err(|e| InstallError::io("Failed to read workspace", e))?;

    let mut names = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| InstallError::io("Failed to read workspace", e))?
    {
        let path = entry.path();
        let is_patch = path.is_file()
            && path
                .extension()
                .and_then(|e| e.to_str())
                .map_or(false, |ext| ext.eq_ignore_ascii_case(PATCH_EXTENSION));

        if is_patch {
            if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                names.push(name.to_string());
            }
        }
    }

    names.sort();
    Ok(names)
}

async fn non_empty_file(path: &Path) -> bool {
    fs::metadata(path)
        .await
        .map(|m| m.is_file() && m.len() > 0)
        .unwrap_or(false)
}

/// Delete an installed version entirely. Returns whether anything was removed.
pub async fn uninstall(layout: &InstallLayout) -> Result<bool, InstallError> {
    let dir = layout.version_dir();
    if !dir.exists() {
        return Ok(false);
    }

    fs::remove_dir_all(dir)
        .await
        .map_err(|e| InstallError::io(format!("Failed to delete {}", dir.display()), e))?;

    info!("Removed {}", dir.display());
    Ok(true)
}

/// Copy a BIOS dump into the emulator's BIOS directory
pub async fn import_bios(layout: &InstallLayout, bios: &Path) -> Result<PathBuf, InstallError> {
    if !layout.emulator_dir().is_dir() {
        return Err(InstallError::EmulatorNotInstalled(layout.emulator_dir()));
    }

    let file_name = bios
        .file_name()
        .ok_or_else(|| InstallError::io("Invalid BIOS path", std::io::ErrorKind::InvalidInput.into()))?;

    let bios_dir = layout.bios_dir();
    fs::create_dir_all(&bios_dir)
        .await
        .map_err(|e| InstallError::io("Failed to create BIOS directory", e))?;

    let target = bios_dir.join(file_name);
    fs::copy(bios, &target)
        .await
        .map_err(|e| InstallError::io("Failed to copy BIOS", e))?;

    info!("BIOS copied to {}", target.display());
    Ok(target)
}
