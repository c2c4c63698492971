use serde::{Deserialize, Serialize};
use std::fmt;

/// What the filesystem says about one installed version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InstallState {
    /// No disc image, or a zero-byte leftover from a failed copy
    NotInstalled,
    /// Patched image and emulator executable both present
    Installed,
    /// Patched image present but the emulator is gone
    EmulatorMissing,
}

impl InstallState {
    /// The action a front end should offer for this state
    pub fn next_action(&self) -> NextAction {
        match self {
            Self::Installed => NextAction::Play,
            Self::NotInstalled | Self::EmulatorMissing => NextAction::Install,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotInstalled => "not installed",
            Self::Installed => "installed",
            Self::EmulatorMissing => "emulator missing",
        }
    }
}

impl fmt::Display for InstallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextAction {
    Install,
    Play,
}

/// Steps of the install pipeline, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PipelineStep {
    AcquiringImage,
    DownloadingPrimaryAsset,
    ExtractingPrimaryAsset,
    DownloadingTranslationPatch,
    DownloadingPatchTool,
    ApplyingPatches,
    DownloadingEmulator,
    ExtractingEmulator,
    Finalizing,
}

impl PipelineStep {
    pub fn label(&self) -> &'static str {
        match self {
            Self::AcquiringImage => "Locating ISO",
            Self::DownloadingPrimaryAsset => "Downloading DaysFM",
            Self::ExtractingPrimaryAsset => "Extracting DaysFM",
            Self::DownloadingTranslationPatch => "Downloading English patch",
            Self::DownloadingPatchTool => "Downloading Toolkit",
            Self::ApplyingPatches => "Applying patches",
            Self::DownloadingEmulator => "Downloading PCSX2",
            Self::ExtractingEmulator => "Installing emulator",
            Self::Finalizing => "Finalizing",
        }
    }

    /// Whether the step reports percent progress
    pub fn has_percent(&self) -> bool {
        matches!(
            self,
            Self::DownloadingPrimaryAsset
                | Self::ExtractingPrimaryAsset
                | Self::DownloadingTranslationPatch
                | Self::DownloadingPatchTool
                | Self::DownloadingEmulator
                | Self::ExtractingEmulator
        )
    }
}

impl fmt::Display for PipelineStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// How an install run ended when it did not fail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallOutcome {
    Installed,
    /// The user declined or dismissed one of the image prompts
    Cancelled,
}

/// Version listing returned by the authorization service.
/// The worker has answered with both a bare array and a wrapped object.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum VersionList {
    Bare(Vec<String>),
    Wrapped { versions: Vec<String> },
}

impl VersionList {
    pub fn into_vec(self) -> Vec<String> {
        match self {
            Self::Bare(v) | Self::Wrapped { versions: v } => v,
        }
    }
}
