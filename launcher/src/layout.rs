use std::path::{Path, PathBuf};

pub const IMAGE_FILE: &str = "KH2FM.iso";
/// Name the patch tool gives its output image
pub const PATCHED_IMAGE_FILE: &str = "KH2FM.NEW.ISO";
pub const EMULATOR_DIR: &str = "PCSX2";
pub const WORKSPACE_DIR: &str = "temp_build";
pub const PATCH_ARCHIVE_FILE: &str = "patch_archive.zip";
pub const TRANSLATION_PATCH_FILE: &str = "English.kh2patch";
pub const TOOLKIT_FILE: &str = "KH2FM Toolkit.exe";
pub const EMULATOR_ARCHIVE_FILE: &str = "pcsx2_install.7z";
pub const PATCH_EXTENSION: &str = "kh2patch";

/// Filesystem layout of one installed version:
///
/// ```text
/// <root>/<version>/KH2FM.iso
/// <root>/<version>/PCSX2/pcsx2.exe
/// <root>/<version>/temp_build/...      (only while installing)
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallLayout {
    version: String,
    version_dir: PathBuf,
    emulator_executable: String,
}

impl InstallLayout {
    pub fn new(root: &Path, version: &str, emulator_executable: &str) -> Self {
        Self {
            version: version.to_string(),
            version_dir: root.join(version),
            emulator_executable: emulator_executable.to_string(),
        }
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// The installation root for this version
    pub fn version_dir(&self) -> &Path {
        &self.version_dir
    }

    pub fn image(&self) -> PathBuf {
        self.version_dir.join(IMAGE_FILE)
    }

    pub fn emulator_dir(&self) -> PathBuf {
        self.version_dir.join(EMULATOR_DIR)
    }

    pub fn emulator_executable(&self) -> PathBuf {
        self.emulator_dir().join(&self.emulator_executable)
    }

    pub fn bios_dir(&self) -> PathBuf {
        self.emulator_dir().join("bios")
    }

    /// Extraction target while the emulator package is being unpacked
    pub fn emulator_staging_dir(&self) -> PathBuf {
        self.version_dir.join(format!("{}.partial", EMULATOR_DIR))
    }

    pub fn emulator_archive(&self) -> PathBuf {
        self.version_dir.join(EMULATOR_ARCHIVE_FILE)
    }

    pub fn workspace(&self) -> Workspace {
        Workspace {
            dir: self.version_dir.join(WORKSPACE_DIR),
        }
    }
}

/// The transient `temp_build` directory of an install run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workspace {
    dir: PathBuf,
}

impl Workspace {
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn image(&self) -> PathBuf {
        self.dir.join(IMAGE_FILE)
    }

    pub fn patched_image(&self) -> PathBuf {
        self.dir.join(PATCHED_IMAGE_FILE)
    }

    pub fn patch_archive(&self) -> PathBuf {
        self.dir.join(PATCH_ARCHIVE_FILE)
    }

    pub fn translation_patch(&self) -> PathBuf {
        self.dir.join(TRANSLATION_PATCH_FILE)
    }

    pub fn toolkit(&self) -> PathBuf {
        self.dir.join(TOOLKIT_FILE)
    }

    pub fn exists(&self) -> bool {
        self.dir.is_dir()
    }
}
