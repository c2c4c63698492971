use crate::layout::InstallLayout;
use crate::types::InstallState;
use std::fs;

/// Classify an installed version by looking at the filesystem.
/// A zero-byte image counts as absent: it is what a failed copy leaves behind.
pub fn detect(layout: &InstallLayout) -> InstallState {
    let image_ok = fs::metadata(layout.image())
        .map(|m| m.is_file() && m.len() > 0)
        .unwrap_or(false);

    if !image_ok {
        return InstallState::NotInstalled;
    }

    if layout.emulator_executable().is_file() {
        InstallState::Installed
    } else {
        InstallState::EmulatorMissing
    }
}
