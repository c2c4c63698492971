// kingdom-launcher library
// Installs the DaysFM mod onto a user-supplied disc image and launches PCSX2

pub mod config;
pub mod context;
pub mod detect;
pub mod download;
pub mod error;
pub mod extract;
pub mod image;
pub mod install;
pub mod launch;
pub mod layout;
pub mod patcher;
pub mod progress;
pub mod prompt;
pub mod session;
pub mod types;

pub use config::LauncherConfig;
pub use context::LauncherContext;
pub use detect::detect;
pub use error::{DownloadError, ExtractError, InstallError, LaunchError, PatchError};
pub use install::Installer;
pub use layout::InstallLayout;
pub use types::*;
