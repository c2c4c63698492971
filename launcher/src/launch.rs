use crate::config::LauncherConfig;
use crate::error::LaunchError;
use log::info;
use std::path::Path;
use std::process::{Child, Command, Stdio};

/// Starts PCSX2 on the patched image. The emulator runs on its own: it is
/// never waited on and its exit status is never looked at.
pub struct Emulator {
    args: Vec<String>,
    runner: Option<String>,
}

impl Emulator {
    pub fn new(args: Vec<String>, runner: Option<String>) -> Self {
        Self { args, runner }
    }

    pub fn from_config(config: &LauncherConfig) -> Self {
        Self::new(config.emulator.args.clone(), config.tools.emulator_runner.clone())
    }

    /// Spawn `executable` with the image path followed by the configured flags.
    /// `working_dir` should be the emulator directory so it finds its plugins and BIOS.
    pub fn launch(&self, executable: &Path, image: &Path, working_dir: &Path) -> Result<Child, LaunchError> {
        if !executable.is_file() {
            return Err(LaunchError::NotFound(executable.to_path_buf()));
        }

        info!("Launching emulator: {}", executable.display());
        info!("Loading ISO: {}", image.display());

        let mut command = match &self.runner {
            Some(runner) => {
                let mut c = Command::new(runner);
                c.arg(executable);
                c
            }
            None => Command::new(executable),
        };

        command
            .arg(image)
            .args(&self.args)
            .current_dir(working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(LaunchError::Spawn)
    }
}
