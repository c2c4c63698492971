use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use kingdom_launcher::{
    config::LauncherConfig,
    detect,
    image::{has_extension, BIOS_EXTENSIONS, IMAGE_EXTENSIONS},
    install::{self, StandardInstaller},
    launch::Emulator,
    progress::{ConsoleProgress, LogProgress},
    prompt::{check_selection, ConsolePrompt, Prompt, PresetPrompt},
    session::{AuthClient, Session, SessionStore},
    InstallOutcome, InstallState, LauncherContext, NextAction,
};
use log::info;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "kingdom-launcher")]
#[command(about = "Installs the DaysFM mod and launches it in PCSX2")]
struct Cli {
    /// Config file (defaults to config.toml in the launcher data directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the install state of a version
    Status {
        #[arg(short, long)]
        version: Option<String>,
    },

    /// Download, patch and install a version
    Install {
        #[arg(short, long)]
        version: Option<String>,
        /// Answer yes to the "image ready?" question
        #[arg(short, long)]
        yes: bool,
        /// Clean disc image to patch (skips the file prompt)
        #[arg(short, long)]
        image: Option<PathBuf>,
        /// Log progress instead of drawing a progress bar
        #[arg(long)]
        no_progress: bool,
    },

    /// Launch an installed version
    Play {
        #[arg(short, long)]
        version: Option<String>,
    },

    /// Delete an installed version
    Uninstall {
        #[arg(short, long)]
        version: Option<String>,
        #[arg(short, long)]
        yes: bool,
    },

    /// List installable versions
    Versions,

    /// Store a token for the authorization service
    Login {
        #[arg(short, long)]
        token: String,
    },

    /// Remove the stored token
    Logout,

    /// Copy a BIOS dump into an installed emulator
    ImportBios {
        #[arg(short, long)]
        path: PathBuf,
        #[arg(short, long)]
        version: Option<String>,
    },

    /// Show the config file location, or write the defaults to it
    Config {
        /// Write a config file with every default filled in
        #[arg(long)]
        write_defaults: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let cli = Cli::parse();

    let config_path = match cli.config {
        Some(path) => path,
        None => LauncherConfig::default_path()?,
    };
    let config = LauncherConfig::load_from(&config_path)?;

    match cli.command {
        Commands::Status { version } => cmd_status(config, version.as_deref()),
        Commands::Install { version, yes, image, no_progress } => {
            cmd_install(config, version.as_deref(), yes, image, no_progress).await
        }
        Commands::Play { version } => cmd_play(config, version.as_deref()),
        Commands::Uninstall { version, yes } => cmd_uninstall(config, version.as_deref(), yes).await,
        Commands::Versions => cmd_versions(config).await,
        Commands::Login { token } => cmd_login(config, token).await,
        Commands::Logout => cmd_logout(),
        Commands::ImportBios { path, version } => cmd_import_bios(config, &path, version.as_deref()).await,
        Commands::Config { write_defaults } => cmd_config(&config_path, write_defaults),
    }
}

/// Stored session, checked against the service when one is configured
async fn load_session(config: &LauncherConfig) -> Result<Option<Session>> {
    let store = SessionStore::new()?;
    match &config.auth.base_url {
        Some(base) => {
            let client = AuthClient::new(base, config.request_timeout())?;
            store.load_verified(&client).await
        }
        None => Ok(None),
    }
}

fn cmd_status(config: LauncherConfig, version: Option<&str>) -> Result<()> {
    let ctx = LauncherContext::new(config, None);
    let version = ctx.resolve_version(version);
    let layout = ctx.layout(&version)?;
    let state = detect(&layout);

    println!("DaysFM v{}: {}", version, state);
    println!("  Location: {}", layout.version_dir().display());
    match state.next_action() {
        NextAction::Play => println!("  Run 'kingdom-launcher play' to start the game."),
        NextAction::Install if state == InstallState::EmulatorMissing => {
            println!("  PCSX2 is missing. Run 'kingdom-launcher install' to repair.")
        }
        NextAction::Install => println!("  Run 'kingdom-launcher install' to install."),
    }
    Ok(())
}

async fn cmd_install(
    config: LauncherConfig,
    version: Option<&str>,
    yes: bool,
    image: Option<PathBuf>,
    no_progress: bool,
) -> Result<()> {
    if let Some(image) = &image {
        if let Err(message) = check_selection(image, IMAGE_EXTENSIONS) {
            bail!("Invalid --image {}: {}", image.display(), message);
        }
    }

    let session = load_session(&config).await?;
    let ctx = LauncherContext::new(config, session);

    let cancel = ctx.cancel.clone();
    ctrlc::set_handler(move || {
        info!("Received shutdown signal");
        cancel.cancel();
    })
    .context("Failed to set Ctrl+C handler")?;

    let version = ctx.resolve_version(version);
    let installer = StandardInstaller::standard(&ctx, &version)?;

    let mut prompt = PresetPrompt::new(yes, image, ConsolePrompt::stdio());

    let outcome = if no_progress {
        installer.run(&mut prompt, &LogProgress).await
    } else {
        let progress = ConsoleProgress::new();
        let outcome = installer.run(&mut prompt, &progress).await;
        progress.finish(match &outcome {
            Ok(InstallOutcome::Installed) => "Done",
            Ok(InstallOutcome::Cancelled) => "Cancelled",
            Err(_) => "Failed",
        });
        outcome
    };

    match outcome {
        Ok(InstallOutcome::Installed) => {
            println!("✓ DaysFM v{} installed", version);
            println!("✓ Location: {}", installer.layout().version_dir().display());
            Ok(())
        }
        Ok(InstallOutcome::Cancelled) => {
            println!("Install cancelled.");
            Ok(())
        }
        Err(e) if e.is_cancelled() => bail!("Install interrupted: {}", e),
        Err(e) => Err(e).context("Install failed"),
    }
}

fn cmd_play(config: LauncherConfig, version: Option<&str>) -> Result<()> {
    let ctx = LauncherContext::new(config, None);
    let version = ctx.resolve_version(version);
    let layout = ctx.layout(&version)?;

    match detect(&layout) {
        InstallState::Installed => {}
        InstallState::EmulatorMissing => {
            bail!("PCSX2 is missing for v{}. Run 'kingdom-launcher install' to repair.", version)
        }
        InstallState::NotInstalled => {
            bail!("DaysFM v{} is not installed. Run 'kingdom-launcher install' first.", version)
        }
    }

    let emulator = Emulator::from_config(&ctx.config);
    let child = emulator.launch(&layout.emulator_executable(), &layout.image(), &layout.emulator_dir())?;

    println!("✓ PCSX2 started (pid {})", child.id());
    Ok(())
}

async fn cmd_uninstall(config: LauncherConfig, version: Option<&str>, yes: bool) -> Result<()> {
    let ctx = LauncherContext::new(config, None);
    let version = ctx.resolve_version(version);
    let layout = ctx.layout(&version)?;

    if !layout.version_dir().exists() {
        println!("DaysFM v{} is not installed.", version);
        return Ok(());
    }

    let question = format!("Delete {} and everything in it?", layout.version_dir().display());
    if !yes && !ConsolePrompt::stdio().confirm(&question) {
        println!("Uninstall cancelled.");
        return Ok(());
    }

    install::uninstall(&layout).await?;
    println!("✓ DaysFM v{} removed", version);
    Ok(())
}

async fn cmd_versions(config: LauncherConfig) -> Result<()> {
    let session = load_session(&config).await?;

    let versions = match (&session, &config.auth.base_url) {
        (Some(session), Some(base)) => {
            let client = AuthClient::new(base, config.request_timeout())?;
            client.list_versions(&session.token).await?
        }
        _ => config.version_names(),
    };

    if versions.is_empty() {
        println!("No versions available.");
        return Ok(());
    }

    let ctx = LauncherContext::new(config, session);
    for version in versions {
        let state = detect(&ctx.layout(&version)?);
        let marker = if version == ctx.config.default_version { "*" } else { " " };
        println!("{} {:<12} {}", marker, version, state);
    }
    Ok(())
}

async fn cmd_login(config: LauncherConfig, token: String) -> Result<()> {
    let base = config
        .auth
        .base_url
        .as_deref()
        .context("No authorization service configured. Set [auth] base_url in the config file.")?;

    let client = AuthClient::new(base, config.request_timeout())?;
    if !client.verify(&token).await? {
        bail!("Invalid token. Please check it and try again.");
    }

    let store = SessionStore::new()?;
    store.save(&Session::new(token))?;

    println!("✓ Logged in");
    println!("✓ Session saved to: {}", store.session_path().display());
    Ok(())
}

fn cmd_logout() -> Result<()> {
    let store = SessionStore::new()?;
    store.delete()?;
    println!("✓ Logged out. Session removed.");
    Ok(())
}

async fn cmd_import_bios(config: LauncherConfig, path: &Path, version: Option<&str>) -> Result<()> {
    if !has_extension(path, BIOS_EXTENSIONS) {
        bail!("Expected a .bin BIOS dump, got {}", path.display());
    }
    if !path.is_file() {
        bail!("File not found: {}", path.display());
    }

    let ctx = LauncherContext::new(config, None);
    let version = ctx.resolve_version(version);
    let layout = ctx.layout(&version)?;

    let target = install::import_bios(&layout, path).await?;
    println!("✓ BIOS copied to: {}", target.display());
    Ok(())
}

fn cmd_config(path: &Path, write_defaults: bool) -> Result<()> {
    if !write_defaults {
        println!("{}", path.display());
        if !path.exists() {
            println!("(not created yet, built-in defaults are in use)");
        }
        return Ok(());
    }

    if path.exists() && !ConsolePrompt::stdio().confirm(&format!("{} exists. Overwrite?", path.display())) {
        println!("Left unchanged.");
        return Ok(());
    }

    LauncherConfig::default().save_to(path)?;
    println!("✓ Default config written to: {}", path.display());
    Ok(())
}
