use kingdom_launcher::install::{find_patch_files, AssetSources, Downloader, Extractor, Installer, Patcher};
use kingdom_launcher::progress::ProgressSink;
use kingdom_launcher::prompt::Prompt;
use kingdom_launcher::{
    detect, DownloadError, ExtractError, InstallError, InstallLayout, InstallOutcome, InstallState, PatchError,
    PipelineStep,
};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tempfile::TempDir;

const ARCHIVE_URL: &str = "https://mods.test/v0.034.Alpha.7z";
const TRANSLATION_URL: &str = "https://mods.test/English.kh2patch";
const TOOLKIT_URL: &str = "https://mods.test/KH2FM%20Toolkit.exe";
const EMULATOR_URL: &str = "https://mods.test/pcsx2.7z";

fn sources() -> AssetSources {
    AssetSources {
        archive_url: ARCHIVE_URL.to_string(),
        translation_patch_url: TRANSLATION_URL.to_string(),
        toolkit_url: TOOLKIT_URL.to_string(),
        emulator_url: EMULATOR_URL.to_string(),
    }
}

/// Writes the URL into the destination file
#[derive(Default)]
struct FakeDownloader {
    fail_on: Option<&'static str>,
    calls: Mutex<Vec<String>>,
}

impl Downloader for FakeDownloader {
    async fn fetch(&self, url: &str, destination: &Path, _progress: &dyn ProgressSink) -> Result<u64, DownloadError> {
        self.calls.lock().unwrap().push(url.to_string());
        if self.fail_on == Some(url) {
            return Err(DownloadError::Http {
                status: 404,
                url: url.to_string(),
                body: "Not Found".to_string(),
            });
        }
        std::fs::write(destination, url).map_err(|source| DownloadError::Io {
            path: destination.to_path_buf(),
            source,
        })?;
        Ok(url.len() as u64)
    }
}

/// Unpacks the mod archive into patch files and anything else into an emulator
struct FakeExtractor {
    patches: Vec<&'static str>,
    fail_emulator: bool,
}

impl Default for FakeExtractor {
    fn default() -> Self {
        Self {
            patches: vec!["mod.kh2patch"],
            fail_emulator: false,
        }
    }
}

impl Extractor for FakeExtractor {
    async fn unpack(&self, archive: &Path, target_dir: &Path, progress: &dyn ProgressSink) -> Result<(), ExtractError> {
        let io = |e: std::io::Error| ExtractError::Tool {
            code: None,
            message: e.to_string(),
        };
        std::fs::create_dir_all(target_dir).map_err(io)?;

        if archive.file_name().and_then(|n| n.to_str()) == Some("patch_archive.zip") {
            for patch in &self.patches {
                std::fs::write(target_dir.join(patch), b"patch").map_err(io)?;
            }
            std::fs::write(target_dir.join("readme.txt"), b"read me").map_err(io)?;
        } else {
            if self.fail_emulator {
                std::fs::write(target_dir.join("half.dll"), b"").map_err(io)?;
                return Err(ExtractError::Tool {
                    code: Some(2),
                    message: "Data Error : pcsx2.exe".to_string(),
                });
            }
            std::fs::write(target_dir.join("pcsx2.exe"), b"MZ").map_err(io)?;
        }

        progress.percent(100);
        Ok(())
    }
}

/// Writes `KH2FM.NEW.ISO` next to the tool, derived from the working image
struct FakePatcher {
    produce_output: bool,
    applied: Mutex<Vec<String>>,
}

impl FakePatcher {
    fn new() -> Self {
        Self {
            produce_output: true,
            applied: Mutex::new(Vec::new()),
        }
    }
}

impl Patcher for FakePatcher {
    async fn patch(&self, tool: &Path, patch_files: &[String], _progress: &dyn ProgressSink) -> Result<(), PatchError> {
        self.applied.lock().unwrap().extend(patch_files.iter().cloned());
        if !self.produce_output {
            return Ok(());
        }
        let workspace = tool.parent().unwrap();
        let mut image = std::fs::read(workspace.join("KH2FM.iso"))?;
        image.extend_from_slice(b"+patched");
        std::fs::write(workspace.join("KH2FM.NEW.ISO"), image)?;
        Ok(())
    }
}

struct ScriptedPrompt {
    confirm: bool,
    file: Option<PathBuf>,
    asked: usize,
}

impl ScriptedPrompt {
    fn new(confirm: bool, file: Option<PathBuf>) -> Self {
        Self { confirm, file, asked: 0 }
    }
}

impl Prompt for ScriptedPrompt {
    fn confirm(&mut self, _message: &str) -> bool {
        self.asked += 1;
        self.confirm
    }

    fn select_file(&mut self, _title: &str, extensions: &[&str]) -> Option<PathBuf> {
        self.asked += 1;
        assert_eq!(extensions, ["iso"]);
        self.file.take()
    }
}

#[derive(Default)]
struct RecordingProgress {
    steps: Mutex<Vec<PipelineStep>>,
}

impl ProgressSink for RecordingProgress {
    fn step(&self, step: PipelineStep) {
        self.steps.lock().unwrap().push(step);
    }

    fn percent(&self, _percent: u8) {}

    fn log(&self, _line: &str) {}
}

struct Fixture {
    dir: TempDir,
    layout: InstallLayout,
}

impl Fixture {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let layout = InstallLayout::new(&dir.path().join("downloads"), "0.034", "pcsx2.exe");
        Self { dir, layout }
    }

    fn clean_image(&self) -> PathBuf {
        let path = self.dir.path().join("Kingdom Hearts II Final Mix.iso");
        std::fs::write(&path, b"CLEAN").unwrap();
        path
    }

    /// A previous install: patched image plus emulator
    fn previous_install(&self) {
        std::fs::create_dir_all(self.layout.emulator_dir()).unwrap();
        std::fs::write(self.layout.emulator_executable(), b"MZ").unwrap();
        std::fs::write(self.layout.image(), b"OLD").unwrap();
    }

    fn installer(
        &self,
        downloader: FakeDownloader,
        extractor: FakeExtractor,
        patcher: FakePatcher,
    ) -> Installer<FakeDownloader, FakeExtractor, FakePatcher> {
        Installer::new(self.layout.clone(), sources(), downloader, extractor, patcher)
    }
}

#[tokio::test]
async fn test_fresh_install_end_to_end() {
    let fx = Fixture::new();
    let selected = fx.clean_image();
    let installer = fx.installer(FakeDownloader::default(), FakeExtractor::default(), FakePatcher::new());

    let mut prompt = ScriptedPrompt::new(true, Some(selected.clone()));
    let progress = RecordingProgress::default();
    let outcome = installer.run(&mut prompt, &progress).await.unwrap();

    assert_eq!(outcome, InstallOutcome::Installed);
    assert_eq!(detect(&fx.layout), InstallState::Installed);
    assert_eq!(std::fs::read(fx.layout.image()).unwrap(), b"CLEAN+patched");

    // The user's image is copied, never consumed
    assert_eq!(std::fs::read(&selected).unwrap(), b"CLEAN");

    assert!(!fx.layout.workspace().exists());
    assert!(!fx.layout.emulator_archive().exists());
    assert!(!fx.layout.emulator_staging_dir().exists());

    assert_eq!(downloads(&installer), vec![ARCHIVE_URL, TRANSLATION_URL, TOOLKIT_URL, EMULATOR_URL]);

    assert_eq!(
        *progress.steps.lock().unwrap(),
        vec![
            PipelineStep::AcquiringImage,
            PipelineStep::DownloadingPrimaryAsset,
            PipelineStep::ExtractingPrimaryAsset,
            PipelineStep::DownloadingTranslationPatch,
            PipelineStep::DownloadingPatchTool,
            PipelineStep::ApplyingPatches,
            PipelineStep::DownloadingEmulator,
            PipelineStep::ExtractingEmulator,
            PipelineStep::Finalizing,
        ]
    );
}

fn downloads(installer: &Installer<FakeDownloader, FakeExtractor, FakePatcher>) -> Vec<String> {
    installer.downloader().calls.lock().unwrap().clone()
}

#[tokio::test]
async fn test_patches_are_applied_in_name_order() {
    let fx = Fixture::new();
    let selected = fx.clean_image();
    let extractor = FakeExtractor {
        patches: vec!["zz_fixes.kh2patch", "mod.kh2patch"],
        fail_emulator: false,
    };
    let installer = fx.installer(FakeDownloader::default(), extractor, FakePatcher::new());

    let mut prompt = ScriptedPrompt::new(true, Some(selected));
    installer.run(&mut prompt, &RecordingProgress::default()).await.unwrap();

    assert_eq!(
        *installer.patcher().applied.lock().unwrap(),
        vec!["English.kh2patch", "mod.kh2patch", "zz_fixes.kh2patch"]
    );
}

#[tokio::test]
async fn test_declining_the_image_prompt_cancels() {
    let fx = Fixture::new();
    let installer = fx.installer(FakeDownloader::default(), FakeExtractor::default(), FakePatcher::new());

    let mut prompt = ScriptedPrompt::new(false, None);
    let outcome = installer.run(&mut prompt, &RecordingProgress::default()).await.unwrap();

    assert_eq!(outcome, InstallOutcome::Cancelled);
    assert_eq!(prompt.asked, 1);
    assert!(downloads(&installer).is_empty());
    assert!(!fx.layout.image().exists());
}

#[tokio::test]
async fn test_dismissing_the_file_picker_cancels() {
    let fx = Fixture::new();
    let installer = fx.installer(FakeDownloader::default(), FakeExtractor::default(), FakePatcher::new());

    let mut prompt = ScriptedPrompt::new(true, None);
    let outcome = installer.run(&mut prompt, &RecordingProgress::default()).await.unwrap();

    assert_eq!(outcome, InstallOutcome::Cancelled);
    assert_eq!(prompt.asked, 2);
    assert!(downloads(&installer).is_empty());
}

#[tokio::test]
async fn test_reinstall_reuses_image_and_skips_emulator() {
    let fx = Fixture::new();
    fx.previous_install();
    let installer = fx.installer(FakeDownloader::default(), FakeExtractor::default(), FakePatcher::new());

    let mut prompt = ScriptedPrompt::new(false, None);
    let progress = RecordingProgress::default();
    let outcome = installer.run(&mut prompt, &progress).await.unwrap();

    assert_eq!(outcome, InstallOutcome::Installed);
    assert_eq!(prompt.asked, 0);
    assert_eq!(std::fs::read(fx.layout.image()).unwrap(), b"OLD+patched");
    assert_eq!(downloads(&installer), vec![ARCHIVE_URL, TRANSLATION_URL, TOOLKIT_URL]);

    let steps = progress.steps.lock().unwrap();
    assert!(!steps.contains(&PipelineStep::DownloadingEmulator));
    assert!(!steps.contains(&PipelineStep::ExtractingEmulator));
}

#[tokio::test]
async fn test_zero_byte_image_is_not_reused() {
    let fx = Fixture::new();
    std::fs::create_dir_all(fx.layout.version_dir()).unwrap();
    std::fs::write(fx.layout.image(), b"").unwrap();
    let selected = fx.clean_image();
    let installer = fx.installer(FakeDownloader::default(), FakeExtractor::default(), FakePatcher::new());

    let mut prompt = ScriptedPrompt::new(true, Some(selected));
    installer.run(&mut prompt, &RecordingProgress::default()).await.unwrap();

    assert_eq!(prompt.asked, 2);
    assert_eq!(std::fs::read(fx.layout.image()).unwrap(), b"CLEAN+patched");
}

#[tokio::test]
async fn test_failed_secondary_download_keeps_previous_install() {
    let fx = Fixture::new();
    fx.previous_install();
    let downloader = FakeDownloader {
        fail_on: Some(TRANSLATION_URL),
        ..Default::default()
    };
    let installer = fx.installer(downloader, FakeExtractor::default(), FakePatcher::new());

    let err = installer
        .run(&mut ScriptedPrompt::new(false, None), &RecordingProgress::default())
        .await
        .unwrap_err();

    assert!(matches!(err, InstallError::Download(DownloadError::Http { status: 404, .. })));
    assert_eq!(std::fs::read(fx.layout.image()).unwrap(), b"OLD");
    assert_eq!(detect(&fx.layout), InstallState::Installed);

    let workspace = fx.layout.workspace();
    assert!(workspace.exists());
    assert!(workspace.patch_archive().exists());
    assert!(installer.patcher().applied.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_missing_patcher_output_fails_finalization() {
    let fx = Fixture::new();
    fx.previous_install();
    let patcher = FakePatcher {
        produce_output: false,
        applied: Mutex::new(Vec::new()),
    };
    let installer = fx.installer(FakeDownloader::default(), FakeExtractor::default(), patcher);

    let err = installer
        .run(&mut ScriptedPrompt::new(false, None), &RecordingProgress::default())
        .await
        .unwrap_err();

    match err {
        ref e @ InstallError::Finalization { ref expected } => {
            assert_eq!(*expected, fx.layout.workspace().patched_image());
            assert!(e.to_string().ends_with("KH2FM.NEW.ISO was not found."));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(std::fs::read(fx.layout.image()).unwrap(), b"OLD");
}

#[tokio::test]
async fn test_leftovers_from_a_failed_run_are_not_reused() {
    let fx = Fixture::new();
    let workspace = fx.layout.workspace();
    std::fs::create_dir_all(workspace.dir()).unwrap();
    std::fs::write(workspace.patched_image(), b"LEFT BY AN EARLIER RUN").unwrap();
    std::fs::write(workspace.dir().join("old_mod.kh2patch"), b"patch").unwrap();

    let selected = fx.clean_image();
    let patcher = FakePatcher {
        produce_output: false,
        applied: Mutex::new(Vec::new()),
    };
    let installer = fx.installer(FakeDownloader::default(), FakeExtractor::default(), patcher);

    let err = installer
        .run(&mut ScriptedPrompt::new(true, Some(selected)), &RecordingProgress::default())
        .await
        .unwrap_err();

    assert!(matches!(err, InstallError::Finalization { .. }));
    assert!(!fx.layout.image().exists());
    assert_eq!(
        *installer.patcher().applied.lock().unwrap(),
        vec!["English.kh2patch", "mod.kh2patch"]
    );
}

#[tokio::test]
async fn test_failed_emulator_extraction_leaves_no_emulator_dir() {
    let fx = Fixture::new();
    let selected = fx.clean_image();
    let extractor = FakeExtractor {
        fail_emulator: true,
        ..Default::default()
    };
    let installer = fx.installer(FakeDownloader::default(), extractor, FakePatcher::new());

    let err = installer
        .run(&mut ScriptedPrompt::new(true, Some(selected)), &RecordingProgress::default())
        .await
        .unwrap_err();

    assert!(matches!(err, InstallError::Extract(ExtractError::Tool { .. })));
    assert!(!fx.layout.emulator_dir().exists());
    assert!(!fx.layout.image().exists());

    // The next run retries the emulator instead of skipping a broken one
    let installer = fx.installer(FakeDownloader::default(), FakeExtractor::default(), FakePatcher::new());
    let selected = fx.clean_image();
    installer
        .run(&mut ScriptedPrompt::new(true, Some(selected)), &RecordingProgress::default())
        .await
        .unwrap();
    assert_eq!(detect(&fx.layout), InstallState::Installed);
    assert!(!fx.layout.emulator_dir().join("half.dll").exists());
}

#[tokio::test]
async fn test_image_checksum_mismatch() {
    let fx = Fixture::new();
    let selected = fx.clean_image();
    let installer = fx
        .installer(FakeDownloader::default(), FakeExtractor::default(), FakePatcher::new())
        .with_expected_md5(Some("00000000000000000000000000000000".to_string()));

    let err = installer
        .run(&mut ScriptedPrompt::new(true, Some(selected)), &RecordingProgress::default())
        .await
        .unwrap_err();

    assert!(matches!(err, InstallError::ImageMismatch { .. }));
    assert!(downloads(&installer).is_empty());
}

#[tokio::test]
async fn test_no_patch_files_in_empty_workspace() {
    let dir = TempDir::new().unwrap();
    assert!(find_patch_files(dir.path()).await.unwrap().is_empty());
}
