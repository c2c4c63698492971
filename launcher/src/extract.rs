use crate::context::StepLimits;
use crate::error::ExtractError;
use log::{debug, info};
use std::path::Path;
use std::process::Stdio;
use tokio::io::AsyncReadExt;
use tokio::process::Command;

/// Adapter over the external 7-Zip binary. The archive format is left to
/// 7-Zip to sniff, so zip, 7z and rar packages all go through here.
pub struct SevenZip {
    program: String,
    limits: StepLimits,
}

impl SevenZip {
    pub fn new(program: impl Into<String>, limits: StepLimits) -> Self {
        Self {
            program: program.into(),
            limits,
        }
    }

    /// Extract `archive` into `target_dir`, overwriting conflicting files.
    /// `on_progress` receives the percentages 7-Zip prints.
    pub async fn extract(
        &self,
        archive: &Path,
        target_dir: &Path,
        mut on_progress: impl FnMut(u8),
    ) -> Result<(), ExtractError> {
        info!("Extracting {} -> {}", archive.display(), target_dir.display());

        let run = self.run(archive, target_dir, &mut on_progress);
        self.limits
            .run(
                run,
                || ExtractError::Timeout {
                    archive: archive.to_path_buf(),
                },
                || ExtractError::Cancelled,
            )
            .await
    }

    async fn run(
        &self,
        archive: &Path,
        target_dir: &Path,
        on_progress: &mut impl FnMut(u8),
    ) -> Result<(), ExtractError> {
        let mut child = Command::new(&self.program)
            .args(extract_args(archive, target_dir))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ExtractError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        let stderr_task = child.stderr.take().map(|mut stderr| {
            tokio::spawn(async move {
                let mut bytes = Vec::new();
                let _ = stderr.read_to_end(&mut bytes).await;
                String::from_utf8_lossy(&bytes).into_owned()
            })
        });

        // 7-Zip redraws its progress with backspaces when stdout is not a
        // terminal, so the output is split on those as well as on newlines.
        let mut last_line = String::new();
        if let Some(mut stdout) = child.stdout.take() {
            let mut buf = [0u8; 4096];
            let mut segments = Segments::default();
            let mut last_percent = None;

            loop {
                let n = match stdout.read(&mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => n,
                };

                for segment in segments.push(&buf[..n]) {
                    if let Some(percent) = parse_percent(&segment) {
                        if last_percent != Some(percent) {
                            last_percent = Some(percent);
                            on_progress(percent);
                        }
                    } else {
                        debug!("7z: {}", segment);
                        last_line = segment;
                    }
                }
            }

            if let Some(rest) = segments.finish() {
                if parse_percent(&rest).is_none() {
                    last_line = rest;
                }
            }
        }

        let status = child.wait().await.map_err(|source| ExtractError::Spawn {
            program: self.program.clone(),
            source,
        })?;

        let stderr_text = match stderr_task {
            Some(task) => task.await.unwrap_or_default(),
            None => String::new(),
        };

        if status.success() {
            on_progress(100);
            return Ok(());
        }

        let message = if !stderr_text.trim().is_empty() {
            stderr_text.trim().to_string()
        } else if !last_line.is_empty() {
            last_line
        } else {
            format!("exited with {}", status)
        };

        Err(ExtractError::Tool {
            code: status.code(),
            message,
        })
    }
}

fn extract_args(archive: &Path, target_dir: &Path) -> Vec<std::ffi::OsString> {
    let mut out_flag = std::ffi::OsString::from("-o");
    out_flag.push(target_dir.as_os_str());

    vec![
        "x".into(),
        archive.as_os_str().to_os_string(),
        out_flag,
        "-y".into(),
        "-bsp1".into(),
        "-bso0".into(),
    ]
}

/// 7-Zip output split on newlines, carriage returns and backspaces. Bytes
/// wait for a separator before decoding, so a character cut in half by a read
/// comes out whole.
#[derive(Default)]
struct Segments {
    pending: Vec<u8>,
}

impl Segments {
    fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(bytes);

        let mut out = Vec::new();
        while let Some(pos) = self.pending.iter().position(|b| is_separator(*b)) {
            let segment: Vec<u8> = self.pending.drain(..=pos).collect();
            let text = String::from_utf8_lossy(&segment[..pos]);
            let text = text.trim();
            if !text.is_empty() {
                out.push(text.to_string());
            }
        }
        out
    }

    fn finish(self) -> Option<String> {
        let rest = String::from_utf8_lossy(&self.pending).trim().to_string();
        (!rest.is_empty()).then_some(rest)
    }
}

fn is_separator(b: u8) -> bool {
    matches!(b, b'\n' | b'\r' | 0x08)
}

/// Pull the percentage out of a 7-Zip progress segment such as
/// ` 42% 13 - DaysFM/mod.kh2patch`
pub fn parse_percent(segment: &str) -> Option<u8> {
    let idx = segment.find('%')?;
    let digits: String = segment[..idx]
        .chars()
        .rev()
        .take_while(|c| c.is_ascii_digit())
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();

    if digits.is_empty() || !segment[..idx - digits.len()].trim().is_empty() {
        return None;
    }

    digits.parse::<u8>().ok().filter(|p| *p <= 100)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_percent() {
        assert_eq!(parse_percent("42%"), Some(42));
        assert_eq!(parse_percent("  7% 3 - DaysFM/mod.kh2patch"), Some(7));
        assert_eq!(parse_percent("100%"), Some(100));
        assert_eq!(parse_percent("Everything is Ok"), None);
        assert_eq!(parse_percent("Size: 50%"), None);
        assert_eq!(parse_percent("%"), None);
        assert_eq!(parse_percent("250%"), None);
    }

    #[test]
    fn test_extract_args() {
        let args = extract_args(Path::new("/tmp/a.7z"), Path::new("/tmp/out"));
        let args: Vec<String> = args.iter().map(|a| a.to_string_lossy().into_owned()).collect();
        assert_eq!(args, vec!["x", "/tmp/a.7z", "-o/tmp/out", "-y", "-bsp1", "-bso0"]);
    }

    #[test]
    fn test_segments_split_on_every_separator() {
        let mut segments = Segments::default();
        assert_eq!(segments.push(b"  0%\x08\x08\x08\x08 42%\r"), vec!["0%", "42%"]);
        assert_eq!(segments.push(b"Extracting caf\xc3"), Vec::<String>::new());
        assert_eq!(segments.push(b"\xa9.kh2patch\nEverything is Ok"), vec!["Extracting caf\u{e9}.kh2patch"]);
        assert_eq!(segments.finish().as_deref(), Some("Everything is Ok"));
    }

    #[cfg(unix)]
    mod process {
        use super::*;
        use std::fs;
        use std::os::unix::fs::PermissionsExt;
        use std::path::PathBuf;
        use tempfile::TempDir;

        /// Write an executable stand-in for 7z
        fn fake_7z(dir: &TempDir, script: &str) -> PathBuf {
            let path = dir.path().join("7z");
            fs::write(&path, format!("#!/bin/sh\n{}", script)).unwrap();
            fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
            path
        }

        /// Run the extractor, retrying while the freshly written script is
        /// still held open for writing by a concurrently forked test process
        async fn extract(tool: &Path, archive: &Path, target: &Path) -> (Result<(), ExtractError>, Vec<u8>) {
            let zip = SevenZip::new(tool.to_string_lossy(), StepLimits::default());
            for _ in 0..20 {
                let mut seen = Vec::new();
                let result = zip.extract(archive, target, |p| seen.push(p)).await;
                match &result {
                    Err(ExtractError::Spawn { source, .. }) if source.raw_os_error() == Some(26) => {
                        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
                    }
                    _ => return (result, seen),
                }
            }
            panic!("fake 7z never became executable");
        }

        #[tokio::test]
        async fn test_progress_and_output_dir() {
            let dir = TempDir::new().unwrap();
            let tool = fake_7z(
                &dir,
                "printf '  0%%\\b\\b\\b\\b 42%%\\b\\b\\b\\b 42%% 3 - mod.kh2patch\\r100%%\\n'\n\
                 mkdir -p \"${3#-o}\"\n\
                 echo ok > \"${3#-o}/mod.kh2patch\"\n\
                 exit 0\n",
            );
            let target = dir.path().join("out");

            let (result, seen) = extract(&tool, &dir.path().join("patch_archive.zip"), &target).await;

            result.unwrap();
            assert_eq!(seen, vec![0, 42, 100, 100]);
            assert!(target.join("mod.kh2patch").is_file());
        }

        #[tokio::test]
        async fn test_stderr_is_reported_verbatim() {
            let dir = TempDir::new().unwrap();
            let tool = fake_7z(
                &dir,
                "printf ' 42%%\\b\\b\\b\\b'\n\
                 echo 'ERROR: Can not open the file as archive' >&2\n\
                 exit 2\n",
            );

            let (result, seen) = extract(&tool, &dir.path().join("broken.7z"), &dir.path().join("out")).await;

            match result {
                Err(ExtractError::Tool { code, message }) => {
                    assert_eq!(code, Some(2));
                    assert_eq!(message, "ERROR: Can not open the file as archive");
                }
                other => panic!("unexpected result: {:?}", other),
            }
            assert_eq!(seen, vec![42]);
        }

        #[tokio::test]
        async fn test_last_stdout_line_when_stderr_is_empty() {
            let dir = TempDir::new().unwrap();
            let tool = fake_7z(&dir, "printf 'Scanning\\nERROR: Data Error : pcsx2.exe\\n'\nexit 2\n");

            let (result, _) = extract(&tool, &dir.path().join("pcsx2.7z"), &dir.path().join("out")).await;

            let err = result.unwrap_err();
            assert_eq!(err.to_string(), "7-Zip: ERROR: Data Error : pcsx2.exe");
        }
    }
}
