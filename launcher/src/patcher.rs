//! Driver for the interactive KH2FM Toolkit.
//!
//! The toolkit prints a banner, waits for a newline before it starts
//! patching, and once it is done prints "Press enter to exit" and waits
//! again. It gives no other machine-readable signal, so the driver sends one
//! newline after a warm-up delay and a second one shortly after it sees the
//! exit prompt on stdout.

use crate::context::StepLimits;
use crate::error::PatchError;
use log::{debug, info, warn};
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{ChildStdin, Command};
use tokio::sync::mpsc;
use tokio::time::Instant;

/// Time the toolkit needs before it reads the first newline
pub const TOOLKIT_WARMUP_DELAY: Duration = Duration::from_secs(2);
/// Pause between seeing the exit prompt and answering it
pub const TOOLKIT_COMPLETION_DELAY: Duration = Duration::from_millis(500);
/// Exit code the toolkit reports on a normal run under Windows, read as
/// unsigned. It is a success, not a crash.
pub const TOOLKIT_CLEAN_EXIT_CODE: u32 = 3_762_504_530;
/// Prompts the toolkit prints once patching is over (compared lowercased)
pub const COMPLETION_PHRASES: [&str; 2] = ["press enter to exit", "press return to exit"];

const NEWLINE: &[u8] = b"\r\n";
/// How long to keep reading leftover output after the toolkit exits
const OUTPUT_DRAIN: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolPhase {
    /// Waiting for the warm-up delay. Remembers an exit prompt that showed up early.
    WaitingForPrompt { completion_seen: bool },
    /// First newline sent, scanning output for the exit prompt
    Started,
    /// Exit prompt seen, second newline scheduled
    WaitingForCompletion,
    /// Second newline sent
    Completed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolEvent {
    WarmupElapsed,
    CompletionPrompt,
    CompletionDelayElapsed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolAction {
    WriteNewline,
    ScheduleCompletionWrite,
}

/// The newline protocol as a plain state machine, driven by timer and output events
#[derive(Debug)]
pub struct ToolkitProtocol {
    phase: ProtocolPhase,
}

impl ToolkitProtocol {
    pub fn new() -> Self {
        Self {
            phase: ProtocolPhase::WaitingForPrompt {
                completion_seen: false,
            },
        }
    }

    pub fn phase(&self) -> ProtocolPhase {
        self.phase
    }

    pub fn on_event(&mut self, event: ProtocolEvent) -> &'static [ProtocolAction] {
        use ProtocolAction::*;
        use ProtocolEvent::*;
        use ProtocolPhase::*;

        let (next, actions): (ProtocolPhase, &'static [ProtocolAction]) = match (self.phase, event) {
            (WaitingForPrompt { completion_seen: false }, WarmupElapsed) => (Started, &[WriteNewline]),
            (WaitingForPrompt { completion_seen: true }, WarmupElapsed) => {
                (WaitingForCompletion, &[WriteNewline, ScheduleCompletionWrite])
            }
            (WaitingForPrompt { .. }, CompletionPrompt) => (WaitingForPrompt { completion_seen: true }, &[]),
            (Started, CompletionPrompt) => (WaitingForCompletion, &[ScheduleCompletionWrite]),
            (WaitingForCompletion, CompletionDelayElapsed) => (Completed, &[WriteNewline]),
            (phase, _) => (phase, &[]),
        };

        if next != self.phase {
            debug!("toolkit protocol: {:?} -> {:?}", self.phase, next);
        }
        self.phase = next;
        actions
    }
}

impl Default for ToolkitProtocol {
    fn default() -> Self {
        Self::new()
    }
}

/// Delays used by the protocol. Defaults to the values the toolkit needs.
#[derive(Debug, Clone, Copy)]
pub struct ToolkitTiming {
    pub warmup: Duration,
    pub completion: Duration,
}

impl Default for ToolkitTiming {
    fn default() -> Self {
        Self {
            warmup: TOOLKIT_WARMUP_DELAY,
            completion: TOOLKIT_COMPLETION_DELAY,
        }
    }
}

/// Whether a toolkit exit code means the patch run succeeded
pub fn is_clean_exit(code: i32) -> bool {
    code == 0 || code as u32 == TOOLKIT_CLEAN_EXIT_CODE
}

fn exit_result(status: ExitStatus) -> Result<(), PatchError> {
    match status.code() {
        Some(code) if is_clean_exit(code) => Ok(()),
        Some(code) => Err(PatchError::ToolExit {
            code: i64::from(code),
        }),
        None => Err(PatchError::Terminated),
    }
}

enum ToolOutput {
    Line(String),
    Prompt,
}

pub struct Toolkit {
    runner: Option<String>,
    timing: ToolkitTiming,
    limits: StepLimits,
}

impl Toolkit {
    pub fn new(runner: Option<String>, limits: StepLimits) -> Self {
        Self {
            runner,
            timing: ToolkitTiming::default(),
            limits,
        }
    }

    pub fn with_timing(mut self, timing: ToolkitTiming) -> Self {
        self.timing = timing;
        self
    }

    /// Run the toolkit at `tool` over `patch_files` (names relative to the
    /// toolkit's directory). Every output line goes to `on_line`.
    pub async fn apply_patches(
        &self,
        tool: &Path,
        patch_files: &[String],
        mut on_line: impl FnMut(&str),
    ) -> Result<(), PatchError> {
        info!("Running {} with {:?}", tool.display(), patch_files);

        let run = self.run_protocol(tool, patch_files, &mut on_line);
        self.limits
            .run(run, || PatchError::Timeout, || PatchError::Cancelled)
            .await
            .map(|newlines| debug!("toolkit finished after {} newline(s)", newlines))
    }

    /// Returns the number of newlines written to the toolkit
    pub(crate) async fn run_protocol(
        &self,
        tool: &Path,
        patch_files: &[String],
        on_line: &mut impl FnMut(&str),
    ) -> Result<u32, PatchError> {
        let work_dir = tool
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));

        let mut command = match &self.runner {
            Some(runner) => {
                let mut c = Command::new(runner);
                c.arg(tool);
                c
            }
            None => Command::new(tool),
        };

        let mut child = command
            .args(patch_files)
            .current_dir(&work_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| PatchError::Spawn {
                tool: tool.to_path_buf(),
                source,
            })?;

        let mut stdin = child.stdin.take();
        let (tx, mut rx) = mpsc::unbounded_channel::<ToolOutput>();

        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(scan_stdout(stdout, tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_lines(stderr, tx.clone()));
        }
        drop(tx);

        let mut protocol = ToolkitProtocol::new();
        let mut newlines = 0u32;

        let warmup = tokio::time::sleep(self.timing.warmup);
        tokio::pin!(warmup);
        let mut warmup_fired = false;

        let completion = tokio::time::sleep(Duration::ZERO);
        tokio::pin!(completion);
        let mut completion_armed = false;

        let mut output_open = true;

        let status = loop {
            let event = tokio::select! {
                status = child.wait() => break status?,
                _ = &mut warmup, if !warmup_fired => {
                    warmup_fired = true;
                    ProtocolEvent::WarmupElapsed
                }
                _ = &mut completion, if completion_armed => {
                    completion_armed = false;
                    ProtocolEvent::CompletionDelayElapsed
                }
                output = rx.recv(), if output_open => match output {
                    Some(ToolOutput::Line(line)) => {
                        on_line(&line);
                        continue;
                    }
                    Some(ToolOutput::Prompt) => ProtocolEvent::CompletionPrompt,
                    None => {
                        output_open = false;
                        continue;
                    }
                },
            };

            for action in protocol.on_event(event) {
                match action {
                    ProtocolAction::WriteNewline => {
                        write_newline(&mut stdin).await;
                        newlines += 1;
                    }
                    ProtocolAction::ScheduleCompletionWrite => {
                        completion.as_mut().reset(Instant::now() + self.timing.completion);
                        completion_armed = true;
                    }
                }
            }
        };

        while let Ok(Some(output)) = tokio::time::timeout(OUTPUT_DRAIN, rx.recv()).await {
            if let ToolOutput::Line(line) = output {
                on_line(&line);
            }
        }

        info!("Toolkit exited with {}", status);
        exit_result(status)?;
        Ok(newlines)
    }
}

/// Errors are ignored: the toolkit may already have closed its input
async fn write_newline(stdin: &mut Option<ChildStdin>) {
    if let Some(input) = stdin.as_mut() {
        if let Err(e) = input.write_all(NEWLINE).await {
            warn!("Could not write to toolkit: {}", e);
            return;
        }
        let _ = input.flush().await;
    }
}

/// Split stdout into lines and watch for the exit prompt. The prompt is
/// usually printed without a trailing newline, so it is matched against the
/// raw stream rather than against complete lines. Lines are decoded only once
/// complete, so characters split across reads survive.
async fn scan_stdout(mut stdout: impl AsyncRead + Unpin, tx: mpsc::UnboundedSender<ToolOutput>) {
    let mut buf = [0u8; 4096];
    let mut line: Vec<u8> = Vec::new();
    let mut tail: Vec<u8> = Vec::new();

    loop {
        let n = match stdout.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => n,
        };
        let chunk = &buf[..n];

        tail.extend(chunk.iter().map(u8::to_ascii_lowercase));
        let prompt = COMPLETION_PHRASES
            .iter()
            .any(|p| tail.windows(p.len()).any(|w| w == p.as_bytes()));

        for &b in chunk {
            if b == b'\n' || b == b'\r' {
                send_line(&tx, &mut line);
            } else {
                line.push(b);
            }
        }

        if prompt {
            send_line(&tx, &mut line);
            let _ = tx.send(ToolOutput::Prompt);
            tail.clear();
        } else {
            keep_tail(&mut tail);
        }
    }

    send_line(&tx, &mut line);
}

fn send_line(tx: &mpsc::UnboundedSender<ToolOutput>, line: &mut Vec<u8>) {
    let text = String::from_utf8_lossy(line).trim_end().to_string();
    if !text.trim().is_empty() {
        let _ = tx.send(ToolOutput::Line(text));
    }
    line.clear();
}

async fn forward_lines(stream: impl AsyncRead + Unpin, tx: mpsc::UnboundedSender<ToolOutput>) {
    use tokio::io::AsyncBufReadExt;

    let mut lines = BufReader::new(stream).split(b'\n');
    while let Ok(Some(mut line)) = lines.next_segment().await {
        send_line(&tx, &mut line);
    }
}

/// Keep just enough of the stream to match a prompt split across reads
fn keep_tail(tail: &mut Vec<u8>) {
    let keep = COMPLETION_PHRASES.iter().map(|p| p.len()).max().unwrap_or(0);
    if tail.len() > keep {
        tail.drain(..tail.len() - keep);
    }
}
