use crate::types::PipelineStep;
use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, info};
use std::time::Duration;

/// Receives pipeline progress. Percent values are 0-100 and refer to the
/// most recently started step.
pub trait ProgressSink: Send + Sync {
    fn step(&self, step: PipelineStep);
    fn percent(&self, percent: u8);
    /// A line of output from an external tool
    fn log(&self, line: &str);
}

/// Writes progress to the log only, for non-interactive runs
pub struct LogProgress;

impl ProgressSink for LogProgress {
    fn step(&self, step: PipelineStep) {
        info!("{}...", step);
    }

    fn percent(&self, percent: u8) {
        debug!("{}%", percent);
    }

    fn log(&self, line: &str) {
        info!("{}", line);
    }
}

const BAR_TEMPLATE: &str = "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos:>3}% | {msg}";
const SPINNER_TEMPLATE: &str = "{spinner:.green} [{elapsed_precise}] {msg}";

/// Terminal progress bar. Steps without percent progress show a spinner only.
pub struct ConsoleProgress {
    bar: ProgressBar,
}

impl ConsoleProgress {
    pub fn new() -> Self {
        let bar = ProgressBar::new(100);
        bar.set_style(style_for(PipelineStep::AcquiringImage));
        bar.enable_steady_tick(Duration::from_millis(100));
        Self { bar }
    }

    pub fn finish(&self, message: &str) {
        self.bar.finish_with_message(message.to_string());
    }
}

impl Default for ConsoleProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressSink for ConsoleProgress {
    fn step(&self, step: PipelineStep) {
        self.bar.set_style(style_for(step));
        self.bar.set_position(0);
        self.bar.set_message(format!("{}...", step));
        debug!("step: {}", step);
    }

    fn percent(&self, percent: u8) {
        self.bar.set_position(u64::from(percent.min(100)));
    }

    fn log(&self, line: &str) {
        self.bar.set_message(format!("Installing: {}...", clean_line(line)));
        debug!("tool: {}", line);
    }
}

fn template_for(step: PipelineStep) -> &'static str {
    if step.has_percent() {
        BAR_TEMPLATE
    } else {
        SPINNER_TEMPLATE
    }
}

fn style_for(step: PipelineStep) -> ProgressStyle {
    ProgressStyle::default_bar()
        .template(template_for(step))
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=>-")
}

/// Collapse line breaks and cut the line to something a status bar can show
pub fn clean_line(line: &str) -> String {
    line.replace("\r\n", " ")
        .replace(['\r', '\n'], " ")
        .chars()
        .take(60)
        .collect()
}

/// Integer percent of `done` over `total`, clamped to 100
pub fn percent_of(done: u64, total: u64) -> u8 {
    if total == 0 {
        return 0;
    }
    (done.saturating_mul(100) / total).min(100) as u8
}
