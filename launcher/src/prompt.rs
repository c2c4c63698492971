use crate::image::has_extension;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};

/// User-facing questions the install pipeline asks.
/// `false` / `None` mean the user declined or dismissed the prompt.
pub trait Prompt {
    fn confirm(&mut self, message: &str) -> bool;
    fn select_file(&mut self, title: &str, extensions: &[&str]) -> Option<PathBuf>;
}

/// Checks a chosen file the way the picker does. The error is shown to the user.
pub fn check_selection(path: &Path, extensions: &[&str]) -> Result<(), String> {
    if !has_extension(path, extensions) {
        return Err(format!("Expected one of: {}", filter_label(extensions)));
    }
    if !path.is_file() {
        return Err(format!("File not found: {}", path.display()));
    }
    Ok(())
}

fn filter_label(extensions: &[&str]) -> String {
    extensions
        .iter()
        .map(|e| format!("*.{}", e))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Asks on a terminal. Answers are read line by line from `input`.
pub struct ConsolePrompt<R, W> {
    input: R,
    output: W,
}

impl ConsolePrompt<io::StdinLock<'static>, io::Stderr> {
    pub fn stdio() -> Self {
        Self::new(io::stdin().lock(), io::stderr())
    }
}

impl<R: BufRead, W: Write> ConsolePrompt<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self { input, output }
    }

    fn ask(&mut self, question: &str) -> Option<String> {
        let _ = write!(self.output, "{}", question);
        let _ = self.output.flush();

        let mut line = String::new();
        match self.input.read_line(&mut line) {
            Ok(0) | Err(_) => None,
            Ok(_) => Some(line.trim().to_string()),
        }
    }
}

impl<R: BufRead, W: Write> Prompt for ConsolePrompt<R, W> {
    fn confirm(&mut self, message: &str) -> bool {
        match self.ask(&format!("{} [y/N]: ", message)) {
            Some(answer) => matches!(answer.to_lowercase().as_str(), "y" | "yes"),
            None => false,
        }
    }

    fn select_file(&mut self, title: &str, extensions: &[&str]) -> Option<PathBuf> {
        let filter = filter_label(extensions);

        loop {
            let answer = self.ask(&format!("{} ({}), empty to cancel: ", title, filter))?;
            if answer.is_empty() {
                return None;
            }

            let path = PathBuf::from(answer.trim_matches('"'));
            match check_selection(&path, extensions) {
                Ok(()) => return Some(path),
                Err(message) => {
                    let _ = writeln!(self.output, "{}", message);
                }
            }
        }
    }
}

/// Answers given up front on the command line, falling back to another prompt
pub struct PresetPrompt<P> {
    assume_yes: bool,
    file: Option<PathBuf>,
    fallback: P,
}

impl<P: Prompt> PresetPrompt<P> {
    pub fn new(assume_yes: bool, file: Option<PathBuf>, fallback: P) -> Self {
        Self {
            assume_yes,
            file,
            fallback,
        }
    }
}

impl<P: Prompt> Prompt for PresetPrompt<P> {
    fn confirm(&mut self, message: &str) -> bool {
        // A preset file implies the user has the image ready
        if self.assume_yes || self.file.is_some() {
            return true;
        }
        self.fallback.confirm(message)
    }

    fn select_file(&mut self, title: &str, extensions: &[&str]) -> Option<PathBuf> {
        match self.file.take() {
            Some(path) => Some(path),
            None => self.fallback.select_file(title, extensions),
        }
    }
}
