use std::{
    io::{stdout, IsTerminal},
    time::{Duration, Instant},
};

use spinners_rs::{Spinner, Spinners};

// ESEQ is for "escape sequence"
pub const ESEQ_DELETE_LINE: &str = "\x1b[0J";
pub const ESEQ_RED: &str = "\x1b[38;5;1m";
pub const ESEQ_GREEN: &str = "\x1b[38;5;2m";
pub const ESEQ_WEAK: &str = "\x1b[38;5;240m";
pub const ESEQ_RESET: &str = "\x1b[m";

pub const SPINNER_MS: u64 = 50;

/// A one-line spinner for a long step.
///
/// When stdout is not a terminal nothing animates; only the final line is
/// printed, without colors.
pub struct ProgressView {
    task: String,
    spinner: Option<Spinner>,
    previous_update: Instant,
}

impl ProgressView {
    pub fn new(task: impl ToString) -> Self {
        let spinner = stdout().is_terminal().then(|| {
            let mut spinner = Spinner::new(Spinners::BouncingBar, task.to_string());
            spinner.set_interval(SPINNER_MS);
            spinner
        });

        Self {
            task: task.to_string(),
            spinner,
            previous_update: Instant::now(),
        }
    }

    pub fn start(&mut self) {
        if let Some(spinner) = &mut self.spinner {
            spinner.start();
        }
    }

    pub fn report_intermediate(&mut self, progress: (usize, usize), comment: Option<&str>) {
        let Some(spinner) = &mut self.spinner else {
            return;
        };
        if self.previous_update.elapsed() <= Duration::from_millis(SPINNER_MS * 2) {
            return;
        }
        self.previous_update = Instant::now();

        spinner.set_message(format!(
            "{ESEQ_DELETE_LINE}[{}/{}] {}{}{ESEQ_RESET}",
            progress.0,
            progress.1,
            self.task,
            comment
                .map(|comment| format!("{ESEQ_WEAK} - {comment}"))
                .unwrap_or_default()
        ));
    }

    pub fn success(&mut self, message: Option<&str>) {
        self.finish(ESEQ_GREEN, '✓', message);
    }

    pub fn failure(&mut self, message: Option<&str>) {
        self.finish(ESEQ_RED, '!', message);
    }

    fn finish(&mut self, color: &str, mark: char, message: Option<&str>) {
        self.previous_update = Instant::now();
        let message = message
            .map(|message| format!(" - {}", message))
            .unwrap_or_default();

        match &mut self.spinner {
            Some(spinner) => {
                spinner.stop_with_message(format!(
                    "{ESEQ_DELETE_LINE}{color}{mark} {}{}{ESEQ_RESET}",
                    self.task, message
                ));
                println!();
            }
            None => println!("{mark} {}{}", self.task, message),
        }
    }
}
