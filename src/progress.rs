//! Progress display for inject/eject operations

use std::time::Duration;

use console::style;
use indicatif::{ProgressBar, ProgressStyle};

/// Spinner shown while an operation runs, finishing with a ✔/✘ line.
pub struct OperationSpinner {
    spinner: ProgressBar,
}

impl OperationSpinner {
    pub fn start(message: impl Into<String>) -> Self {
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.cyan} {msg}")
                .expect("static template is valid"),
        );
        spinner.set_message(message.into());
        spinner.enable_steady_tick(Duration::from_millis(80));
        Self { spinner }
    }

    pub fn finish_success(self, message: impl Into<String>) {
        self.spinner
            .finish_with_message(format!("{} {}", style("✔").green().bold(), message.into()));
    }

    pub fn finish_failure(self, message: impl Into<String>) {
        self.spinner
            .finish_with_message(format!("{} {}", style("✘").red().bold(), message.into()));
    }
}
