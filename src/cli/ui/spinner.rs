use std::future::Future;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};

/// Stderr spinner shown while modules are being reached.
#[derive(Debug)]
pub(crate) struct Spinner {
    enabled: bool,
}

/// Lets a running operation name the step it is on.
#[derive(Debug, Clone)]
pub(crate) struct SpinnerStage {
    bar: Option<ProgressBar>,
}

impl SpinnerStage {
    pub(crate) fn set(&self, step: &str) {
        if let Some(bar) = &self.bar {
            bar.set_message(step.to_string());
        }
    }
}

impl Spinner {
    pub(crate) fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    /// Runs `operation`, ticking a spinner labelled `message` when enabled.
    pub(crate) async fn run<F, Fut, T>(&self, message: &str, operation: F) -> T
    where
        F: FnOnce(SpinnerStage) -> Fut,
        Fut: Future<Output = T>,
    {
        let bar = self.enabled.then(|| new_bar(message));
        let result = operation(SpinnerStage { bar: bar.clone() }).await;
        if let Some(bar) = bar {
            bar.finish_and_clear();
        }
        result
    }
}

fn new_bar(message: &str) -> ProgressBar {
    let bar = ProgressBar::new_spinner();
    bar.set_style(
        ProgressStyle::with_template("{spinner:.cyan.bold} {msg} {elapsed:.dim}")
            .unwrap_or_else(|_error| ProgressStyle::default_spinner())
            .tick_chars("⠁⠂⠄⡀⢀⠠⠐⠈ "),
    );
    bar.set_message(message.to_string());
    bar.enable_steady_tick(Duration::from_millis(100));
    bar
}
