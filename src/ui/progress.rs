//! Progress indicators with CI fallback

use super::context::UiContext;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::time::Duration;

/// Spinner shown on stderr while a build step's output is captured
///
/// Draws nothing when stderr is not a terminal, so captured builds stay
/// silent in pipelines and CI.
pub struct BuildSpinner {
    bar: Option<ProgressBar>,
}

impl BuildSpinner {
    /// Create a spinner (hidden in non-interactive mode)
    pub fn new(ctx: &UiContext) -> Self {
        let bar = ctx.use_fancy_output().then(|| {
            let bar = ProgressBar::with_draw_target(None, ProgressDrawTarget::stderr());
            if let Ok(style) = ProgressStyle::default_spinner()
                .template("  {spinner:.cyan} {msg}  {elapsed:.dim}")
            {
                bar.set_style(style.tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏ "));
            }
            bar
        });
        Self { bar }
    }

    /// Show `message` and start ticking
    pub fn start(&self, message: &str) {
        if let Some(ref bar) = self.bar {
            bar.set_message(message.to_string());
            bar.enable_steady_tick(Duration::from_millis(120));
        }
    }

    /// Remove the spinner from the terminal
    pub fn clear(&self) {
        if let Some(ref bar) = self.bar {
            bar.disable_steady_tick();
            bar.finish_and_clear();
        }
    }

    /// Whether anything is being drawn
    pub fn is_visible(&self) -> bool {
        self.bar.is_some()
    }
}

impl Drop for BuildSpinner {
    fn drop(&mut self) {
        self.clear();
    }
}
