//! Terminal output helpers
//!
//! Everything degrades to plain text when stderr is not a terminal or a CI
//! environment is detected.

mod context;
mod output;
mod progress;

pub use context::UiContext;
pub use output::{error, key_value, section, step_ok, step_ok_detail, step_warn};
pub use progress::BuildSpinner;
