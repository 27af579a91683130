//! Run command - build if needed, then execute the script's artifact

use super::CommandContext;
use crate::build::{BuildMode, BuildPlan, Orchestrator};
use crate::dispatch;
use crate::error::{KilnError, KilnResult};
use crate::ui::UiContext;
use std::ffi::OsString;
use std::path::PathBuf;
use tracing::debug;

/// Execute a script; returns the exit code kiln should terminate with
pub async fn execute(mut script: Vec<OsString>, ctx: &CommandContext) -> KilnResult<u8> {
    if script.is_empty() {
        return Err(KilnError::User(
            "no script given; usage: kiln <SCRIPT> [ARGS]...".to_string(),
        ));
    }
    let path = PathBuf::from(script.remove(0));
    let cache_root = ctx.cache_root()?;

    let plan = BuildPlan::load(&path, &cache_root).await?;
    let options = ctx.build_options(BuildMode::Default, false);
    let report = Orchestrator::new(&plan, &options, UiContext::detect())
        .ensure_built()
        .await?;
    if report.was_cached() {
        debug!("Using cached artifact in {}", plan.entry.dir.display());
    }

    let target = plan.entry.target(&plan.spec)?;
    dispatch::dispatch(&target, &script).await
}
