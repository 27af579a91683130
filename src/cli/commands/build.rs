//! Build command - bring a script's cache entry up to date without running it

use super::CommandContext;
use crate::build::{BuildPlan, Orchestrator};
use crate::cli::args::BuildArgs;
use crate::error::KilnResult;
use crate::ui::{self, UiContext};

/// Execute the build command
pub async fn execute(args: BuildArgs, ctx: &CommandContext) -> KilnResult<()> {
    let ui_ctx = UiContext::detect();
    let plan = BuildPlan::load(&args.script, &ctx.cache_root()?).await?;
    let options = ctx.build_options(args.mode, true);

    let report = Orchestrator::new(&plan, &options, ui_ctx.clone())
        .ensure_built()
        .await?;

    let dir = plan.entry.dir.display().to_string();
    if report.was_cached() {
        ui::step_ok_detail(&ui_ctx, "Up to date", &dir);
    } else {
        ui::step_ok_detail(
            &ui_ctx,
            &format!("Built in {:.1}s", report.elapsed.as_secs_f64()),
            &dir,
        );
    }
    Ok(())
}
