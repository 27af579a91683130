//! Build orchestration
//!
//! Brings a cache entry from whatever state it is in up to `Built`:
//!
//! 1. Fast path: an entry already built is used without locking.
//! 2. Otherwise take the entry lock and probe again, since another process
//!    may have finished the build while we waited.
//! 3. Write the sources, run `build_once_cmd` unless its marker exists,
//!    run `build_cmd`, then record the built marker.

pub mod command;

pub use command::{OutputMode, StepOutcome, StepRunner};

use crate::cache::{CacheEntry, CacheKey, EntryLock, EntryState};
use crate::error::{BuildStep, KilnError, KilnResult};
use crate::script::{BuildSpec, ScriptDescriptor};
use crate::ui::{BuildSpinner, UiContext};
use clap::ValueEnum;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// How much of an existing entry to reuse
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum BuildMode {
    /// Build only what is missing
    #[default]
    Default,
    /// Rerun `build_cmd` even when the entry is built
    Source,
    /// Rerun `build_once_cmd` and `build_cmd`
    Full,
}

/// Knobs for one build
#[derive(Debug, Clone)]
pub struct BuildOptions {
    pub mode: BuildMode,
    /// Stream build output instead of capturing it
    pub show_logs: bool,
    /// Shell the build commands run under
    pub shell: String,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            mode: BuildMode::Default,
            show_logs: false,
            shell: "/bin/sh".to_string(),
        }
    }
}

/// What `ensure_built` did
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildReport {
    /// State found before building
    pub initial: EntryState,
    /// State the entry ended in
    pub final_state: EntryState,
    pub ran_once: bool,
    pub ran_build: bool,
    pub elapsed: Duration,
}

impl BuildReport {
    /// Whether the artifact was used straight from the cache
    pub fn was_cached(&self) -> bool {
        !self.ran_once && !self.ran_build
    }
}

/// A loaded script paired with its cache entry
#[derive(Debug, Clone)]
pub struct BuildPlan {
    pub script: ScriptDescriptor,
    pub spec: BuildSpec,
    pub entry: CacheEntry,
}

impl BuildPlan {
    /// Read `path`, parse its config block and locate its entry under `cache_root`
    pub async fn load(path: &Path, cache_root: &Path) -> KilnResult<Self> {
        let script = ScriptDescriptor::load(path).await?;
        let spec = script.spec()?;
        let key = CacheKey::compute(&script, &spec);
        let entry = CacheEntry::locate(cache_root, key);
        debug!("Script {} maps to {}", path.display(), entry.dir.display());
        Ok(Self {
            script,
            spec,
            entry,
        })
    }
}

/// Drives one entry through its build states
pub struct Orchestrator<'a> {
    plan: &'a BuildPlan,
    options: &'a BuildOptions,
    ui: UiContext,
}

impl<'a> Orchestrator<'a> {
    pub fn new(plan: &'a BuildPlan, options: &'a BuildOptions, ui: UiContext) -> Self {
        Self { plan, options, ui }
    }

    /// Make sure the entry holds a built artifact
    pub async fn ensure_built(&self) -> KilnResult<BuildReport> {
        let started = Instant::now();
        let entry = &self.plan.entry;
        let initial = entry.probe(&self.plan.spec)?;

        let mut report = BuildReport {
            initial,
            final_state: initial,
            ran_once: false,
            ran_build: false,
            elapsed: Duration::ZERO,
        };

        if initial.is_ready() && self.options.mode == BuildMode::Default {
            debug!("Cache hit for {}", entry.key);
            return Ok(report);
        }

        entry.create().await?;
        let _lock = EntryLock::acquire(entry.lock_path()).await?;

        let locked = entry.probe(&self.plan.spec)?;
        if locked.is_ready() && self.options.mode == BuildMode::Default {
            info!("Entry {} was built by another process", entry.key);
            report.final_state = locked;
            return Ok(report);
        }

        match self.options.mode {
            BuildMode::Default => {}
            BuildMode::Source => entry.clear_built().await?,
            BuildMode::Full => entry.clear_markers().await?,
        }

        let (state, failure) = self.run_states(&mut report).await;
        report.final_state = state;
        if let Some(e) = failure {
            return Err(e);
        }

        report.elapsed = started.elapsed();
        info!("Built {} in {:.1?}", entry.key, report.elapsed);
        Ok(report)
    }

    /// Step from Empty until Built or Failed; a failure carries its error
    async fn run_states(&self, report: &mut BuildReport) -> (EntryState, Option<KilnError>) {
        let key = &self.plan.entry.key;
        let mut state = EntryState::Empty;
        let mut failure = None;
        while !state.is_final() {
            let next = match self.advance(state, report).await {
                Ok(next) => next,
                Err(e) => {
                    failure = Some(e);
                    EntryState::Failed
                }
            };
            if next == EntryState::Failed {
                warn!("Entry {} {} -> {}", key, state, next);
            } else {
                debug!("Entry {} {} -> {}", key, state, next);
            }
            state = next;
        }
        (state, failure)
    }

    async fn advance(&self, state: EntryState, report: &mut BuildReport) -> KilnResult<EntryState> {
        let entry = &self.plan.entry;
        let spec = &self.plan.spec;
        match state {
            EntryState::Empty => {
                self.materialize().await?;
                Ok(EntryState::Materialized)
            }
            EntryState::Materialized => {
                if let Some(cmd) = &spec.build_once_cmd {
                    if entry.once_marker().is_file() {
                        debug!("Setup already done for {}", entry.key);
                    } else {
                        // built marker from the previous lifetime is stale now
                        entry.clear_built().await?;
                        self.run_step(BuildStep::Once, cmd).await?;
                        entry.mark_once_done().await?;
                        report.ran_once = true;
                    }
                }
                Ok(EntryState::OnceDone)
            }
            EntryState::OnceDone => {
                entry.clear_built().await?;
                self.run_step(BuildStep::Build, &spec.build_cmd).await?;
                entry.mark_built().await?;
                report.ran_build = true;
                Ok(EntryState::Built)
            }
            EntryState::Built | EntryState::Failed => Ok(state),
        }
    }

    /// Write the main source and every declared file into the entry
    async fn materialize(&self) -> KilnResult<()> {
        let entry = &self.plan.entry;
        let spec = &self.plan.spec;
        let source = self
            .plan
            .script
            .materialized_source(spec.replace_shebang_with.as_deref());

        entry.write_file(&spec.script_src, source.as_bytes()).await?;
        for file in &spec.files {
            entry.write_file(&file.path, file.content.as_bytes()).await?;
        }
        debug!(
            "Materialized {} file(s) into {}",
            spec.files.len() + 1,
            entry.dir.display()
        );
        Ok(())
    }

    async fn run_step(&self, step: BuildStep, command: &str) -> KilnResult<()> {
        let output = if self.options.show_logs {
            OutputMode::Stream
        } else {
            OutputMode::Capture
        };
        let source = self.source_path();
        let runner = StepRunner::new(&self.options.shell, &self.plan.entry.dir, &source, output);

        let spinner = BuildSpinner::new(&self.ui);
        if output == OutputMode::Capture {
            spinner.start(&format!("Running {}", step));
        }
        info!("Running {}", step);
        let outcome = runner.run(step, command).await;
        spinner.clear();

        outcome?.into_result()
    }

    fn source_path(&self) -> PathBuf {
        self.plan
            .script
            .absolute_path()
            .unwrap_or_else(|_| self.plan.script.path.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        root: PathBuf,
        script: PathBuf,
        log: PathBuf,
    }

    fn fixture(block: &str) -> Fixture {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("cache");
        let script = dir.path().join("tool.sh");
        let log = dir.path().join("log");
        let text = format!(
            "#!/usr/bin/env kiln\n# kiln-begin\n{}# kiln-end\necho hi\n",
            block.replace("LOG", log.to_str().unwrap())
        );
        std::fs::write(&script, text).unwrap();
        Fixture {
            _dir: dir,
            root,
            script,
            log,
        }
    }

    fn runs(log: &Path) -> Vec<String> {
        std::fs::read_to_string(log)
            .unwrap_or_default()
            .lines()
            .map(str::to_string)
            .collect()
    }

    const BLOCK: &str = "\
# build_once_cmd: echo once >> LOG
# build_cmd: echo build >> LOG && cp tool.sh out && chmod +x out
# target_bin: ./out
";

    async fn build(fx: &Fixture, mode: BuildMode) -> KilnResult<BuildReport> {
        let plan = BuildPlan::load(&fx.script, &fx.root).await?;
        let options = BuildOptions {
            mode,
            ..BuildOptions::default()
        };
        Orchestrator::new(&plan, &options, UiContext::non_interactive())
            .ensure_built()
            .await
    }

    #[tokio::test]
    async fn first_run_builds_then_hits_cache() {
        let fx = fixture(BLOCK);

        let report = build(&fx, BuildMode::Default).await.unwrap();
        assert_eq!(report.initial, EntryState::Empty);
        assert!(report.ran_once && report.ran_build);

        let report = build(&fx, BuildMode::Default).await.unwrap();
        assert!(report.was_cached());
        assert_eq!(report.final_state, EntryState::Built);
        assert_eq!(runs(&fx.log), vec!["once", "build"]);
    }

    #[tokio::test]
    async fn materialized_source_has_blank_shebang() {
        let fx = fixture(BLOCK);
        build(&fx, BuildMode::Default).await.unwrap();

        let plan = BuildPlan::load(&fx.script, &fx.root).await.unwrap();
        let source = std::fs::read_to_string(plan.entry.dir.join("tool.sh")).unwrap();
        assert!(source.starts_with("\n# kiln-begin\n"));
        assert!(std::fs::read_to_string(&fx.script)
            .unwrap()
            .starts_with("#!/usr/bin/env kiln\n"));
    }

    #[tokio::test]
    async fn deleted_artifact_rebuilds_without_setup() {
        let fx = fixture(BLOCK);
        build(&fx, BuildMode::Default).await.unwrap();

        let plan = BuildPlan::load(&fx.script, &fx.root).await.unwrap();
        std::fs::remove_file(plan.entry.dir.join("out")).unwrap();

        let report = build(&fx, BuildMode::Default).await.unwrap();
        assert_eq!(report.initial, EntryState::OnceDone);
        assert!(!report.ran_once && report.ran_build);
        assert_eq!(runs(&fx.log), vec!["once", "build", "build"]);
    }

    #[tokio::test]
    async fn source_mode_reruns_build_only() {
        let fx = fixture(BLOCK);
        build(&fx, BuildMode::Default).await.unwrap();
        build(&fx, BuildMode::Source).await.unwrap();
        assert_eq!(runs(&fx.log), vec!["once", "build", "build"]);
    }

    #[tokio::test]
    async fn full_mode_reruns_everything() {
        let fx = fixture(BLOCK);
        build(&fx, BuildMode::Default).await.unwrap();
        build(&fx, BuildMode::Full).await.unwrap();
        assert_eq!(runs(&fx.log), vec!["once", "build", "once", "build"]);
    }

    #[tokio::test]
    async fn failed_setup_is_retried() {
        let fx = fixture("# build_once_cmd: echo once >> LOG; test -f ok\n# build_cmd: echo build >> LOG\n# target_bin: /bin/true\n");

        let err = build(&fx, BuildMode::Default).await.unwrap_err();
        assert!(matches!(
            err,
            KilnError::BuildFailed {
                step: BuildStep::Once,
                ..
            }
        ));
        assert_eq!(runs(&fx.log), vec!["once"]);

        let plan = BuildPlan::load(&fx.script, &fx.root).await.unwrap();
        std::fs::write(plan.entry.dir.join("ok"), "").unwrap();
        build(&fx, BuildMode::Default).await.unwrap();
        assert_eq!(runs(&fx.log), vec!["once", "once", "build"]);
    }

    #[tokio::test]
    async fn failed_build_leaves_entry_unbuilt() {
        let fx = fixture("# build_cmd: exit 2\n# target_bin: /bin/true\n");

        let err = build(&fx, BuildMode::Default).await.unwrap_err();
        assert!(matches!(err, KilnError::BuildFailed { code: 2, .. }));

        let plan = BuildPlan::load(&fx.script, &fx.root).await.unwrap();
        assert!(!plan.entry.built_marker().exists());
        assert_eq!(plan.entry.probe(&plan.spec).unwrap(), EntryState::OnceDone);
    }

    #[tokio::test]
    async fn failing_step_ends_in_failed_state() {
        let fx = fixture("# build_once_cmd: exit 5\n# build_cmd: echo build >> LOG\n# target_bin: /bin/true\n");
        let plan = BuildPlan::load(&fx.script, &fx.root).await.unwrap();
        plan.entry.create().await.unwrap();
        let options = BuildOptions::default();
        let orchestrator = Orchestrator::new(&plan, &options, UiContext::non_interactive());

        let mut report = BuildReport {
            initial: EntryState::Empty,
            final_state: EntryState::Empty,
            ran_once: false,
            ran_build: false,
            elapsed: Duration::ZERO,
        };
        let (state, failure) = orchestrator.run_states(&mut report).await;

        assert_eq!(state, EntryState::Failed);
        assert!(matches!(
            failure,
            Some(KilnError::BuildFailed {
                step: BuildStep::Once,
                code: 5,
                ..
            })
        ));
        assert!(runs(&fx.log).is_empty(), "build_cmd must not run after setup fails");
    }

    #[tokio::test]
    async fn declared_files_are_materialized() {
        let fx = fixture(
            "# build_cmd: cat lib/a.txt >> LOG\n# target_bin: /bin/true\n# files:\n#  - path: lib/a.txt\n#    content: hello\n",
        );
        build(&fx, BuildMode::Default).await.unwrap();
        assert_eq!(runs(&fx.log), vec!["hello"]);
    }

    #[tokio::test]
    async fn concurrent_builds_run_once() {
        let fx = fixture(BLOCK);
        let (a, b) = tokio::join!(build(&fx, BuildMode::Default), build(&fx, BuildMode::Default));
        a.unwrap();
        b.unwrap();
        assert_eq!(runs(&fx.log), vec!["once", "build"]);
    }
}
