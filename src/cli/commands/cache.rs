//! Cache command - inspect a script's cache entry

use super::CommandContext;
use crate::build::BuildPlan;
use crate::cache::{format_bytes, EntryState};
use crate::cli::args::{CacheAction, CacheArgs, CacheItem, OutputFormat};
use crate::error::KilnResult;
use crate::ui::{self, UiContext};
use chrono::{DateTime, Utc};
use console::style;
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Execute the cache command
pub async fn execute(args: CacheArgs, ctx: &CommandContext) -> KilnResult<()> {
    let cache_root = ctx.cache_root()?;

    match args.action {
        CacheAction::Info { script, format } => {
            let info = CacheInfo::collect(&script, &cache_root).await?;
            match format {
                OutputFormat::Table => print_info_table(&info),
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&info)?),
            }
        }
        CacheAction::Get { item, script } => {
            let info = CacheInfo::collect(&script, &cache_root).await?;
            println!("{}", info.get(item));
        }
    }
    Ok(())
}

/// Everything known about one script's cache entry
#[derive(Debug, Serialize)]
pub struct CacheInfo {
    pub script: PathBuf,
    pub key: String,
    pub cache_path: PathBuf,
    pub state: EntryState,
    pub script_src: PathBuf,
    pub target: String,
    pub size_bytes: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub built_at: Option<DateTime<Utc>>,
}

impl CacheInfo {
    /// Inspect the entry for `script` without building anything
    pub async fn collect(script: &Path, cache_root: &Path) -> KilnResult<Self> {
        let plan = BuildPlan::load(script, cache_root).await?;
        let entry = &plan.entry;
        let state = entry.probe(&plan.spec)?;
        let built_at = entry.read_built_marker().await?.map(|m| m.built_at);

        Ok(Self {
            script: script.to_path_buf(),
            key: entry.key.to_string(),
            cache_path: entry.dir.clone(),
            state,
            script_src: entry.dir.join(&plan.spec.script_src),
            target: entry.target(&plan.spec)?.display(),
            size_bytes: entry.size()?,
            built_at,
        })
    }

    /// Value of a single item as printed by `cache get`
    pub fn get(&self, item: CacheItem) -> String {
        match item {
            CacheItem::CachePath => self.cache_path.display().to_string(),
            CacheItem::Key => self.key.clone(),
            CacheItem::State => self.state.to_string(),
            CacheItem::ScriptSrc => self.script_src.display().to_string(),
            CacheItem::Target => self.target.clone(),
        }
    }
}

fn print_info_table(info: &CacheInfo) {
    let ctx = UiContext::detect();

    let state = match info.state {
        EntryState::Built => style(info.state.as_str()).green().to_string(),
        EntryState::Empty => style(info.state.as_str()).dim().to_string(),
        _ => style(info.state.as_str()).yellow().to_string(),
    };

    ui::section(&ctx, &format!("Script: {}", info.script.display()));
    ui::key_value(&ctx, "key", &info.key);
    ui::key_value(&ctx, "cache_path", &info.cache_path.display().to_string());
    ui::key_value(&ctx, "state", &state);
    ui::key_value(&ctx, "script_src", &info.script_src.display().to_string());
    ui::key_value(&ctx, "target", &info.target);
    ui::key_value(&ctx, "size", &format_bytes(info.size_bytes));
    if let Some(built_at) = info.built_at {
        ui::key_value(&ctx, "built_at", &built_at.format("%Y-%m-%d %H:%M:%S UTC").to_string());
    }
}
