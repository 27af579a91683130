//! Build spec: the typed view of a script's config block

use crate::error::{KilnError, KilnResult};
use crate::script::extract::ConfigBlock;
use crate::script::parser::{self, Entry, Item, Node};
use serde::Serialize;
use std::path::{Component, Path};
use tracing::debug;

/// Main source name used when the script path has no file name
pub const FALLBACK_SCRIPT_SRC: &str = "main";

/// Default artifact, relative to the cache entry
pub const DEFAULT_TARGET_BIN: &str = "./script";

/// Placeholder in `target_bin` replaced by the cache entry directory
pub const CACHE_DIR_PLACEHOLDER: &str = "@@@";

/// File names kiln keeps inside every cache entry
pub const RESERVED_NAMES: &[&str] = &[".kiln-once", ".kiln-built", ".kiln-lock"];

/// An extra file to write next to the main source
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileEntry {
    pub path: String,
    pub content: String,
}

/// Everything the config block declares
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuildSpec {
    /// Relative path the main source is written to
    pub script_src: String,
    /// Setup command run once per cache entry
    pub build_once_cmd: Option<String>,
    /// Command producing the artifact
    pub build_cmd: String,
    /// Replacement for the shebang line; blanked when unset
    pub replace_shebang_with: Option<String>,
    /// Artifact command line; `@@@` expands to the cache entry
    pub target_bin: String,
    /// Command prefixed to `target_bin`, e.g. `/usr/bin/env python3`
    pub target_interpreter: Option<String>,
    /// Extra files, in declaration order
    pub files: Vec<FileEntry>,
}

impl BuildSpec {
    /// Parse and validate a config block
    ///
    /// `default_src` names the main source when `script_src` is unset;
    /// callers pass the script's own file name.
    pub fn from_block(block: &ConfigBlock, default_src: &str) -> KilnResult<Self> {
        let node = parser::parse(&block.lines, block.first_line())?;
        let spec = Self::from_node(node, block.begin_line, default_src)?;
        spec.validate()?;
        debug!("Build spec parsed: {:?}", spec);
        Ok(spec)
    }

    fn from_node(node: Node, begin_line: usize, default_src: &str) -> KilnResult<Self> {
        let Node::Map(entries) = node else {
            return Err(KilnError::block(begin_line, "config block must be a mapping"));
        };

        let mut script_src = None;
        let mut build_once_cmd = None;
        let mut build_cmd = None;
        let mut replace_shebang_with = None;
        let mut target_bin = None;
        let mut target_interpreter = None;
        let mut files = Vec::new();

        for entry in entries {
            match entry.key.as_str() {
                "script_src" => script_src = string_value(&entry)?,
                "build_once_cmd" => build_once_cmd = string_value(&entry)?,
                "build_cmd" => build_cmd = string_value(&entry)?,
                "replace_shebang_with" => replace_shebang_with = string_value(&entry)?,
                "target_bin" => target_bin = string_value(&entry)?,
                "target_interpreter" => target_interpreter = string_value(&entry)?,
                "files" => files = file_entries(entry)?,
                other => {
                    return Err(KilnError::block(
                        entry.line,
                        format!("unknown key '{}'", other),
                    ))
                }
            }
        }

        Ok(Self {
            script_src: non_blank(script_src).unwrap_or_else(|| default_src.to_string()),
            build_once_cmd: non_blank(build_once_cmd),
            build_cmd: non_blank(build_cmd).ok_or(KilnError::MissingKey("build_cmd"))?,
            replace_shebang_with,
            target_bin: non_blank(target_bin).unwrap_or_else(|| DEFAULT_TARGET_BIN.to_string()),
            target_interpreter: non_blank(target_interpreter),
            files,
        })
    }

    /// Check that all declared paths stay inside the cache entry
    pub fn validate(&self) -> KilnResult<()> {
        let mut seen: Vec<&str> = Vec::with_capacity(self.files.len() + 1);
        for path in std::iter::once(self.script_src.as_str())
            .chain(self.files.iter().map(|f| f.path.as_str()))
        {
            validate_relative(path)?;
            let normalized = path.trim_start_matches("./");
            if seen.contains(&normalized) {
                return Err(KilnError::ConfigPath {
                    path: path.to_string(),
                    reason: "declared more than once".into(),
                });
            }
            seen.push(normalized);
        }

        if let Some(artifact) = self.artifact_relative() {
            if normalize(&self.script_src) == normalize(artifact) {
                return Err(KilnError::ConfigPath {
                    path: self.script_src.clone(),
                    reason: format!(
                        "the main source would overwrite the artifact '{}'; set script_src",
                        self.target_bin
                    ),
                });
            }
        }
        Ok(())
    }

    /// `target_bin`'s program relative to the cache entry, when it lives there
    fn artifact_relative(&self) -> Option<&str> {
        let program = self.target_bin.split_whitespace().next()?;
        program
            .strip_prefix(CACHE_DIR_PLACEHOLDER)
            .and_then(|rest| rest.strip_prefix('/'))
            .or_else(|| program.strip_prefix("./"))
    }
}

/// Path with `.` components dropped, for comparing entry-relative names
fn normalize(path: &str) -> String {
    Path::new(path)
        .components()
        .filter(|c| !matches!(c, Component::CurDir))
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

fn validate_relative(path: &str) -> KilnResult<()> {
    let invalid = |reason: &str| KilnError::ConfigPath {
        path: path.to_string(),
        reason: reason.to_string(),
    };

    if path.trim().is_empty() {
        return Err(invalid("path is empty"));
    }
    let mut normal = 0;
    for component in Path::new(path).components() {
        match component {
            Component::Normal(_) => normal += 1,
            Component::CurDir => {}
            Component::ParentDir => return Err(invalid("'..' is not allowed")),
            Component::RootDir | Component::Prefix(_) => {
                return Err(invalid("must be relative to the cache entry"))
            }
        }
    }
    if normal == 0 {
        return Err(invalid("does not name a file"));
    }
    if RESERVED_NAMES.contains(&path.trim_start_matches("./")) {
        return Err(invalid("name is reserved by kiln"));
    }
    Ok(())
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn string_value(entry: &Entry) -> KilnResult<Option<String>> {
    match &entry.value {
        Node::Empty => Ok(None),
        Node::Scalar(s) => Ok(Some(s.clone())),
        Node::Seq(_) | Node::Map(_) => Err(KilnError::block(
            entry.line,
            format!("'{}' must be a string", entry.key),
        )),
    }
}

fn file_entries(entry: Entry) -> KilnResult<Vec<FileEntry>> {
    let items = match entry.value {
        Node::Empty => return Ok(Vec::new()),
        Node::Seq(items) => items,
        _ => {
            return Err(KilnError::block(
                entry.line,
                "'files' must be a list of path/content entries",
            ))
        }
    };
    items.into_iter().map(file_entry).collect()
}

fn file_entry(item: Item) -> KilnResult<FileEntry> {
    let Node::Map(fields) = item.node else {
        return Err(KilnError::block(
            item.line,
            "files entry must have 'path' and 'content'",
        ));
    };

    let mut path = None;
    let mut content = None;
    for field in &fields {
        match field.key.as_str() {
            "path" => path = string_value(field)?,
            "content" => content = Some(string_value(field)?.unwrap_or_default()),
            other => {
                return Err(KilnError::block(
                    field.line,
                    format!("unknown files key '{}'", other),
                ))
            }
        }
    }

    let path = non_blank(path)
        .ok_or_else(|| KilnError::block(item.line, "files entry is missing 'path'"))?;
    let content = content.ok_or_else(|| {
        KilnError::block(item.line, format!("files entry '{}' is missing 'content'", path))
    })?;
    Ok(FileEntry { path, content })
}
