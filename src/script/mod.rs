//! Script loading and config block extraction
//!
//! A script is read once per invocation into a [`ScriptDescriptor`]. The
//! descriptor never touches the file again: the cache entry receives a
//! materialized copy, and the script file itself stays byte-for-byte unchanged.

pub mod build_spec;
pub mod extract;
pub mod parser;

pub use build_spec::{BuildSpec, FileEntry, FALLBACK_SCRIPT_SRC};
pub use extract::{extract_block, ConfigBlock, BEGIN_MARKER, END_MARKER};

use crate::error::{KilnError, KilnResult};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

/// A script as read from disk
#[derive(Debug, Clone)]
pub struct ScriptDescriptor {
    /// Path as given on the command line
    pub path: PathBuf,
    /// Full script text
    pub text: String,
    /// First line, when it is a `#!` interpreter directive
    pub shebang: Option<String>,
    /// The embedded config block
    pub block: ConfigBlock,
}

impl ScriptDescriptor {
    /// Read a script and locate its config block
    pub async fn load(path: &Path) -> KilnResult<Self> {
        let bytes = fs::read(path)
            .await
            .map_err(|e| KilnError::io(format!("reading script {}", path.display()), e))?;
        let text = String::from_utf8(bytes).map_err(|_| KilnError::ScriptEncoding {
            path: path.to_path_buf(),
        })?;
        Self::from_text(path, text)
    }

    /// Build a descriptor from text already in memory
    pub fn from_text(path: impl Into<PathBuf>, text: String) -> KilnResult<Self> {
        let path = path.into();
        let shebang = text
            .lines()
            .next()
            .filter(|line| line.starts_with("#!"))
            .map(str::to_string);
        let block = extract_block(&path, &text)?;
        debug!(
            "Config block in {} at lines {}-{}",
            path.display(),
            block.begin_line,
            block.end_line
        );
        Ok(Self {
            path,
            text,
            shebang,
            block,
        })
    }

    /// Parse the config block into a build spec
    pub fn spec(&self) -> KilnResult<BuildSpec> {
        BuildSpec::from_block(&self.block, &self.file_name())
    }

    /// File name of the script, the default `script_src`
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| FALLBACK_SCRIPT_SRC.to_string())
    }

    /// Main source as written into the cache entry
    ///
    /// The shebang line is replaced (or blanked when `replacement` is
    /// `None`) so compilers don't choke on it; every other byte, and so
    /// every line number, is kept.
    pub fn materialized_source(&self, replacement: Option<&str>) -> String {
        if self.shebang.is_none() {
            return self.text.clone();
        }
        let replacement = replacement.unwrap_or("");
        match self.text.find('\n') {
            Some(pos) => {
                let first = &self.text[..pos];
                let ending = if first.ends_with('\r') { "\r" } else { "" };
                format!("{}{}{}", replacement, ending, &self.text[pos..])
            }
            None => replacement.to_string(),
        }
    }

    /// Absolute path of the script, for `KILN_SOURCE`
    pub fn absolute_path(&self) -> KilnResult<PathBuf> {
        self.path
            .canonicalize()
            .map_err(|e| KilnError::io(format!("resolving {}", self.path.display()), e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const GO_SCRIPT: &str = "\
#!/usr/bin/env kiln
package main

// kiln-begin
// build_cmd: go build -o script
// kiln-end

func main() {}
";

    #[test]
    fn detects_shebang() {
        let script = ScriptDescriptor::from_text("./s.go", GO_SCRIPT.to_string()).unwrap();
        assert_eq!(script.shebang.as_deref(), Some("#!/usr/bin/env kiln"));
        assert_eq!(script.block.begin_line, 4);
    }

    #[test]
    fn no_shebang_keeps_text() {
        let text = GO_SCRIPT.lines().skip(1).collect::<Vec<_>>().join("\n");
        let script = ScriptDescriptor::from_text("./s.go", text.clone()).unwrap();
        assert!(script.shebang.is_none());
        assert_eq!(script.materialized_source(Some("//")), text);
    }

    #[test]
    fn blanks_shebang_preserving_lines() {
        let script = ScriptDescriptor::from_text("./s.go", GO_SCRIPT.to_string()).unwrap();
        let source = script.materialized_source(None);

        assert!(source.starts_with("\npackage main\n"));
        assert_eq!(source.lines().count(), GO_SCRIPT.lines().count());
        assert_eq!(&source[1..], &GO_SCRIPT[GO_SCRIPT.find('\n').unwrap() + 1..]);
    }

    #[test]
    fn replaces_shebang() {
        let script = ScriptDescriptor::from_text("./s.go", GO_SCRIPT.to_string()).unwrap();
        let source = script.materialized_source(Some("//"));
        assert!(source.starts_with("//\npackage main\n"));
        assert_eq!(source.lines().count(), GO_SCRIPT.lines().count());
    }

    #[test]
    fn replaces_shebang_with_crlf() {
        let text = GO_SCRIPT.replace('\n', "\r\n");
        let script = ScriptDescriptor::from_text("./s.go", text).unwrap();
        assert!(script.materialized_source(None).starts_with("\r\npackage main\r\n"));
    }

    #[tokio::test]
    async fn load_reads_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("s.go");
        std::fs::write(&path, GO_SCRIPT).unwrap();

        let script = ScriptDescriptor::load(&path).await.unwrap();
        assert_eq!(script.text, GO_SCRIPT);
        let spec = script.spec().unwrap();
        assert_eq!(spec.build_cmd, "go build -o script");
        assert_eq!(spec.script_src, "s.go");
    }

    #[test]
    fn script_named_like_artifact_needs_script_src() {
        let err = ScriptDescriptor::from_text("/bin/script", GO_SCRIPT.to_string())
            .unwrap()
            .spec()
            .unwrap_err();
        assert!(matches!(err, KilnError::ConfigPath { .. }));
    }

    #[tokio::test]
    async fn load_rejects_non_utf8() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bin");
        std::fs::write(&path, [0xff, 0xfe, 0x00]).unwrap();

        let err = ScriptDescriptor::load(&path).await.unwrap_err();
        assert!(matches!(err, KilnError::ScriptEncoding { .. }));
    }
}
