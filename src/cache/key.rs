//! Content hashing for cache entry identity
//!
//! The key covers every input that can change what gets built: the config
//! fields, the full script text and each declared file. It deliberately
//! ignores the script's directory, timestamps and the environment, so the same
//! script content always lands in the same entry.

use crate::script::{BuildSpec, ScriptDescriptor};
use sha2::{Digest, Sha256};
use std::fmt;

/// Bumped whenever the hashed layout changes
const KEY_VERSION: &[u8] = b"kiln-cache-key-v1";

/// Hex characters kept from the digest (128 bits)
const KEY_LEN: usize = 32;

/// Identity of a cache entry
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    /// Hash a script and its parsed build spec
    pub fn compute(script: &ScriptDescriptor, spec: &BuildSpec) -> Self {
        let mut hasher = KeyHasher::new();

        hasher.field(b"script_src", spec.script_src.as_bytes());
        hasher.optional(b"build_once_cmd", spec.build_once_cmd.as_deref());
        hasher.field(b"build_cmd", spec.build_cmd.as_bytes());
        hasher.optional(b"replace_shebang_with", spec.replace_shebang_with.as_deref());
        hasher.field(b"target_bin", spec.target_bin.as_bytes());
        hasher.optional(b"target_interpreter", spec.target_interpreter.as_deref());
        hasher.field(b"source", script.text.as_bytes());

        hasher.count(b"files", spec.files.len());
        for file in &spec.files {
            hasher.field(b"file.path", file.path.as_bytes());
            hasher.field(b"file.content", file.content.as_bytes());
        }

        Self(hasher.finish())
    }

    /// Hex string used as the entry directory name
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// SHA-256 over length-prefixed fields, so no two field layouts collide
struct KeyHasher(Sha256);

impl KeyHasher {
    fn new() -> Self {
        let mut hasher = Sha256::new();
        hasher.update(KEY_VERSION);
        Self(hasher)
    }

    fn field(&mut self, name: &[u8], value: &[u8]) {
        self.0.update((name.len() as u64).to_le_bytes());
        self.0.update(name);
        self.0.update((value.len() as u64).to_le_bytes());
        self.0.update(value);
    }

    fn optional(&mut self, name: &[u8], value: Option<&str>) {
        match value {
            Some(v) => {
                self.0.update([1u8]);
                self.field(name, v.as_bytes());
            }
            None => {
                self.0.update([0u8]);
                self.field(name, b"");
            }
        }
    }

    fn count(&mut self, name: &[u8], n: usize) {
        self.field(name, &(n as u64).to_le_bytes());
    }

    fn finish(self) -> String {
        let digest = self.0.finalize();
        let mut hex = hex::encode(digest);
        hex.truncate(KEY_LEN);
        hex
    }
}
