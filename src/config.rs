use crate::app::AppConfig;
use crate::autotune;
use crate::cache::DEFAULT_BATCH_SIZE;
use crate::decrypt::CiphertextEncoding;
use crate::hw::HwInfo;
use serde::Deserialize;
use std::fs::File;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;

pub const DEFAULT_CACHE_FILE: &str = "processed_files.txt";
pub const DEFAULT_EXTENSION: &str = "webp";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to open config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse JSON config {path}: {source}")]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("failed to parse YAML config {path}: {source}")]
    Yaml {
        path: PathBuf,
        source: serde_yaml::Error,
    },

    #[error("unsupported config format: {0} (expected .json, .yaml or .yml)")]
    UnsupportedFormat(PathBuf),

    #[error("missing required option `{0}`")]
    Missing(&'static str),

    #[error("input_dir is not a directory: {0}")]
    InputNotDir(PathBuf),

    #[error("output_dir must differ from input_dir ({0})")]
    SameDirs(PathBuf),

    #[error("output_dir {output} is inside input_dir {input}; outputs would be picked up as inputs")]
    OutputInsideInput { output: PathBuf, input: PathBuf },

    #[error("batch_size must be at least 1")]
    BatchSize,
}

/// Config file as written by users. Empty strings and non-positive
/// numbers mean "not set".
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub input_dir: String,
    pub output_dir: String,

    pub info_log: String,
    pub error_log: String,

    pub key: String,
    pub iv: String,

    pub cpu_num: i64,
    pub coroutine: i64,

    pub cache_file: String,

    pub batch_size: Option<usize>,
    pub extension: String,
    pub encoding: CiphertextEncoding,
    pub sync_ledger: bool,
}

/// Command-line values that replace file values when present.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub input_dir: Option<PathBuf>,
    pub output_dir: Option<PathBuf>,
    pub cache_file: Option<PathBuf>,
    pub cpu_num: Option<usize>,
    pub coroutine: Option<usize>,
    pub batch_size: Option<usize>,
}

fn non_empty(s: &str) -> Option<PathBuf> {
    if s.trim().is_empty() { None } else { Some(PathBuf::from(s)) }
}

/// Absolute, `..`-free form of `p` for containment checks. The longest
/// existing prefix is canonicalized so symlinks resolve; the tail, which
/// may not exist yet, is kept as written.
fn absolute_path(p: &Path) -> PathBuf {
    let abs = std::path::absolute(p).unwrap_or_else(|_| p.to_path_buf());
    let mut lexical = PathBuf::new();
    for c in abs.components() {
        match c {
            Component::CurDir => {}
            Component::ParentDir => {
                lexical.pop();
            }
            other => lexical.push(other),
        }
    }

    let mut tail = Vec::new();
    let mut base = lexical.as_path();
    loop {
        if let Ok(mut real) = base.canonicalize() {
            real.extend(tail.iter().rev());
            return real;
        }
        match (base.parent(), base.file_name()) {
            (Some(parent), Some(name)) => {
                tail.push(name);
                base = parent;
            }
            _ => break,
        }
    }
    lexical
}

fn positive(n: i64) -> Option<usize> {
    usize::try_from(n).ok().filter(|n| *n > 0)
}

impl FileConfig {
    pub fn info_log(&self) -> Option<PathBuf> {
        non_empty(&self.info_log)
    }

    pub fn error_log(&self) -> Option<PathBuf> {
        non_empty(&self.error_log)
    }

    pub fn apply(&mut self, o: &Overrides) {
        let path_str = |p: &PathBuf| p.to_string_lossy().into_owned();

        if let Some(p) = &o.input_dir {
            self.input_dir = path_str(p);
        }
        if let Some(p) = &o.output_dir {
            self.output_dir = path_str(p);
        }
        if let Some(p) = &o.cache_file {
            self.cache_file = path_str(p);
        }
        if let Some(n) = o.cpu_num {
            self.cpu_num = i64::try_from(n).unwrap_or(i64::MAX);
        }
        if let Some(n) = o.coroutine {
            self.coroutine = i64::try_from(n).unwrap_or(i64::MAX);
        }
        if o.batch_size.is_some() {
            self.batch_size = o.batch_size;
        }
    }
}

/// Load a config file; the format follows the extension (JSON when absent).
pub fn load_config(path: &Path) -> Result<FileConfig, ConfigError> {
    let ext = path
        .extension()
        .and_then(|s| s.to_str())
        .unwrap_or("json")
        .to_lowercase();

    let file = File::open(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    match ext.as_str() {
        "json" => serde_json::from_reader(file).map_err(|source| ConfigError::Json {
            path: path.to_path_buf(),
            source,
        }),
        "yaml" | "yml" => serde_yaml::from_reader(file).map_err(|source| ConfigError::Yaml {
            path: path.to_path_buf(),
            source,
        }),
        _ => Err(ConfigError::UnsupportedFormat(path.to_path_buf())),
    }
}

/// Validate and fill in defaults. Hardware-derived values are computed
/// here, once, from `hw`.
pub fn resolve(fc: &FileConfig, hw: &HwInfo) -> Result<AppConfig, ConfigError> {
    let input_dir = non_empty(&fc.input_dir).ok_or(ConfigError::Missing("input_dir"))?;
    if !input_dir.is_dir() {
        return Err(ConfigError::InputNotDir(input_dir));
    }

    let output_dir = non_empty(&fc.output_dir).ok_or(ConfigError::Missing("output_dir"))?;
    let (abs_in, abs_out) = (absolute_path(&input_dir), absolute_path(&output_dir));
    if abs_out == abs_in {
        return Err(ConfigError::SameDirs(output_dir));
    }
    if abs_out.starts_with(&abs_in) {
        return Err(ConfigError::OutputInsideInput {
            output: output_dir,
            input: input_dir,
        });
    }

    let batch_size = fc.batch_size.unwrap_or(DEFAULT_BATCH_SIZE);
    if batch_size == 0 {
        return Err(ConfigError::BatchSize);
    }

    let cache_file =
        non_empty(&fc.cache_file).unwrap_or_else(|| PathBuf::from(DEFAULT_CACHE_FILE));

    let extension = match fc.extension.trim().trim_start_matches('.') {
        "" => DEFAULT_EXTENSION.to_string(),
        ext => ext.to_string(),
    };

    let tune = autotune::resolve(hw, positive(fc.cpu_num), positive(fc.coroutine));

    Ok(AppConfig {
        input_dir,
        output_dir,
        cache_file,
        extension,
        batch_size,
        sync_ledger: fc.sync_ledger,
        tune,
    })
}
