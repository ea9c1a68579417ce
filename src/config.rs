use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub watch: WatchConfig,
    pub ocr: OcrConfig,
    pub llm: LlmConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct WatchConfig {
    pub roots: Vec<PathBuf>,
    #[serde(default = "default_sidecar_suffix")]
    pub sidecar_suffix: String,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default = "default_scan_interval")]
    pub interval_secs: u64,
}

fn default_sidecar_suffix() -> String {
    ".sdx.json".to_string()
}
fn default_scan_interval() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct OcrConfig {
    pub host: String,
    #[serde(default = "default_ocr_mode")]
    pub mode: String,
    #[serde(default = "default_ocr_timeout")]
    pub timeout_secs: u64,
}

fn default_ocr_mode() -> String {
    "fast".to_string()
}
fn default_ocr_timeout() -> u64 {
    120
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_llm_host")]
    pub host: String,
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_auto_pull")]
    pub auto_pull_models: bool,
    #[serde(default = "default_pull_timeout")]
    pub pull_timeout_secs: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

fn default_llm_host() -> String {
    "http://localhost:11434".to_string()
}
fn default_temperature() -> f64 {
    0.1
}
fn default_llm_timeout() -> u64 {
    120
}
fn default_auto_pull() -> bool {
    true
}
fn default_pull_timeout() -> u64 {
    600
}
fn default_max_attempts() -> u32 {
    2
}

#[derive(Debug, Deserialize, Clone)]
pub struct PipelineConfig {
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
        }
    }
}

fn default_concurrency() -> usize {
    1
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    if config.watch.roots.is_empty() {
        anyhow::bail!("watch.roots must list at least one folder");
    }

    match config.ocr.mode.as_str() {
        "fast" | "thorough" => {}
        other => anyhow::bail!("Unknown ocr.mode: '{}'. Must be fast or thorough.", other),
    }

    if config.llm.model.trim().is_empty() {
        anyhow::bail!("llm.model must be set");
    }

    if !(0.0..=2.0).contains(&config.llm.temperature) {
        anyhow::bail!("llm.temperature must be in [0.0, 2.0]");
    }

    if config.llm.max_attempts < 1 {
        anyhow::bail!("llm.max_attempts must be >= 1");
    }

    if config.pipeline.concurrency < 1 {
        anyhow::bail!("pipeline.concurrency must be >= 1");
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(content: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(content.as_bytes()).unwrap();
        f
    }

    #[test]
    fn parses_minimal_config_with_defaults() {
        let f = write_config(
            r#"
[db]
path = "data/sdx.sqlite"

[watch]
roots = ["inbox"]

[ocr]
host = "http://localhost:8884"

[llm]
model = "llama3.2-vision"
"#,
        );
        let config = load_config(f.path()).unwrap();
        assert_eq!(config.watch.sidecar_suffix, ".sdx.json");
        assert_eq!(config.ocr.mode, "fast");
        assert_eq!(config.llm.host, "http://localhost:11434");
        assert!(config.llm.auto_pull_models);
        assert_eq!(config.llm.pull_timeout_secs, 600);
        assert_eq!(config.llm.max_attempts, 2);
        assert_eq!(config.pipeline.concurrency, 1);
    }

    #[test]
    fn rejects_empty_roots() {
        let f = write_config(
            r#"
[db]
path = "data/sdx.sqlite"

[watch]
roots = []

[ocr]
host = "http://localhost:8884"

[llm]
model = "llama3.2-vision"
"#,
        );
        assert!(load_config(f.path()).is_err());
    }

    #[test]
    fn rejects_unknown_ocr_mode() {
        let f = write_config(
            r#"
[db]
path = "data/sdx.sqlite"

[watch]
roots = ["inbox"]

[ocr]
host = "http://localhost:8884"
mode = "turbo"

[llm]
model = "llama3.2-vision"
"#,
        );
        assert!(load_config(f.path()).is_err());
    }

    #[test]
    fn rejects_out_of_range_temperature() {
        let f = write_config(
            r#"
[db]
path = "data/sdx.sqlite"

[watch]
roots = ["inbox"]

[ocr]
host = "http://localhost:8884"

[llm]
model = "llama3.2-vision"
temperature = 3.5
"#,
        );
        assert!(load_config(f.path()).is_err());
    }
}
