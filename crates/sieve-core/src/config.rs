//! Lightweight configuration loader and path helpers.
//!
//! Uses Figment to merge `sieve.toml` + `sieve.<env>.toml` + `SIEVE_*` env vars.
//! Nested keys come from env vars with `__`, e.g. `SIEVE_PIPELINE__FINAL_K=5`.
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};

use crate::types::Normalization;

pub struct Config {
    figment: Figment,
}

impl Config {
    /// Load from the working directory, environment taken from `SIEVE_ENV` (default `dev`).
    pub fn load() -> anyhow::Result<Self> {
        let env_name = env::var("SIEVE_ENV").unwrap_or_else(|_| "dev".to_string());
        Self::load_in(Path::new("."), &env_name)
    }

    pub fn load_in(dir: &Path, env_name: &str) -> anyhow::Result<Self> {
        let mut figment = Figment::new().merge(Toml::file(dir.join("sieve.toml")));
        match env_name {
            "dev" | "development" => figment = figment.merge(Toml::file(dir.join("sieve.dev.toml"))),
            "prod" | "production" => figment = figment.merge(Toml::file(dir.join("sieve.prod.toml"))),
            "test" | "testing" => figment = figment.merge(Toml::file(dir.join("sieve.test.toml"))),
            other => tracing::warn!(env = other, "unknown SIEVE_ENV, loading base config only"),
        }
        figment = figment.merge(Env::prefixed("SIEVE_").split("__"));

        let config = Self { figment };
        config.pipeline()?.validate()?;
        Ok(config)
    }

    pub fn get<T>(&self, key: &str) -> anyhow::Result<T>
    where
        T: serde::de::DeserializeOwned,
    {
        self.figment
            .extract_inner(key)
            .map_err(|e| anyhow::anyhow!("Failed to get '{}': {}", key, e))
    }

    /// The `[pipeline]` section, defaults when absent.
    pub fn pipeline(&self) -> anyhow::Result<PipelineConfig> {
        if self.figment.find_value("pipeline").is_err() {
            return Ok(PipelineConfig::default());
        }
        self.get("pipeline")
    }
}

/// Settings for the default retrieve-then-rank pipeline the CLI assembles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub key_field: String,
    pub content_fields: Vec<String>,
    pub retriever_k: Option<usize>,
    pub ranker_k: Option<usize>,
    pub final_k: Option<usize>,
    pub normalization: Normalization,
    pub corpus: Option<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            key_field: "id".to_string(),
            content_fields: vec!["text".to_string()],
            retriever_k: Some(100),
            ranker_k: Some(10),
            final_k: None,
            normalization: Normalization::Max,
            corpus: None,
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.key_field.trim().is_empty() { anyhow::bail!("pipeline.key_field must not be empty"); }
        if self.content_fields.is_empty() { anyhow::bail!("pipeline.content_fields must name at least one field"); }
        if self.content_fields.iter().any(|f| f == &self.key_field) {
            anyhow::bail!("pipeline.content_fields must not contain the key field '{}'", self.key_field);
        }
        Ok(())
    }
}

/// Expand a user-provided path string:
/// - Expands leading '~' to the user's home directory
/// - Expands ${VAR} and $VAR environment variables
/// - Returns a PathBuf without attempting to canonicalize
pub fn expand_path<S: AsRef<str>>(input: S) -> PathBuf {
    let s = input.as_ref();
    let expanded_env = shellexpand::env(s).unwrap_or(std::borrow::Cow::Borrowed(s));
    let expanded = shellexpand::tilde(&expanded_env);
    PathBuf::from(expanded.as_ref())
}

/// Resolve a possibly relative path against a given base directory after expansion.
pub fn resolve_with_base<S: AsRef<str>>(base: &Path, p: S) -> PathBuf {
    let p = expand_path(p);
    if p.is_absolute() { p } else { base.join(p) }
}
