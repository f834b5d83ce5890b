// Language and process configuration for the grader worker
use anyhow::{bail, Context, Result};
use grader_common::types::Language;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::net::SocketAddr;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};

/// How the runner inside the image is started
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LanguageExecution {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LanguageConfig {
    pub name: String,
    pub version: String,
    pub image: String,
    pub execution: LanguageExecution,
    pub memory_limit_mb: u32,
    pub cpu_limit: f32,
    #[serde(default = "default_pids_limit")]
    pub pids_limit: i64,
}

fn default_pids_limit() -> i64 {
    64
}

#[derive(Debug, Serialize, Deserialize)]
struct LanguagesJson {
    languages: Vec<LanguageConfig>,
}

/// Language configuration manager
#[derive(Debug, Clone)]
pub struct LanguageConfigManager {
    configs: HashMap<String, LanguageConfig>,
}

impl LanguageConfigManager {
    /// Load language configurations from languages.json
    pub fn load(config_path: &Path) -> Result<Self> {
        if !config_path.exists() {
            bail!("Language config file not found: {}", config_path.display());
        }

        let content = fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read {}", config_path.display()))?;
        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> Result<Self> {
        let languages_json: LanguagesJson =
            serde_json::from_str(content).context("Failed to parse languages.json")?;

        let mut configs = HashMap::new();
        for lang in languages_json.languages {
            let Some(language) = Language::from_str(&lang.name) else {
                bail!("Unsupported language in config: {}", lang.name);
            };
            configs.insert(language.to_string(), lang);
        }

        Ok(Self { configs })
    }

    /// Get configuration for a specific language
    pub fn get_config(&self, language: &Language) -> Result<&LanguageConfig> {
        let lang_name = language.to_string();
        self.configs
            .get(&lang_name)
            .ok_or_else(|| anyhow::anyhow!("No configuration found for language: {}", lang_name))
    }

    pub fn get_image(&self, language: &Language) -> Result<String> {
        Ok(self.get_config(language)?.image.clone())
    }

    /// Runner command line: `command` followed by `args`
    pub fn get_command(&self, language: &Language) -> Result<Vec<String>> {
        let execution = &self.get_config(language)?.execution;
        Ok(std::iter::once(execution.command.clone())
            .chain(execution.args.iter().cloned())
            .collect())
    }

    pub fn get_memory_limit_mb(&self, language: &Language) -> Result<u32> {
        Ok(self.get_config(language)?.memory_limit_mb)
    }

    pub fn get_cpu_limit(&self, language: &Language) -> Result<f32> {
        Ok(self.get_config(language)?.cpu_limit)
    }

    pub fn get_pids_limit(&self, language: &Language) -> Result<i64> {
        Ok(self.get_config(language)?.pids_limit)
    }

    /// List all supported languages
    pub fn list_languages(&self) -> Vec<String> {
        let mut names: Vec<String> = self.configs.keys().cloned().collect();
        names.sort();
        names
    }
}

/// One slot per available CPU
fn default_slots() -> usize {
    std::thread::available_parallelism().map_or(1, NonZeroUsize::get)
}

/// Process-level settings read from the environment
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerSettings {
    pub redis_url: String,
    pub language: Language,
    pub languages_config: PathBuf,
    /// Submissions graded concurrently by this worker
    pub slots: usize,
    /// Deliveries of one job before it is resolved as a system error
    pub max_attempts: u32,
    pub health_addr: SocketAddr,
}

impl WorkerSettings {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let language_str = lookup("WORKER_LANGUAGE").unwrap_or_else(|| "python".to_string());
        let language = Language::from_str(&language_str)
            .with_context(|| format!("Invalid WORKER_LANGUAGE: {}", language_str))?;

        let slots = match lookup("WORKER_SLOTS") {
            Some(raw) => raw
                .parse::<usize>()
                .ok()
                .filter(|n| *n > 0)
                .with_context(|| format!("Invalid WORKER_SLOTS: {}", raw))?,
            None => default_slots(),
        };

        let max_attempts = match lookup("MAX_ATTEMPTS") {
            Some(raw) => raw
                .parse::<u32>()
                .ok()
                .filter(|n| *n > 0)
                .with_context(|| format!("Invalid MAX_ATTEMPTS: {}", raw))?,
            None => 3,
        };

        let health_addr = lookup("HEALTH_ADDR")
            .unwrap_or_else(|| "0.0.0.0:9090".to_string());
        let health_addr = health_addr
            .parse()
            .with_context(|| format!("Invalid HEALTH_ADDR: {}", health_addr))?;

        Ok(Self {
            redis_url: lookup("REDIS_URL").unwrap_or_else(|| "redis://127.0.0.1:6379".to_string()),
            language,
            languages_config: lookup("LANGUAGES_CONFIG")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("config/languages.json")),
            slots,
            max_attempts,
            health_addr,
        })
    }
}
