// Language configuration management
// Loads the set of enabled languages from languages.json

use anyhow::{bail, Context, Result};
use grader_common::types::Language;
use serde::Deserialize;
use std::collections::HashSet;
use std::fs;
use std::path::Path;

/// The slice of a languages.json entry the API cares about; worker-only
/// fields (limits, runner command) are ignored
#[derive(Debug, Clone, Deserialize)]
struct LanguageEntry {
    name: String,
}

#[derive(Debug, Clone, Deserialize)]
struct LanguagesFile {
    languages: Vec<LanguageEntry>,
}

/// Registry of configured languages
/// This is the authoritative source for which languages are enabled
#[derive(Debug, Clone)]
pub struct LanguageRegistry {
    enabled_languages: HashSet<Language>,
}

impl LanguageRegistry {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content =
            fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> Result<Self> {
        let config: LanguagesFile =
            serde_json::from_str(content).context("Failed to parse languages.json")?;

        let mut enabled_languages = HashSet::new();
        for entry in &config.languages {
            match Language::from_str(&entry.name) {
                Some(lang) => {
                    enabled_languages.insert(lang);
                }
                None => bail!("Unknown language '{}' in languages.json", entry.name),
            }
        }

        if enabled_languages.is_empty() {
            bail!("No languages configured in languages.json");
        }

        Ok(Self { enabled_languages })
    }

    pub fn is_enabled(&self, language: Language) -> bool {
        self.enabled_languages.contains(&language)
    }

    pub fn enabled_languages(&self) -> Vec<Language> {
        let mut languages: Vec<Language> = self.enabled_languages.iter().copied().collect();
        languages.sort_by_key(|l| l.to_string());
        languages
    }
}
