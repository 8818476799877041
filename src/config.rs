use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Result, TriageError};
use crate::models::{validate_query, ClassificationTable, LabelRules, Selector, SelectorTable};
use crate::search::MAX_PAGE_SIZE;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub client: ClientConfig,
    #[serde(default)]
    pub classifier: ClassifierConfig,
    #[serde(default)]
    pub extractor: ExtractorConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    /// Recorded for compatibility; every call is made sequentially
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_requests: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            page_size: default_page_size(),
            max_concurrent_requests: default_max_concurrent(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierConfig {
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
    #[serde(default = "default_label_rules")]
    pub labels: Vec<LabelRules>,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            cooldown_secs: default_cooldown_secs(),
            labels: default_label_rules(),
        }
    }
}

impl ClassifierConfig {
    pub fn schedule(&self) -> Schedule {
        Schedule {
            interval: Duration::from_secs(self.interval_secs),
            cooldown: Duration::from_secs(self.cooldown_secs),
        }
    }

    pub fn table(&self) -> ClassificationTable {
        ClassificationTable::new(self.labels.clone())
    }
}

/// Waits between classifier cycles
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Schedule {
    /// Pause after a completed cycle
    pub interval: Duration,
    /// Pause after a cycle abandoned at authentication or by a panic
    pub cooldown: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractorConfig {
    #[serde(default = "default_completion_label")]
    pub completion_label: String,
    #[serde(default = "default_staging_dir")]
    pub staging_dir: PathBuf,
    #[serde(default = "default_file_extension")]
    pub file_extension: String,
    #[serde(default = "default_handoff_command")]
    pub handoff_command: Vec<String>,
    #[serde(default = "default_selectors")]
    pub selectors: Vec<Selector>,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            completion_label: default_completion_label(),
            staging_dir: default_staging_dir(),
            file_extension: default_file_extension(),
            handoff_command: default_handoff_command(),
            selectors: default_selectors(),
        }
    }
}

impl ExtractorConfig {
    pub fn selector_table(&self) -> SelectorTable {
        SelectorTable::new(self.selectors.clone())
    }
}

fn default_max_retries() -> u32 {
    3
}

fn default_page_size() -> u32 {
    100
}

fn default_max_concurrent() -> usize {
    1
}

fn default_interval_secs() -> u64 {
    180
}

fn default_cooldown_secs() -> u64 {
    120
}

fn default_completion_label() -> String {
    "emails-extracted-by-bot".to_string()
}

fn default_staging_dir() -> PathBuf {
    PathBuf::from("attachments")
}

fn default_file_extension() -> String {
    "eml".to_string()
}

fn default_handoff_command() -> Vec<String> {
    vec!["python3".to_string(), "extractor.py".to_string()]
}

fn rules(queries: &[&str]) -> Vec<String> {
    queries.iter().map(|q| q.to_string()).collect()
}

/// Vendor labels in priority order. Self-exclusions are appended when the
/// table is built, so only cross-vendor exclusions are spelled out here.
fn default_label_rules() -> Vec<LabelRules> {
    vec![
        LabelRules {
            label: ".a-nomad-unread".to_string(),
            rules: rules(&[
                "\"Your Nomad order\" in:inbox is:unread",
                "\"Nomad\" in:inbox is:unread",
            ]),
        },
        LabelRules {
            label: ".a-simly-unread".to_string(),
            rules: rules(&[
                "\"Here is your esim!\" in:inbox is:unread",
                "\"Simly\" in:inbox is:unread",
                "\"live chat with us\" is:unread in:inbox",
            ]),
        },
        LabelRules {
            label: ".a-airaloTine-unread".to_string(),
            rules: rules(&["\"Tine Mobile\" in:inbox is:unread"]),
        },
        LabelRules {
            label: ".a-airalo-unread".to_string(),
            rules: rules(&[
                "\"AirAlo\" in:inbox is:unread -label:.a-airaloTine-unread",
                "\"Menalink\" in:inbox is:unread",
            ]),
        },
        LabelRules {
            label: ".a-mogo-unread".to_string(),
            rules: rules(&["\"Mogo eSIM\" in:inbox is:unread"]),
        },
        LabelRules {
            label: ".a-holafly-unread".to_string(),
            rules: rules(&[
                "\"Reference number\" in:inbox is:unread",
                "\"Holafly\" in:inbox is:unread",
                "\"unlimited\" in:inbox is:unread",
            ]),
        },
        LabelRules {
            label: ".a-numero-unread".to_string(),
            rules: rules(&["\"numero\" in:inbox is:unread"]),
        },
        LabelRules {
            label: ".a-truly-unread".to_string(),
            rules: rules(&[
                "\"truly\" in:inbox is:unread",
                "\"truely\" in:inbox is:unread",
            ]),
        },
        LabelRules {
            label: ".a-unidentified-unread".to_string(),
            rules: rules(&[
                "-label:.a-holafly-unread -label:.a-nomad-unread -label:.a-simly-unread \
                 -label:.a-airalo-unread -label:.a-airaloTine-unread -label:.a-truly-unread \
                 -label:.a-mogo-unread -label:.a-numero-unread is:unread in:inbox",
            ]),
        },
    ]
}

fn selector(key: &str, aliases: &[&str], queries: &[&str]) -> Selector {
    Selector {
        key: key.to_string(),
        aliases: aliases.iter().map(|a| a.to_string()).collect(),
        queries: rules(queries),
    }
}

fn default_selectors() -> Vec<Selector> {
    vec![
        selector(
            "simly",
            &["1"],
            &[
                "\"Here is your esim!\" in:inbox is:unread",
                "\"Simly\" in:inbox is:unread",
                "\"live chat with us\" is:unread in:inbox",
                "label:.a-simly-unread is:unread",
            ],
        ),
        selector(
            "nomad",
            &["2"],
            &[
                "\"Your Nomad order\" in:all is:unread",
                "\"Nomad\" in:inbox is:unread",
                "\"QR code installation\" is:unread in:inbox",
                "label:.a-nomad-unread is:unread",
            ],
        ),
        selector(
            "holafly",
            &["3"],
            &["\"Reference number\" in:all is:unread", "\"Holafly\" in:all is:unread"],
        ),
        selector("airalo", &["4"], &["label:.a-airalo-unread is:unread"]),
        selector("inbox-other", &["5"], &["-airalo -holafly in:inbox is:unread"]),
        selector(
            "mogo",
            &["6"],
            &["\"Mogo eSIM\" in:inbox", "label:.a-mogo-unread in:all"],
        ),
        selector("simly-spam", &["7"], &["in:spam simly is:unread"]),
        selector("extracted-read", &["8"], &["label:emails-extracted-by-bot is:read"]),
        selector(
            "airalo-menalink",
            &["9"],
            &["label:.a-airalo-unread is:unread \"menalink\""],
        ),
        selector("unidentified", &["10"], &["label:.a-unidentified-unread is:unread"]),
        selector("simly-palestine", &["11"], &["\"simly-Palestine\" is:unread in:all"]),
        selector(
            "simly-middle-east",
            &["12"],
            &["\"simly-Middle East\" is:unread in:all"],
        ),
        selector(
            "airalo-discover",
            &["13"],
            &["label:.a-airalo-unread is:unread \"Discover\""],
        ),
        selector(
            "holafly-egypt",
            &["14"],
            &["label:.a-holafly-unread is:unread \"Egypt\""],
        ),
        selector(
            "holafly-israel",
            &["15"],
            &["label:.a-holafly-unread is:unread \"Israel\""],
        ),
        selector("truly", &["16"], &["label:.a-truly-unread is:unread in:all"]),
    ]
}

impl Config {
    pub async fn load(path: &Path) -> Result<Self> {
        // If file doesn't exist, return default config with warning
        if !path.exists() {
            tracing::warn!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| TriageError::ConfigError(format!("Failed to read config file: {}", e)))?;

        let config: Self = toml::from_str(&content)
            .map_err(|e| TriageError::ConfigError(format!("Failed to parse config file: {}", e)))?;

        config.validate()?;

        tracing::info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    pub async fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                TriageError::ConfigError(format!("Failed to create config directory: {}", e))
            })?;
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| TriageError::ConfigError(format!("Failed to serialize config: {}", e)))?;

        tokio::fs::write(path, content)
            .await
            .map_err(|e| TriageError::ConfigError(format!("Failed to write config file: {}", e)))?;

        tracing::info!("Saved configuration to {:?}", path);
        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.client.page_size == 0 || self.client.page_size > MAX_PAGE_SIZE {
            return Err(TriageError::ConfigError(format!(
                "client.page_size must be between 1 and {}",
                MAX_PAGE_SIZE
            )));
        }

        if self.classifier.interval_secs == 0 {
            return Err(TriageError::ConfigError(
                "classifier.interval_secs must be greater than 0".to_string(),
            ));
        }
        if self.classifier.cooldown_secs == 0 {
            return Err(TriageError::ConfigError(
                "classifier.cooldown_secs must be greater than 0".to_string(),
            ));
        }

        let mut seen_labels = HashSet::new();
        for entry in &self.classifier.labels {
            if entry.label.trim().is_empty() {
                return Err(TriageError::ConfigError(
                    "classifier.labels contains an empty label name".to_string(),
                ));
            }
            if !seen_labels.insert(entry.label.as_str()) {
                return Err(TriageError::ConfigError(format!(
                    "classifier label '{}' is defined more than once",
                    entry.label
                )));
            }
            if entry.rules.is_empty() {
                return Err(TriageError::ConfigError(format!(
                    "classifier label '{}' has no rules",
                    entry.label
                )));
            }
            for rule in &entry.rules {
                validate_query(rule).map_err(|reason| {
                    TriageError::ConfigError(format!(
                        "malformed rule for label '{}': {}",
                        entry.label, reason
                    ))
                })?;
            }
        }

        // The label name ends up inside every rule, so check the built rules too
        for entry in self.classifier.table().iter() {
            for rule in &entry.rules {
                validate_query(rule).map_err(|reason| {
                    TriageError::ConfigError(format!(
                        "rule for label '{}' is malformed once its self-exclusion is added: {}",
                        entry.label, reason
                    ))
                })?;
            }
        }

        let extractor = &self.extractor;
        if extractor.completion_label.trim().is_empty() {
            return Err(TriageError::ConfigError(
                "extractor.completion_label cannot be empty".to_string(),
            ));
        }
        if extractor.staging_dir.as_os_str().is_empty() {
            return Err(TriageError::ConfigError(
                "extractor.staging_dir cannot be empty".to_string(),
            ));
        }
        if extractor.file_extension.is_empty()
            || extractor.file_extension.contains(['/', '\\', '.'])
        {
            return Err(TriageError::ConfigError(format!(
                "extractor.file_extension '{}' must be a bare extension such as 'eml'",
                extractor.file_extension
            )));
        }

        let mut seen_keys = HashSet::new();
        for selector in &extractor.selectors {
            for key in std::iter::once(&selector.key).chain(selector.aliases.iter()) {
                if key.trim().is_empty() {
                    return Err(TriageError::ConfigError(
                        "extractor.selectors contains an empty key or alias".to_string(),
                    ));
                }
                if !seen_keys.insert(key.as_str()) {
                    return Err(TriageError::ConfigError(format!(
                        "selector key '{}' is used more than once",
                        key
                    )));
                }
            }
            if selector.queries.is_empty() {
                return Err(TriageError::ConfigError(format!(
                    "selector '{}' has no queries",
                    selector.key
                )));
            }
            for query in &selector.queries {
                validate_query(query).map_err(|reason| {
                    TriageError::ConfigError(format!(
                        "malformed query for selector '{}': {}",
                        selector.key, reason
                    ))
                })?;
            }
        }

        tracing::debug!("Configuration validation passed");
        Ok(())
    }

    /// Create an example configuration file
    pub async fn create_example(path: &Path) -> Result<()> {
        let config = Self::default();
        config.save(path).await
    }
}
