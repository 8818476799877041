//! Command-line interface

use clap::{Parser, Subcommand};
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::auth;
use crate::client::{GmailClient, ProductionGmailClient};
use crate::config::Config;
use crate::error::{Result, TriageError};
use crate::extractor::{ExtractionReport, Extractor};
use crate::labeler::Labeler;

#[derive(Parser, Debug)]
#[command(name = "esim-triage")]
#[command(version)]
#[command(about = "Sorts eSIM vendor emails into labels and extracts them for processing", long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    pub config: PathBuf,

    /// Path to OAuth2 credentials file
    #[arg(long, default_value = "credentials.json")]
    pub credentials: PathBuf,

    /// Path to token cache file
    #[arg(long, default_value = ".esim-triage/token.json")]
    pub token_cache: PathBuf,

    /// Verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Label vendor emails in a loop until killed
    Classify,

    /// Save matching emails to the staging directory and mark them extracted
    Extract {
        /// Vendor selector, by name or legacy number (see `selectors`)
        selector: String,

        /// Number of emails to extract
        #[arg(default_value_t = 1)]
        count: usize,
    },

    /// Authenticate with Gmail API
    Auth {
        /// Force re-authentication even if token exists
        #[arg(long)]
        force: bool,
    },

    /// List the configured extraction selectors
    Selectors,

    /// Generate example configuration file
    InitConfig {
        /// Path to create config file
        #[arg(short, long, default_value = "config.toml")]
        output: PathBuf,

        /// Overwrite existing file
        #[arg(long)]
        force: bool,
    },
}

/// Build the one service handle shared by every operation in this process
pub async fn connect(cli: &Cli, config: &Config) -> Result<Arc<ProductionGmailClient>> {
    if let Some(parent) = cli.token_cache.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let hub = auth::initialize_gmail_hub(&cli.credentials, &cli.token_cache).await?;
    Ok(Arc::new(ProductionGmailClient::new(
        hub,
        config.client.max_retries,
    )))
}

/// Call `connect` until it succeeds, waiting `cooldown` between attempts.
/// A missing credential source is returned at once since waiting cannot fix it.
pub async fn connect_with_retry<T, F, Fut>(mut connect: F, cooldown: Duration) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    loop {
        match connect().await {
            Ok(client) => return Ok(client),
            Err(e @ TriageError::MissingCredentials(_)) => return Err(e),
            Err(e) => {
                warn!("Could not connect to Gmail: {}. Retrying in {:?}", e, cooldown);
                tokio::time::sleep(cooldown).await;
            }
        }
    }
}

/// Run the classifier loop. Only returns when no credentials are available.
pub async fn run_classifier(cli: &Cli) -> Result<()> {
    let config = Config::load(&cli.config).await?;
    let schedule = config.classifier.schedule();
    let client = connect_with_retry(|| connect(cli, &config), schedule.cooldown).await?;

    let labeler = Labeler::new(
        client,
        config.classifier.table(),
        schedule,
        config.client.page_size,
    );
    labeler.run_forever().await;
    Ok(())
}

/// Run one extraction and return its report
pub async fn run_extraction(cli: &Cli, selector: &str, count: usize) -> Result<ExtractionReport> {
    let config = Config::load(&cli.config).await?;

    // Reject a bad selector before any browser-based sign-in is attempted
    config.extractor.selector_table().resolve(selector)?;

    let client = connect(cli, &config).await?;
    let extractor = Extractor::new(client, &config.extractor, config.client.page_size);
    extractor.run(selector, count).await
}

/// Sign in (or refresh) and return the connected account
pub async fn authenticate(cli: &Cli, force: bool) -> Result<String> {
    if force && cli.token_cache.exists() {
        tokio::fs::remove_file(&cli.token_cache).await?;
        info!("Removed existing token cache");
    }

    let config = Config::load(&cli.config).await?;
    let client = connect(cli, &config).await?;
    client.verify_session().await
}

/// Human-readable listing of the selector table
pub fn describe_selectors(config: &Config) -> String {
    let mut out = String::new();
    for selector in &config.extractor.selectors {
        if selector.aliases.is_empty() {
            out.push_str(&format!("{}\n", selector.key));
        } else {
            out.push_str(&format!(
                "{} (alias: {})\n",
                selector.key,
                selector.aliases.join(", ")
            ));
        }
        for (i, query) in selector.queries.iter().enumerate() {
            out.push_str(&format!("  {}. {}\n", i + 1, query));
        }
    }
    out
}
