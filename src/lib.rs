//! eSIM mail triage
//!
//! Keeps a Gmail inbox of eSIM vendor notifications sorted and drains it in
//! batches for downstream processing.
//!
//! # Overview
//!
//! - **Classifier**: a loop that applies one vendor label per message using a
//!   priority-ordered table of Gmail search queries
//! - **Extractor**: a one-shot run that saves up to N messages for a vendor as
//!   `.eml` files, marks them extracted and starts a hand-off program
//! - **Service access**: OAuth2 sign-in, the [`GmailClient`] seam, pagination
//!   and label get-or-create
//!
//! # Example Usage
//!
//! ```no_run
//! use esim_mail_triage::{auth, client::ProductionGmailClient, config::Config, Extractor};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.toml".as_ref()).await?;
//!
//!     let hub = auth::initialize_gmail_hub(
//!         "credentials.json".as_ref(),
//!         ".esim-triage/token.json".as_ref(),
//!     )
//!     .await?;
//!     let client = ProductionGmailClient::new(hub, config.client.max_retries);
//!
//!     let extractor = Extractor::new(client, &config.extractor, config.client.page_size);
//!     let report = extractor.run("airalo", 5).await?;
//!     println!("{} email(s) extracted", report.written.len());
//!
//!     Ok(())
//! }
//! ```
//!
//! # Module Organization
//!
//! - [`auth`] - OAuth2 authentication and Gmail API initialization
//! - [`client`] - Gmail API client trait and retrying production client
//! - [`cli`] - Command-line interface and command runners
//! - [`config`] - Configuration and the default vendor tables
//! - [`error`] - Error types and result aliases
//! - [`extractor`] - One-shot extraction to the staging directory
//! - [`label_manager`] - Label lookup and lazy creation
//! - [`labeler`] - Continuous classification loop
//! - [`models`] - Core data structures and query helpers
//! - [`search`] - Paginated search

pub mod auth;
pub mod cli;
pub mod client;
pub mod config;
pub mod error;
pub mod extractor;
pub mod label_manager;
pub mod labeler;
pub mod models;
pub mod search;

pub use error::{Result, TriageError};

pub use models::{
    ClassificationTable, ExtractionBatch, LabelInfo, LabelRules, MessagePage, Selector,
    SelectorTable,
};

pub use config::{Config, Schedule};

pub use client::{GmailClient, ProductionGmailClient};

pub use label_manager::LabelManager;

pub use labeler::{CycleOutcome, CycleReport, LabelReport, Labeler, RuleReport};

pub use extractor::{ExtractionReport, Extractor, FailedMessage};

pub use cli::{Cli, Commands};
