//! Label lookup and lazy creation
use crate::client::GmailClient;
use crate::error::{Result, TriageError};
use crate::models::LabelInfo;
use std::collections::HashMap;
use tracing::{debug, info};

/// Resolves label names to Gmail label ids, creating missing labels on demand
///
/// Names are matched exactly: `.a-Nomad-unread` and `.a-nomad-unread` are two
/// different labels as far as [`LabelManager::get_or_create_label`] is concerned.
pub struct LabelManager<'a, C: GmailClient + ?Sized> {
    client: &'a C,
    label_cache: HashMap<String, String>, // name -> id mapping
    loaded: bool,
    created_labels: Vec<String>,
}

impl<'a, C: GmailClient + ?Sized> LabelManager<'a, C> {
    pub fn new(client: &'a C) -> Self {
        Self {
            client,
            label_cache: HashMap::new(),
            loaded: false,
            created_labels: Vec::new(),
        }
    }

    /// Loads all existing labels from Gmail into the cache
    pub async fn load_existing_labels(&mut self) -> Result<usize> {
        let labels = self.client.list_labels().await?;
        let count = labels.len();

        for LabelInfo { id, name } in labels {
            self.label_cache.insert(name, id);
        }
        self.loaded = true;

        debug!("Loaded {} existing labels into cache", count);
        Ok(count)
    }

    async fn ensure_loaded(&mut self) -> Result<()> {
        if !self.loaded {
            self.load_existing_labels().await?;
        }
        Ok(())
    }

    /// Gets label ID by exact name, creating the label if necessary
    pub async fn get_or_create_label(&mut self, name: &str) -> Result<String> {
        if name.trim().is_empty() {
            return Err(TriageError::LabelError("Label name cannot be empty".to_string()));
        }

        self.ensure_loaded().await?;

        if let Some(id) = self.label_cache.get(name) {
            debug!("Label '{}' already exists with ID: {}", name, id);
            return Ok(id.clone());
        }

        info!("Creating label: {}", name);
        let label_id = self.client.create_label(name).await.map_err(|e| {
            TriageError::LabelError(format!("Failed to create label '{}': {}", name, e))
        })?;

        self.label_cache.insert(name.to_string(), label_id.clone());
        self.created_labels.push(label_id.clone());

        info!("Successfully created label '{}' with ID: {}", name, label_id);
        Ok(label_id)
    }

    /// Looks a label up without creating it.
    ///
    /// An exact match wins; otherwise the first case-insensitive match is used.
    pub async fn find_label_id(&mut self, name: &str) -> Result<Option<String>> {
        self.ensure_loaded().await?;

        if let Some(id) = self.label_cache.get(name) {
            return Ok(Some(id.clone()));
        }

        let lowered = name.to_lowercase();
        let mut candidates: Vec<(&String, &String)> = self
            .label_cache
            .iter()
            .filter(|(existing, _)| existing.to_lowercase() == lowered)
            .collect();
        // HashMap order is arbitrary; pick deterministically
        candidates.sort();

        Ok(candidates.first().map(|(_, id)| (*id).clone()))
    }

    /// Ids of labels created through this manager
    pub fn created_labels(&self) -> &[String] {
        &self.created_labels
    }
}
