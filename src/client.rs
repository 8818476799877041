//! Gmail API client with retry logic

use async_trait::async_trait;
use google_gmail1::{
    api::{Label, ModifyMessageRequest},
    hyper_rustls, hyper_util, Gmail,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{Result, TriageError};
use crate::models::{LabelInfo, MessagePage};

/// Scope attached to every call; matches the scope requested at sign-in
const MODIFY_SCOPE: &str = "https://www.googleapis.com/auth/gmail.modify";

/// Hub type produced by [`crate::auth::initialize_gmail_hub`]
pub type GmailHub =
    Gmail<hyper_rustls::HttpsConnector<hyper_util::client::legacy::connect::HttpConnector>>;

/// The mail-service operations the labeler and extractor rely on.
///
/// Every call is a blocking round-trip from the caller's point of view;
/// callers await them one at a time.
#[async_trait]
pub trait GmailClient: Send + Sync {
    /// Confirm the session is usable; returns the account address
    async fn verify_session(&self) -> Result<String>;

    /// Fetch one page of message ids matching `query`
    async fn list_message_page(
        &self,
        query: &str,
        page_token: Option<String>,
        max_results: u32,
    ) -> Result<MessagePage>;

    /// Fetch a message in raw format, decoded to RFC 822 bytes
    async fn get_raw_message(&self, id: &str) -> Result<Vec<u8>>;

    /// Add and remove labels on one message in a single call
    async fn modify_message(
        &self,
        message_id: &str,
        add_label_ids: &[String],
        remove_label_ids: &[String],
    ) -> Result<()>;

    /// List all labels in the account
    async fn list_labels(&self) -> Result<Vec<LabelInfo>>;

    /// Create a new label, returning its id
    async fn create_label(&self, name: &str) -> Result<String>;
}

/// Production Gmail client backed by the google-gmail1 hub
///
/// Transient failures (429, 5xx, dropped connections) are retried with
/// exponential backoff; everything else is returned to the caller.
pub struct ProductionGmailClient {
    hub: GmailHub,
    max_retries: u32,
}

impl ProductionGmailClient {
    /// Create a new production Gmail client
    ///
    /// # Arguments
    /// * `hub` - Gmail API hub instance
    /// * `max_retries` - Retries after the first attempt for transient errors
    pub fn new(hub: GmailHub, max_retries: u32) -> Self {
        Self { hub, max_retries }
    }

    /// Check if an error is retryable
    fn should_retry(error: &TriageError) -> bool {
        error.is_transient()
    }

    /// Execute an async operation with exponential backoff retry
    async fn with_retry<T, F, Fut>(
        operation_name: &str,
        max_retries: u32,
        mut operation: F,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let mut delay = Duration::from_secs(1);
        let mut attempts = 0;

        loop {
            attempts += 1;
            match operation().await {
                Ok(result) => return Ok(result),
                Err(e) if Self::should_retry(&e) && attempts <= max_retries => {
                    let wait = match &e {
                        TriageError::RateLimitExceeded { retry_after } => {
                            delay.max(Duration::from_secs(*retry_after))
                        }
                        _ => delay,
                    };
                    warn!(
                        "{} failed (attempt {}/{}): {}. Retrying in {:?}...",
                        operation_name,
                        attempts,
                        max_retries + 1,
                        e,
                        wait
                    );
                    tokio::time::sleep(wait).await;
                    delay = std::cmp::min(delay * 2, Duration::from_secs(30));
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[async_trait]
impl GmailClient for ProductionGmailClient {
    async fn verify_session(&self) -> Result<String> {
        let (_, profile) = self
            .hub
            .users()
            .get_profile("me")
            .add_scope(MODIFY_SCOPE)
            .doit()
            .await
            .map_err(|e| TriageError::AuthError(format!("Session check failed: {}", e)))?;

        Ok(profile.email_address.unwrap_or_default())
    }

    async fn list_message_page(
        &self,
        query: &str,
        page_token: Option<String>,
        max_results: u32,
    ) -> Result<MessagePage> {
        Self::with_retry("list_messages", self.max_retries, || async {
            let mut call = self
                .hub
                .users()
                .messages_list("me")
                .q(query)
                .max_results(max_results);

            if let Some(token) = page_token.as_deref() {
                call = call.page_token(token);
            }

            let (_, response) = call.add_scope(MODIFY_SCOPE).doit().await?;

            let ids = response
                .messages
                .unwrap_or_default()
                .into_iter()
                .filter_map(|msg_ref| msg_ref.id)
                .collect::<Vec<_>>();

            debug!("Query '{}' page returned {} ids", query, ids.len());
            Ok(MessagePage {
                ids,
                next_page_token: response.next_page_token,
            })
        })
        .await
    }

    async fn get_raw_message(&self, id: &str) -> Result<Vec<u8>> {
        Self::with_retry("get_message", self.max_retries, || async {
            let (_, message) = self
                .hub
                .users()
                .messages_get("me", id)
                .format("raw")
                .add_scope(MODIFY_SCOPE)
                .doit()
                .await?;

            // The hub decodes the base64url `raw` field while deserializing
            message.raw.ok_or_else(|| {
                TriageError::InvalidMessageFormat(format!("Message {} has no raw payload", id))
            })
        })
        .await
    }

    async fn modify_message(
        &self,
        message_id: &str,
        add_label_ids: &[String],
        remove_label_ids: &[String],
    ) -> Result<()> {
        Self::with_retry("modify_message", self.max_retries, || async {
            let request = ModifyMessageRequest {
                add_label_ids: (!add_label_ids.is_empty()).then(|| add_label_ids.to_vec()),
                remove_label_ids: (!remove_label_ids.is_empty()).then(|| remove_label_ids.to_vec()),
            };

            self.hub
                .users()
                .messages_modify(request, "me", message_id)
                .add_scope(MODIFY_SCOPE)
                .doit()
                .await?;

            Ok(())
        })
        .await
    }

    async fn list_labels(&self) -> Result<Vec<LabelInfo>> {
        Self::with_retry("list_labels", self.max_retries, || async {
            // Wrap API call in timeout to prevent indefinite hangs
            let timeout_duration = Duration::from_secs(30);
            let api_call = self.hub.users().labels_list("me").add_scope(MODIFY_SCOPE).doit();

            let (_, response) = match tokio::time::timeout(timeout_duration, api_call).await {
                Ok(result) => result?,
                Err(_) => {
                    warn!("Gmail API list_labels call timed out after {:?}", timeout_duration);
                    return Err(TriageError::NetworkError(format!(
                        "API call timed out after {:?}",
                        timeout_duration
                    )));
                }
            };

            let labels: Vec<LabelInfo> = response
                .labels
                .unwrap_or_default()
                .into_iter()
                .filter_map(|label| match (label.id, label.name) {
                    (Some(id), Some(name)) => Some(LabelInfo { id, name }),
                    _ => None,
                })
                .collect();

            debug!("Successfully parsed {} labels", labels.len());
            Ok(labels)
        })
        .await
    }

    async fn create_label(&self, name: &str) -> Result<String> {
        Self::with_retry("create_label", self.max_retries, || async {
            let label = Label {
                name: Some(name.to_string()),
                message_list_visibility: Some("show".to_string()),
                label_list_visibility: Some("labelShow".to_string()),
                ..Default::default()
            };

            let (_, created_label) = self
                .hub
                .users()
                .labels_create(label, "me")
                .add_scope(MODIFY_SCOPE)
                .doit()
                .await?;

            created_label
                .id
                .ok_or_else(|| TriageError::LabelError("Created label has no ID".to_string()))
        })
        .await
    }
}

// Implement GmailClient for Arc<T> to allow shared ownership of one session
#[async_trait]
impl<T: GmailClient + ?Sized> GmailClient for Arc<T> {
    async fn verify_session(&self) -> Result<String> {
        self.as_ref().verify_session().await
    }

    async fn list_message_page(
        &self,
        query: &str,
        page_token: Option<String>,
        max_results: u32,
    ) -> Result<MessagePage> {
        self.as_ref().list_message_page(query, page_token, max_results).await
    }

    async fn get_raw_message(&self, id: &str) -> Result<Vec<u8>> {
        self.as_ref().get_raw_message(id).await
    }

    async fn modify_message(
        &self,
        message_id: &str,
        add_label_ids: &[String],
        remove_label_ids: &[String],
    ) -> Result<()> {
        self.as_ref()
            .modify_message(message_id, add_label_ids, remove_label_ids)
            .await
    }

    async fn list_labels(&self) -> Result<Vec<LabelInfo>> {
        self.as_ref().list_labels().await
    }

    async fn create_label(&self, name: &str) -> Result<String> {
        self.as_ref().create_label(name).await
    }
}

#[cfg(test)]
pub(crate) mod mock {
    use super::*;

    mockall::mock! {
        pub TestGmailClient {}

        #[async_trait]
        impl GmailClient for TestGmailClient {
            async fn verify_session(&self) -> Result<String>;
            async fn list_message_page(&self, query: &str, page_token: Option<String>, max_results: u32) -> Result<MessagePage>;
            async fn get_raw_message(&self, id: &str) -> Result<Vec<u8>>;
            async fn modify_message(&self, message_id: &str, add_label_ids: &[String], remove_label_ids: &[String]) -> Result<()>;
            async fn list_labels(&self) -> Result<Vec<LabelInfo>>;
            async fn create_label(&self, name: &str) -> Result<String>;
        }
    }
}
