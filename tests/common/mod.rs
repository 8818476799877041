//! Common test utilities and fixtures
//!
//! `FakeMailbox` is an in-memory `GmailClient`. It understands the handful of
//! search operators the vendor tables use: quoted phrases, bare words,
//! `label:`, `is:unread`/`is:read`, `in:inbox`/`in:spam`/`in:all` and a
//! leading `-` to negate any of them.

#![allow(dead_code)]

use async_trait::async_trait;
use esim_mail_triage::client::GmailClient;
use esim_mail_triage::error::{Result, TriageError};
use esim_mail_triage::models::{LabelInfo, MessagePage, INBOX_LABEL, UNREAD_LABEL};
use esim_mail_triage::Selector;
use std::collections::{BTreeSet, HashSet};
use std::sync::Mutex;

#[derive(Debug, Clone)]
pub struct FakeMessage {
    pub id: String,
    pub text: String,
    pub label_ids: BTreeSet<String>,
}

impl FakeMessage {
    pub fn raw(&self) -> Vec<u8> {
        format!("Message-ID: <{}@test>\r\nSubject: {}\r\n\r\n{}\r\n", self.id, self.text, self.text)
            .into_bytes()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModifyCall {
    pub id: String,
    pub add: Vec<String>,
    pub remove: Vec<String>,
}

#[derive(Default)]
struct State {
    messages: Vec<FakeMessage>,
    labels: Vec<LabelInfo>,
    next_label: usize,
    searches: Vec<String>,
    fetches: Vec<String>,
    modifies: Vec<ModifyCall>,
    created: Vec<String>,
    fail_fetch: HashSet<String>,
    fail_modify: HashSet<String>,
    fail_query_fragments: Vec<String>,
    auth_failures_left: usize,
}

pub struct FakeMailbox {
    state: Mutex<State>,
    page_len: usize,
}

impl Default for FakeMailbox {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeMailbox {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            page_len: 100,
        }
    }

    /// Serve search results at most `page_len` ids per page
    pub fn with_page_len(mut self, page_len: usize) -> Self {
        self.page_len = page_len.max(1);
        self
    }

    /// Add an unread inbox message
    pub fn add_message(&self, id: &str, text: &str) {
        self.add_message_with_labels(id, text, &[INBOX_LABEL, UNREAD_LABEL]);
    }

    /// Add a message carrying exactly `label_ids`
    pub fn add_message_with_labels(&self, id: &str, text: &str, label_ids: &[&str]) {
        let mut state = self.state.lock().unwrap();
        state.messages.push(FakeMessage {
            id: id.to_string(),
            text: text.to_string(),
            label_ids: label_ids.iter().map(|l| l.to_string()).collect(),
        });
    }

    /// Provision a user label up front, returning its id
    pub fn add_label(&self, name: &str) -> String {
        let mut state = self.state.lock().unwrap();
        Self::insert_label(&mut state, name)
    }

    fn insert_label(state: &mut State, name: &str) -> String {
        state.next_label += 1;
        let id = format!("Label_{}", state.next_label);
        state.labels.push(LabelInfo {
            id: id.clone(),
            name: name.to_string(),
        });
        id
    }

    pub fn label_id(&self, name: &str) -> Option<String> {
        let state = self.state.lock().unwrap();
        state
            .labels
            .iter()
            .find(|l| l.name == name)
            .map(|l| l.id.clone())
    }

    pub fn message(&self, id: &str) -> FakeMessage {
        let state = self.state.lock().unwrap();
        state
            .messages
            .iter()
            .find(|m| m.id == id)
            .cloned()
            .unwrap_or_else(|| panic!("no message {}", id))
    }

    /// Whether message `id` carries the label called `name`
    pub fn has_label(&self, id: &str, name: &str) -> bool {
        match self.label_id(name) {
            Some(label_id) => self.message(id).label_ids.contains(&label_id),
            None => false,
        }
    }

    pub fn is_unread(&self, id: &str) -> bool {
        self.message(id).label_ids.contains(UNREAD_LABEL)
    }

    pub fn in_inbox(&self, id: &str) -> bool {
        self.message(id).label_ids.contains(INBOX_LABEL)
    }

    /// Ids of messages labeled `name`, in mailbox order
    pub fn messages_labeled(&self, name: &str) -> Vec<String> {
        let Some(label_id) = self.label_id(name) else {
            return Vec::new();
        };
        let state = self.state.lock().unwrap();
        state
            .messages
            .iter()
            .filter(|m| m.label_ids.contains(&label_id))
            .map(|m| m.id.clone())
            .collect()
    }

    pub fn labels(&self) -> Vec<LabelInfo> {
        self.state.lock().unwrap().labels.clone()
    }

    pub fn searches(&self) -> Vec<String> {
        self.state.lock().unwrap().searches.clone()
    }

    pub fn fetches(&self) -> Vec<String> {
        self.state.lock().unwrap().fetches.clone()
    }

    pub fn modifies(&self) -> Vec<ModifyCall> {
        self.state.lock().unwrap().modifies.clone()
    }

    /// Names of labels created through the client
    pub fn created_labels(&self) -> Vec<String> {
        self.state.lock().unwrap().created.clone()
    }

    pub fn fail_fetch(&self, id: &str) {
        self.state.lock().unwrap().fail_fetch.insert(id.to_string());
    }

    pub fn fail_modify(&self, id: &str) {
        self.state.lock().unwrap().fail_modify.insert(id.to_string());
    }

    /// Make every search whose query contains `fragment` fail
    pub fn fail_queries_containing(&self, fragment: &str) {
        self.state
            .lock()
            .unwrap()
            .fail_query_fragments
            .push(fragment.to_string());
    }

    /// Make the next `times` session checks fail
    pub fn fail_auth(&self, times: usize) {
        self.state.lock().unwrap().auth_failures_left = times;
    }

    fn matching_ids(state: &State, query: &str) -> Vec<String> {
        let terms = tokenize(query);
        state
            .messages
            .iter()
            .filter(|m| terms.iter().all(|t| term_matches(state, m, t)))
            .map(|m| m.id.clone())
            .collect()
    }
}

/// Split a query on whitespace, keeping quoted phrases together
fn tokenize(query: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;

    for c in query.chars() {
        match c {
            '"' => {
                in_quotes = !in_quotes;
                current.push(c);
            }
            c if c.is_whitespace() && !in_quotes => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
            }
            _ => current.push(c),
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

fn term_matches(state: &State, message: &FakeMessage, term: &str) -> bool {
    let (negated, term) = match term.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, term),
    };

    let hit = if let Some(name) = term.strip_prefix("label:") {
        let name = name.trim_matches('"');
        state
            .labels
            .iter()
            .find(|l| l.name == name)
            .map(|l| message.label_ids.contains(&l.id))
            .unwrap_or(false)
    } else {
        match term {
            "is:unread" => message.label_ids.contains(UNREAD_LABEL),
            "is:read" => !message.label_ids.contains(UNREAD_LABEL),
            "in:inbox" => message.label_ids.contains(INBOX_LABEL),
            "in:spam" => message.label_ids.contains("SPAM"),
            "in:all" => true,
            text => {
                let needle = text.trim_matches('"').to_lowercase();
                message.text.to_lowercase().contains(&needle)
            }
        }
    };

    hit != negated
}

#[async_trait]
impl GmailClient for FakeMailbox {
    async fn verify_session(&self) -> Result<String> {
        let mut state = self.state.lock().unwrap();
        if state.auth_failures_left > 0 {
            state.auth_failures_left -= 1;
            return Err(TriageError::AuthError("token expired".to_string()));
        }
        Ok("me@example.com".to_string())
    }

    async fn list_message_page(
        &self,
        query: &str,
        page_token: Option<String>,
        max_results: u32,
    ) -> Result<MessagePage> {
        let mut state = self.state.lock().unwrap();
        state.searches.push(query.to_string());

        if state
            .fail_query_fragments
            .iter()
            .any(|fragment| query.contains(fragment.as_str()))
        {
            return Err(TriageError::BadRequest(format!("Invalid query: {}", query)));
        }

        let ids = Self::matching_ids(&state, query);
        let start: usize = match page_token {
            Some(token) => token
                .parse()
                .map_err(|_| TriageError::BadRequest(format!("bad page token {}", token)))?,
            None => 0,
        };
        let end = (start + self.page_len.min(max_results as usize)).min(ids.len());

        Ok(MessagePage {
            ids: ids[start.min(end)..end].to_vec(),
            next_page_token: (end < ids.len()).then(|| end.to_string()),
        })
    }

    async fn get_raw_message(&self, id: &str) -> Result<Vec<u8>> {
        let mut state = self.state.lock().unwrap();
        state.fetches.push(id.to_string());

        if state.fail_fetch.contains(id) {
            return Err(TriageError::ServerError {
                status: 500,
                message: format!("backend error fetching {}", id),
            });
        }
        state
            .messages
            .iter()
            .find(|m| m.id == id)
            .map(FakeMessage::raw)
            .ok_or_else(|| TriageError::MessageNotFound(id.to_string()))
    }

    async fn modify_message(
        &self,
        message_id: &str,
        add_label_ids: &[String],
        remove_label_ids: &[String],
    ) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.modifies.push(ModifyCall {
            id: message_id.to_string(),
            add: add_label_ids.to_vec(),
            remove: remove_label_ids.to_vec(),
        });

        if state.fail_modify.contains(message_id) {
            return Err(TriageError::NetworkError("connection reset".to_string()));
        }

        let message = state
            .messages
            .iter_mut()
            .find(|m| m.id == message_id)
            .ok_or_else(|| TriageError::MessageNotFound(message_id.to_string()))?;
        for label in add_label_ids {
            message.label_ids.insert(label.clone());
        }
        for label in remove_label_ids {
            message.label_ids.remove(label);
        }
        Ok(())
    }

    async fn list_labels(&self) -> Result<Vec<LabelInfo>> {
        Ok(self.state.lock().unwrap().labels.clone())
    }

    async fn create_label(&self, name: &str) -> Result<String> {
        let mut state = self.state.lock().unwrap();
        if state.labels.iter().any(|l| l.name == name) {
            return Err(TriageError::ApiError(format!(
                "Label name exists or conflicts: {}",
                name
            )));
        }
        state.created.push(name.to_string());
        Ok(Self::insert_label(&mut state, name))
    }
}

/// A single-selector table for extractor tests
pub fn selector(key: &str, queries: &[&str]) -> Selector {
    Selector {
        key: key.to_string(),
        aliases: Vec::new(),
        queries: queries.iter().map(|q| q.to_string()).collect(),
    }
}
