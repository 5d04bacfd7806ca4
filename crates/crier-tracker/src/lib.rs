//! Tracker (Conduit-style) API client.
//!
//! Thin request/response wrapper with no internal state machine: transaction
//! history by object PHID, object/author strings by PHID, and task/diff info
//! by reference number. Reference parsing returns a typed error so callers
//! branch on a `Result` instead of catching exceptions.

pub mod reference;

use crier_classify::TransactionEntry;
use reqwest::Client;
use serde_json::Value;
use thiserror::Error;

pub use reference::{parse_reference, ObjectRef, RefKind};

#[derive(Debug, Error)]
pub enum LookupError {
    /// The reference text does not name a task or diff, e.g. `Tabc`.
    #[error("'{raw}' is not a valid object reference")]
    MalformedReference { raw: String },
    #[error("tracker transport failure: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("tracker API error: {message}")]
    Api { message: String },
    #[error("tracker response missing expected field '{field}'")]
    MissingField { field: &'static str },
}

/// Resolved display data for a task or diff. Diffs carry no priority.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectInfo {
    pub priority_color: Option<String>,
    pub status_name: String,
    pub title: String,
    pub uri: String,
}

/// The strings the webhook paths read off an object PHID.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectStrings {
    pub full_name: String,
    pub name: String,
    pub uri: String,
}

impl ObjectStrings {
    /// The commit message is the full name minus the leading `"{name}: "`
    /// repository prefix.
    pub fn commit_message(&self) -> String {
        let prefix = format!("{}: ", self.name);
        self.full_name
            .strip_prefix(&prefix)
            .unwrap_or(&self.full_name)
            .to_string()
    }
}

/// An object's change history plus the author of its first transaction.
#[derive(Debug, Clone, Default)]
pub struct TransactionHistory {
    pub entries: Vec<TransactionEntry>,
    pub first_author_phid: Option<String>,
}

/// Seam for chat-triggered task/diff lookups; the production implementation
/// is [`TrackerClient`], tests substitute a scripted double.
#[async_trait::async_trait]
pub trait ObjectLookup: Send + Sync {
    async fn object_info(&self, reference: &ObjectRef) -> Result<ObjectInfo, LookupError>;
}

/// The tracker surface the webhook gateway consumes, one remote call per
/// method and no state between calls.
#[async_trait::async_trait]
pub trait TrackerApi: Send + Sync {
    async fn transaction_history(&self, object_phid: &str)
        -> Result<TransactionHistory, LookupError>;
    async fn author_display_name(&self, author_phid: &str) -> Option<String>;
    async fn object_strings(&self, object_phid: &str) -> Result<ObjectStrings, LookupError>;
}

#[derive(Debug, Clone)]
pub struct TrackerClient {
    http: Client,
    host: String,
    token: String,
}

impl TrackerClient {
    pub fn new(host: String, token: String) -> Self {
        Self {
            http: Client::new(),
            host,
            token,
        }
    }

    async fn call(&self, method: &str, params: &[(String, String)]) -> Result<Value, LookupError> {
        let url = format!("{}{}", self.host, method);
        let mut form: Vec<(String, String)> =
            vec![("api.token".to_string(), self.token.clone())];
        form.extend_from_slice(params);

        let response = self.http.post(&url).form(&form).send().await?;
        let envelope: Value = response.json().await?;
        unwrap_result(envelope)
    }

    async fn phid_query(&self, phid: &str) -> Result<Value, LookupError> {
        let result = self
            .call("phid.query", &[("phids[0]".to_string(), phid.to_string())])
            .await?;
        result
            .get(phid)
            .cloned()
            .ok_or(LookupError::MissingField { field: "phid" })
    }

    async fn task_info(&self, number: u64) -> Result<ObjectInfo, LookupError> {
        let result = self
            .call(
                "maniphest.info",
                &[("task_id".to_string(), number.to_string())],
            )
            .await?;
        parse_task_info(&result)
    }

    async fn diff_info(&self, number: u64) -> Result<ObjectInfo, LookupError> {
        let result = self
            .call(
                "differential.query",
                &[("ids[0]".to_string(), number.to_string())],
            )
            .await?;
        parse_diff_info(&result)
    }
}

#[async_trait::async_trait]
impl TrackerApi for TrackerClient {
    /// Full transaction history for an object, ordered as the tracker
    /// returns it (most recent first).
    async fn transaction_history(
        &self,
        object_phid: &str,
    ) -> Result<TransactionHistory, LookupError> {
        let result = self
            .call(
                "transaction.search",
                &[("objectIdentifier".to_string(), object_phid.to_string())],
            )
            .await?;
        parse_transaction_search(&result)
    }

    /// Display name for a user PHID. Transport and shape failures collapse to
    /// `None`: an event that cannot be attributed is suppressed, not retried.
    async fn author_display_name(&self, author_phid: &str) -> Option<String> {
        match self.phid_query(author_phid).await {
            Ok(record) => record
                .get("fullName")
                .and_then(Value::as_str)
                .map(str::to_string),
            Err(error) => {
                tracing::debug!(%author_phid, %error, "author lookup failed");
                None
            }
        }
    }

    /// `fullName`/`name`/`uri` for an object PHID.
    async fn object_strings(&self, object_phid: &str) -> Result<ObjectStrings, LookupError> {
        let record = self.phid_query(object_phid).await?;
        parse_object_strings(&record)
    }
}

#[async_trait::async_trait]
impl ObjectLookup for TrackerClient {
    async fn object_info(&self, reference: &ObjectRef) -> Result<ObjectInfo, LookupError> {
        match reference.kind {
            RefKind::Task => self.task_info(reference.number).await,
            RefKind::Diff => self.diff_info(reference.number).await,
        }
    }
}

fn unwrap_result(envelope: Value) -> Result<Value, LookupError> {
    if let Some(code) = envelope.get("error_code").filter(|code| !code.is_null()) {
        let info = envelope
            .get("error_info")
            .and_then(Value::as_str)
            .unwrap_or("unknown");
        return Err(LookupError::Api {
            message: format!("{code}: {info}"),
        });
    }
    envelope
        .get("result")
        .cloned()
        .ok_or(LookupError::MissingField { field: "result" })
}

fn parse_transaction_search(result: &Value) -> Result<TransactionHistory, LookupError> {
    let data = result
        .get("data")
        .and_then(Value::as_array)
        .ok_or(LookupError::MissingField { field: "data" })?;

    let mut history = TransactionHistory::default();
    for record in data {
        let id = record
            .get("id")
            .and_then(Value::as_u64)
            .ok_or(LookupError::MissingField { field: "id" })?;
        let date_created = record
            .get("dateCreated")
            .and_then(Value::as_i64)
            .ok_or(LookupError::MissingField { field: "dateCreated" })?;
        let date_modified = record
            .get("dateModified")
            .and_then(Value::as_i64)
            .ok_or(LookupError::MissingField { field: "dateModified" })?;
        let comments = record
            .get("comments")
            .and_then(Value::as_array)
            .map(|list| list.iter().map(Value::to_string).collect())
            .unwrap_or_default();

        if history.first_author_phid.is_none() {
            history.first_author_phid = record
                .get("authorPHID")
                .and_then(Value::as_str)
                .map(str::to_string);
        }
        history.entries.push(TransactionEntry {
            id,
            date_created,
            date_modified,
            comments,
        });
    }
    Ok(history)
}

fn parse_object_strings(record: &Value) -> Result<ObjectStrings, LookupError> {
    Ok(ObjectStrings {
        full_name: string_field(record, "fullName")?,
        name: string_field(record, "name")?,
        uri: string_field(record, "uri")?,
    })
}

fn parse_task_info(result: &Value) -> Result<ObjectInfo, LookupError> {
    Ok(ObjectInfo {
        priority_color: result
            .get("priorityColor")
            .and_then(Value::as_str)
            .map(str::to_string),
        status_name: string_field(result, "statusName")?,
        title: string_field(result, "title")?,
        uri: string_field(result, "uri")?,
    })
}

fn parse_diff_info(result: &Value) -> Result<ObjectInfo, LookupError> {
    let record = result
        .as_array()
        .and_then(|list| list.first())
        .ok_or(LookupError::MissingField { field: "result[0]" })?;
    Ok(ObjectInfo {
        // Diff revisions have no priority; the composer omits the segment.
        priority_color: None,
        status_name: string_field(record, "statusName")?,
        title: string_field(record, "title")?,
        uri: string_field(record, "uri")?,
    })
}

fn string_field(record: &Value, field: &'static str) -> Result<String, LookupError> {
    record
        .get(field)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or(LookupError::MissingField { field })
}
