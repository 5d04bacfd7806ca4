//! Webhook payload parsing.
//!
//! Parsing happens strictly after signature validation; the validator works
//! on the raw bytes, this module on the structured view.

use anyhow::{Context, Result};
use crier_classify::{ObjectType, ParsedEvent};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct Envelope {
    object: PayloadObject,
    action: PayloadAction,
}

#[derive(Debug, Deserialize)]
struct PayloadObject {
    phid: String,
    #[serde(rename = "type")]
    kind: String,
}

#[derive(Debug, Deserialize)]
struct PayloadAction {
    epoch: i64,
}

/// Parses a validated payload into a [`ParsedEvent`]. An unknown object
/// type is `Ok(None)`: the tracker reports kinds we do not relay, and those
/// are suppressed rather than treated as malformed.
pub fn parse_event(raw_body: &[u8]) -> Result<Option<ParsedEvent>> {
    let envelope: Envelope =
        serde_json::from_slice(raw_body).context("malformed webhook payload")?;
    let Some(object_type) = ObjectType::from_wire(&envelope.object.kind) else {
        tracing::debug!(kind = %envelope.object.kind, "unhandled object type");
        return Ok(None);
    };
    Ok(Some(ParsedEvent {
        object_phid: envelope.object.phid,
        object_type,
        action_epoch: envelope.action.epoch,
    }))
}
