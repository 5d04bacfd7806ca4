//! Pure event-classification functions.
//!
//! Given a parsed webhook event and the object's transaction history, these
//! helpers decide what kind of change produced the event: a freshly created
//! object, a new or edited comment, or nothing worth reporting. All functions
//! here are pure; the tracker history is fetched once per request upstream.

use serde::Deserialize;

/// The kinds of tracked object a webhook can reference, as encoded in the
/// payload's `object.type` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectType {
    Task,
    DiffRevision,
    Commit,
}

impl ObjectType {
    /// Parses the tracker's wire encoding. Unknown types are not an error at
    /// this layer; the caller suppresses them.
    pub fn from_wire(raw: &str) -> Option<Self> {
        match raw {
            "TASK" => Some(Self::Task),
            "DREV" => Some(Self::DiffRevision),
            "CMIT" => Some(Self::Commit),
            _ => None,
        }
    }
}

/// The per-request facts derived from a validated webhook payload.
#[derive(Debug, Clone)]
pub struct ParsedEvent {
    pub object_phid: String,
    pub object_type: ObjectType,
    /// Unix epoch of the action that fired the webhook.
    pub action_epoch: i64,
}

/// One entry of the object's ordered change history.
#[derive(Debug, Clone, Deserialize)]
pub struct TransactionEntry {
    pub id: u64,
    #[serde(rename = "dateCreated")]
    pub date_created: i64,
    #[serde(rename = "dateModified")]
    pub date_modified: i64,
    #[serde(default)]
    pub comments: Vec<String>,
}

/// Outcome of the comment search; anchor is set iff one of the flags is.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommentState {
    pub is_new_comment: bool,
    pub is_edited_comment: bool,
    pub anchor_comment_id: Option<String>,
}

/// How wide the window around the action epoch is when attributing a comment
/// to the webhook that reported it, in seconds.
pub const COMMENT_WINDOW_SECS: i64 = 10;

/// True iff every entry was written atomically at object creation: all
/// entries share one timestamp and none was modified afterwards.
pub fn is_new_object(entries: &[TransactionEntry]) -> bool {
    let Some(first) = entries.first() else {
        return false;
    };
    if first.date_created != first.date_modified {
        return false;
    }
    let created = first.date_created;
    entries
        .iter()
        .all(|entry| entry.date_created == created && entry.date_modified == created)
}

/// Finds the first entry, in sequence order, whose modification time falls
/// within `±period` seconds of the action epoch and which carries comments.
///
/// First match wins; ties are broken by sequence order rather than timestamp
/// proximity. Webhook delivery is recency-bounded, so a wider search buys
/// nothing.
pub fn find_comment(entries: &[TransactionEntry], action_epoch: i64, period: i64) -> CommentState {
    for entry in entries {
        let within = (action_epoch - period) <= entry.date_modified
            && entry.date_modified <= (action_epoch + period);
        if within && !entry.comments.is_empty() {
            let is_new = entry.date_modified == entry.date_created;
            return CommentState {
                is_new_comment: is_new,
                is_edited_comment: !is_new,
                anchor_comment_id: Some(entry.id.to_string()),
            };
        }
    }
    CommentState::default()
}

/// The user-visible event categories. `Suppressed` means the webhook fired
/// for a change nobody needs to hear about, which is expected traffic and
/// not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    NewTask,
    TaskCommented,
    TaskCommentEdited,
    NewDiff,
    DiffCommented,
    DiffCommentEdited,
    Commit,
    Suppressed,
}

impl EventKind {
    /// The verb phrase rendered between the author and the link.
    pub fn verb_phrase(self) -> Option<&'static str> {
        match self {
            Self::NewTask => Some("just created this task"),
            Self::TaskCommented => Some("commented on the task"),
            Self::TaskCommentEdited => Some("edited a message on the task"),
            Self::NewDiff => Some("just created this diff"),
            Self::DiffCommented => Some("commented on the diff"),
            Self::DiffCommentEdited => Some("edited a message on the diff"),
            Self::Commit => Some("committed"),
            Self::Suppressed => None,
        }
    }

    /// Whether a comment anchor should be appended to the object link.
    pub fn wants_anchor(self) -> bool {
        matches!(
            self,
            Self::TaskCommented
                | Self::TaskCommentEdited
                | Self::DiffCommented
                | Self::DiffCommentEdited
        )
    }
}

/// Maps the (type, newness, comment-state) tuple to an [`EventKind`].
///
/// Commits are always reported and never comment-classified. An existing
/// task or diff with neither a new nor an edited comment has already been
/// reported once, so it is suppressed.
pub fn classify(object_type: ObjectType, is_new: bool, comment: &CommentState) -> EventKind {
    match object_type {
        ObjectType::Commit => EventKind::Commit,
        ObjectType::Task if is_new => EventKind::NewTask,
        ObjectType::Task if comment.is_new_comment => EventKind::TaskCommented,
        ObjectType::Task if comment.is_edited_comment => EventKind::TaskCommentEdited,
        ObjectType::Task => EventKind::Suppressed,
        ObjectType::DiffRevision if is_new => EventKind::NewDiff,
        ObjectType::DiffRevision if comment.is_new_comment => EventKind::DiffCommented,
        ObjectType::DiffRevision if comment.is_edited_comment => EventKind::DiffCommentEdited,
        ObjectType::DiffRevision => EventKind::Suppressed,
    }
}
