//! Task/diff reference parsing for chat-triggered lookups.

use crate::LookupError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefKind {
    Task,
    Diff,
}

/// A parsed `T154#3228` / `D17` style reference. `raw` keeps the original
/// token, anchor included, so error paths can echo it back untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectRef {
    pub kind: RefKind,
    pub number: u64,
    pub anchor: Option<String>,
    pub raw: String,
}

/// Parses a reference token. The anchor (`#N`, a comment deep link) is split
/// off before the number is validated so `T154#3228` resolves to task 154.
pub fn parse_reference(token: &str) -> Result<ObjectRef, LookupError> {
    let raw = token.trim().to_string();
    let malformed = || LookupError::MalformedReference { raw: raw.clone() };

    let (body, anchor) = match raw.split_once('#') {
        Some((body, anchor)) if !anchor.is_empty() => (body, Some(anchor.to_string())),
        Some((body, _)) => (body, None),
        None => (raw.as_str(), None),
    };

    let (kind, digits) = if let Some(digits) = body.strip_prefix('T') {
        (RefKind::Task, digits)
    } else if let Some(digits) = body.strip_prefix('D') {
        (RefKind::Diff, digits)
    } else {
        return Err(malformed());
    };

    let number: u64 = digits.parse().map_err(|_| malformed())?;
    Ok(ObjectRef {
        kind,
        number,
        anchor,
        raw,
    })
}
