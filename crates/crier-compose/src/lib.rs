//! IRC message composition.
//!
//! Pure string assembly: webhook events become one color-coded notice line,
//! task/diff lookups become a `[priority, status] title: link` line, and
//! failed reference lookups become a visible error that keeps the raw
//! reference text so an interactive request is never silently dropped.

/// mIRC color control code; followed by a numeric color index, reset bare.
const COLOR: &str = "\x03";

const GREEN: &str = "3";
const BLUE: &str = "2";
const RED: &str = "4";
const PINK: &str = "13";
const GREY: &str = "15";

/// A composed webhook notification, consumed exactly once by a sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub subject_label: String,
    pub author: String,
    pub verb_phrase: String,
    pub link: String,
}

impl Notification {
    /// Renders the single chat line: `[subject] author verb: link`, with
    /// green brackets, pink subject, grey author and blue link.
    pub fn render(&self) -> String {
        format!(
            "{COLOR}{GREEN}[{COLOR}{COLOR}{PINK}{subject}{COLOR}{COLOR}{GREEN}]{COLOR} \
             {COLOR}{GREY}{author}{COLOR} {verb}: {COLOR}{BLUE}{link}{COLOR}",
            subject = self.subject_label,
            author = self.author,
            verb = self.verb_phrase,
            link = self.link,
        )
    }
}

/// The fixed priority table: tracker priority color -> (IRC color, label).
/// Unmapped values render no color segment and no separator.
fn priority_segment(priority_color: &str) -> Option<(&'static str, &'static str)> {
    match priority_color {
        "violet" => Some(("6", "Needs Triage")),
        "pink" => Some(("5", "Unbreak Now!")),
        "red" => Some(("4", "High")),
        "orange" => Some(("7", "Medium")),
        "yellow" => Some(("8", "Low")),
        "sky" => Some(("7", "Wishlist")),
        _ => None,
    }
}

/// Renders the lookup reply line for a task or diff.
///
/// Diff revisions carry no priority; they must omit the priority segment and
/// its trailing separator entirely rather than emit empty markers.
pub fn render_object_info(
    priority_color: Option<&str>,
    status_name: &str,
    title: &str,
    uri: &str,
    anchor: Option<&str>,
) -> String {
    let mut line = format!("{COLOR}{GREEN}[{COLOR}");

    if let Some((irc_color, label)) = priority_color.and_then(priority_segment) {
        line.push_str(COLOR);
        line.push_str(irc_color);
        line.push_str(label);
        line.push_str(", ");
    }

    line.push_str(status_name);
    line.push_str(&format!("{COLOR}{COLOR}{GREEN}]{COLOR} "));
    line.push_str(title.trim());
    line.push_str(": ");
    line.push_str(&format!("{COLOR}{BLUE}{uri}"));
    if let Some(anchor) = anchor {
        line.push('#');
        line.push_str(anchor);
    }
    line.push_str(COLOR);
    line
}

/// Renders the visible error for a reference that failed to resolve. The raw
/// token, anchor included, is echoed back verbatim so the requester can see
/// what was rejected.
pub fn render_reference_error(raw_reference: &str) -> String {
    format!(
        "{COLOR}{RED}Error: {} is an invalid task reference.{COLOR}",
        raw_reference.trim()
    )
}
