//! Release/feature-branch MR description rendering and splicing (§4.7).

use review_core::entities::{MergeRequest, User};

/// §4.7: "Description contains a marker `---\n## Included MRs\n` followed
/// by a rendered list."
pub const MARKER: &str = "---\n## Included MRs\n";

/// Renders one included MR as `- [!IID Title](URL) by @author`.
#[must_use]
pub fn render_entry(mr: &MergeRequest, author: &User) -> String {
    format!("- [!{} {}]({}) by @{}", mr.iid, mr.title, mr.url, author.username)
}

/// Splices `block` below [`MARKER`] in `description`, replacing whatever
/// previously followed the marker. If the marker is absent, it is appended.
#[must_use]
pub fn splice(description: &str, block: &str) -> String {
    match description.find(MARKER) {
        Some(at) => {
            let head = &description[..at + MARKER.len()];
            format!("{head}{block}")
        }
        None => {
            let mut out = description.to_string();
            if !out.is_empty() && !out.ends_with('\n') {
                out.push('\n');
            }
            out.push_str(MARKER);
            out.push_str(block);
            out
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splice_replaces_existing_block() {
        let description = format!("Intro text\n\n{MARKER}- old entry");
        let out = splice(&description, "- [!101 A](url) by @alice");
        assert_eq!(out, format!("Intro text\n\n{MARKER}- [!101 A](url) by @alice"));
    }

    #[test]
    fn splice_appends_marker_when_absent() {
        let out = splice("Intro text", "- [!101 A](url) by @alice");
        assert_eq!(out, format!("Intro text\n{MARKER}- [!101 A](url) by @alice"));
    }
}
