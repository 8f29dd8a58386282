//! Issue-tracker task id extraction (§4.4 step 2): "extract issue-tracker
//! task id from source-branch, then title, by applying a regex built from
//! the repo's IssuePrefix set".

use std::collections::HashSet;

use regex::RegexBuilder;

/// Returns the first `<PREFIX>-<digits>` match found in `source_branch`,
/// falling back to `title` if none is found there.
#[must_use]
pub fn extract_task_id(issue_prefixes: &HashSet<String>, source_branch: &str, title: &str) -> Option<String> {
    if issue_prefixes.is_empty() {
        return None;
    }
    first_match(issue_prefixes, source_branch).or_else(|| first_match(issue_prefixes, title))
}

fn first_match(issue_prefixes: &HashSet<String>, haystack: &str) -> Option<String> {
    let mut prefixes: Vec<&String> = issue_prefixes.iter().collect();
    prefixes.sort();
    for prefix in prefixes {
        let pattern = format!(r"\b{}-\d+\b", regex::escape(prefix));
        let Ok(re) = RegexBuilder::new(&pattern).case_insensitive(true).build() else { continue };
        if let Some(m) = re.find(haystack) {
            return Some(m.as_str().to_uppercase());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_task_id_in_branch_before_title() {
        let prefixes = HashSet::from(["PROJ".to_string()]);
        let id = extract_task_id(&prefixes, "feature/proj-123-add-thing", "Unrelated title");
        assert_eq!(id.as_deref(), Some("PROJ-123"));
    }

    #[test]
    fn falls_back_to_title() {
        let prefixes = HashSet::from(["PROJ".to_string()]);
        let id = extract_task_id(&prefixes, "feature/no-id-here", "Fixes PROJ-42 crash");
        assert_eq!(id.as_deref(), Some("PROJ-42"));
    }

    #[test]
    fn no_match_returns_none() {
        let prefixes = HashSet::from(["PROJ".to_string()]);
        assert_eq!(extract_task_id(&prefixes, "feature/x", "no ticket"), None);
    }
}
