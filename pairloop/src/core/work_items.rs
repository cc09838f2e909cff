//! Work-item extraction from Planner prose.

use std::sync::LazyLock;

use regex::Regex;

use crate::core::types::WorkItem;

/// At most this many items are taken from one Planner response.
pub const MAX_WORK_ITEMS: usize = 10;
/// Shorter entries are list noise ("Yes", "Done").
pub const MIN_WORK_ITEM_CHARS: usize = 10;

static LABELLED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*(?:[-*]\s+)?(?:\*\*)?work item(?:\s*#?\d+)?(?:\*\*)?\s*[:.)-]\s*(.+)$")
        .unwrap()
});
static NUMBERED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*\d+[.)]\s+(.+)$").unwrap());
static BULLET: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*[-*•]\s+(.+)$").unwrap());

/// Extract list entries and `Work Item:` segments, in order of appearance.
///
/// Entries are de-duplicated by exact text after trimming markdown emphasis.
pub fn extract_work_items(text: &str) -> Vec<WorkItem> {
    let mut items: Vec<WorkItem> = Vec::new();
    for line in text.lines() {
        let Some(entry) = match_entry(line) else {
            continue;
        };
        let entry = clean(entry);
        if entry.chars().count() < MIN_WORK_ITEM_CHARS {
            continue;
        }
        if items.iter().any(|item| item.description == entry) {
            continue;
        }
        items.push(WorkItem::new(entry));
        if items.len() == MAX_WORK_ITEMS {
            break;
        }
    }
    items
}

fn match_entry(line: &str) -> Option<&str> {
    [&*LABELLED, &*NUMBERED, &*BULLET]
        .into_iter()
        .find_map(|pattern| pattern.captures(line))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

fn clean(entry: &str) -> &str {
    entry.trim().trim_matches('*').trim_matches('`').trim()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptions(items: &[WorkItem]) -> Vec<&str> {
        items.iter().map(|item| item.description.as_str()).collect()
    }

    #[test]
    fn numbered_list_items_are_extracted() {
        let text = "1. Set up module A\n2. Wire module A into B\nWork items created and ready to implement.";
        assert_eq!(
            descriptions(&extract_work_items(text)),
            vec!["Set up module A", "Wire module A into B"]
        );
    }

    #[test]
    fn bullets_and_labels_are_extracted_in_order() {
        let text = "Plan:\n- Add the cache trait\n**Work Item 2:** Implement eviction policy\n* Write cache tests";
        assert_eq!(
            descriptions(&extract_work_items(text)),
            vec![
                "Add the cache trait",
                "Implement eviction policy",
                "Write cache tests"
            ]
        );
    }

    #[test]
    fn short_entries_are_ignored() {
        let text = "1. Yes\n2. Add input validation to the parser\n- ok";
        assert_eq!(
            descriptions(&extract_work_items(text)),
            vec!["Add input validation to the parser"]
        );
    }

    #[test]
    fn duplicates_across_list_styles_collapse() {
        let text = "1. Add retry to the client\n- Add retry to the client\nWork Item: Add retry to the client";
        assert_eq!(extract_work_items(text).len(), 1);
    }

    #[test]
    fn only_first_ten_qualifying_items_are_kept() {
        let text: String = (1..=14)
            .map(|n| format!("{n}. Implement numbered step {n}\n"))
            .collect();
        let items = extract_work_items(&text);
        assert_eq!(items.len(), MAX_WORK_ITEMS);
        assert_eq!(items[9].description, "Implement numbered step 10");
    }

    #[test]
    fn prose_without_lists_yields_nothing() {
        assert!(extract_work_items("Analysis complete. The code looks fine.").is_empty());
    }
}
