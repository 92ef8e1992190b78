// src/templates.rs

use serde::Serialize;

/// Marker inside a reply that gets swapped for a region code.
pub const PLACEHOLDER: &str = "XXXXX";

/// A billing-response rule the clerk picks for an invoice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Template {
    pub option: &'static str,
    pub needs_store: bool,
    pub attach_file: bool,
    pub reply: &'static str,
}

pub static TEMPLATES: [Template; 10] = [
    Template {
        option: "One store",
        needs_store: true,
        attach_file: false,
        reply: "This bills to: GL code 170.3010.XXXXX.000.6340.623020.000.0000",
    },
    Template {
        option: "All stores",
        needs_store: false,
        attach_file: true,
        reply: "Please allocate evenly across all stores. List of stores with Region Codes attached.",
    },
    Template {
        option: "Group of Stores",
        needs_store: true,
        attach_file: true,
        reply: "Please allocate evenly across the list of stores with Region Codes attached.",
    },
    Template {
        option: "Lab Store",
        needs_store: false,
        attach_file: false,
        reply: "This invoice is for the Lab Store. Please bill to: GL code 170.3010.10125.000.6340.623020.000.0000",
    },
    Template {
        option: "Retail Activations - Dallas",
        needs_store: false,
        attach_file: false,
        reply: "This bills to: GL code: 170.3010.15910.6340.632020",
    },
    Template {
        option: "Retail Activations - Trailer",
        needs_store: false,
        attach_file: true,
        reply: "This bills to: GL code: 170.3010.15916.6340.632020",
    },
    Template {
        option: "Retail Activations - General",
        needs_store: false,
        attach_file: false,
        reply: "This bills to: GL code:",
    },
    Template {
        option: "Scrubs",
        needs_store: true,
        attach_file: false,
        reply: "This bills to: GL code: 180.3015.15917.000.6340.623020",
    },
    Template {
        option: "Interior Building (Crow\u{2019}s Nest)",
        needs_store: false,
        attach_file: false,
        reply: "This bills to: GL code: 180.3015.10001.000.6340.623030.000.0000",
    },
    Template {
        option: "NSO",
        needs_store: false,
        attach_file: false,
        reply: "This is a NSO. This bills to: GL code: 170.3010.10125.000.6340.623050.000.0000",
    },
];

/// Look a template up by its display name.
///
/// Exact match first; falls back to a case-insensitive match so the CLI
/// accepts `"one store"` as well as `"One store"`. The curly apostrophe in
/// "Crow’s Nest" also matches a straight `'`.
pub fn find(option: &str) -> Option<&'static Template> {
    let wanted = option.trim();
    TEMPLATES.iter().find(|t| t.option == wanted).or_else(|| {
        let folded = fold(wanted);
        TEMPLATES.iter().find(|t| fold(t.option) == folded)
    })
}

fn fold(s: &str) -> String {
    s.to_lowercase().replace('\u{2019}', "'")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_option_names_unique() {
        let names: HashSet<_> = TEMPLATES.iter().map(|t| t.option).collect();
        assert_eq!(names.len(), TEMPLATES.len());
    }

    #[test]
    fn test_find_exact_and_folded() {
        assert_eq!(find("Scrubs").map(|t| t.option), Some("Scrubs"));
        assert_eq!(find("  group of stores ").map(|t| t.option), Some("Group of Stores"));
        assert!(find("Interior Building (Crow's Nest)").is_some());
        assert!(find("Nope").is_none());
    }

    #[test]
    fn test_only_one_store_has_placeholder() {
        let with: Vec<_> = TEMPLATES
            .iter()
            .filter(|t| t.reply.contains(PLACEHOLDER))
            .map(|t| t.option)
            .collect();
        assert_eq!(with, vec!["One store"]);
    }
}
