// src/composer.rs

use crate::store_directory::{DirectoryError, StoreDirectory, StoreTable};
use crate::templates::{PLACEHOLDER, Template};
use serde::Serialize;
use tracing::{info, warn};

pub const MULTIPLE_STORES: &str = "multiple stores";
pub const NO_STORE_GIVEN: &str = "No store number provided.";

/// Store numbers typed by the clerk, split on commas and whitespace.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreQuery {
    tokens: Vec<String>,
}

impl StoreQuery {
    pub fn parse(input: &str) -> Self {
        let tokens = input
            .split(|c: char| c == ',' || c.is_whitespace())
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .collect();
        Self { tokens }
    }

    pub fn tokens(&self) -> &[String] {
        &self.tokens
    }
}

/// How the reply body was arrived at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// Template text used as-is or with its placeholder filled.
    Resolved,
    NoMatch,
    MissingColumn,
    NoStoreGiven,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedReply {
    pub body_text: String,
    pub attachment: Option<StoreTable>,
    pub outcome: Outcome,
}

impl ResolvedReply {
    fn diagnostic(body_text: String, outcome: Outcome) -> Self {
        Self {
            body_text,
            attachment: None,
            outcome,
        }
    }
}

/// Resolve the reply text (and optional store table) for one invoice.
///
/// Never fails: lookup problems become the body text so the clerk sees them
/// in the draft instead of losing the interaction.
pub fn compose(
    template: &Template,
    store_input: Option<&str>,
    directory: &StoreDirectory,
) -> ResolvedReply {
    let body_text = template.reply.to_string();

    if !template.needs_store {
        let attachment = (template.attach_file && !directory.is_empty())
            .then(|| directory.all_rows());
        return ResolvedReply {
            body_text,
            attachment,
            outcome: Outcome::Resolved,
        };
    }

    let query = StoreQuery::parse(store_input.unwrap_or_default());
    match query.tokens() {
        [] => match directory.require_store_column() {
            Ok(()) => {
                warn!(template = template.option, "No store number entered");
                ResolvedReply::diagnostic(NO_STORE_GIVEN.to_string(), Outcome::NoStoreGiven)
            }
            Err(e) => missing_column(e),
        },
        [store] => match directory.lookup_one(store) {
            Ok(Some(region)) => {
                info!(store = %store, region = %region, "Store resolved");
                ResolvedReply {
                    body_text: body_text.replacen(PLACEHOLDER, region, 1),
                    attachment: None,
                    outcome: Outcome::Resolved,
                }
            }
            Ok(None) => {
                warn!(store = %store, "No matching store");
                ResolvedReply::diagnostic(
                    format!("No matching store found for store number: {store}"),
                    Outcome::NoMatch,
                )
            }
            Err(e) => missing_column(e),
        },
        many => match directory.lookup_many(many) {
            Ok(filtered) => {
                info!(requested = many.len(), matched = filtered.len(), "Stores filtered");
                let attachment = (template.attach_file && !filtered.is_empty()).then_some(filtered);
                ResolvedReply {
                    body_text: body_text.replacen(PLACEHOLDER, MULTIPLE_STORES, 1),
                    attachment,
                    outcome: Outcome::Resolved,
                }
            }
            Err(e) => missing_column(e),
        },
    }
}

fn missing_column(err: DirectoryError) -> ResolvedReply {
    warn!(error = %err, "Store list cannot answer lookup");
    ResolvedReply::diagnostic(err.to_string(), Outcome::MissingColumn)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store_directory::directory_from;
    use crate::templates::{self, TEMPLATES};

    fn directory() -> StoreDirectory {
        directory_from(
            &["Store Number", "Region Code"],
            &[&["101", "R5"], &["102", "R9"], &["103", "R1"]],
        )
    }

    fn template(name: &str) -> &'static Template {
        templates::find(name).unwrap()
    }

    #[test]
    fn test_query_parsing() {
        let q = StoreQuery::parse(" 101,102  103 ,, ");
        assert_eq!(q.tokens(), &["101", "102", "103"]);
        assert!(StoreQuery::parse(" , ").tokens().is_empty());
    }

    #[test]
    fn test_plain_templates_untouched() {
        let dir = directory();
        for tpl in TEMPLATES.iter().filter(|t| !t.needs_store && !t.attach_file) {
            let reply = compose(tpl, Some("101"), &dir);
            assert_eq!(reply.body_text, tpl.reply);
            assert!(reply.attachment.is_none());
        }
    }

    #[test]
    fn test_one_store_hit() {
        let reply = compose(template("One store"), Some("101"), &directory());
        assert_eq!(
            reply.body_text,
            "This bills to: GL code 170.3010.R5.000.6340.623020.000.0000"
        );
        assert_eq!(reply.outcome, Outcome::Resolved);
    }

    #[test]
    fn test_one_store_miss() {
        let reply = compose(template("One store"), Some("999"), &directory());
        assert!(
            reply
                .body_text
                .contains("No matching store found for store number: 999")
        );
        assert!(reply.attachment.is_none());
        assert_eq!(reply.outcome, Outcome::NoMatch);
    }

    #[test]
    fn test_group_of_stores_filters_in_order() {
        let reply = compose(template("Group of Stores"), Some("103, 101"), &directory());
        let table = reply.attachment.unwrap();
        assert_eq!(table.store_numbers(), vec!["101", "103"]);
    }

    #[test]
    fn test_group_scenario_two_rows() {
        let dir = directory_from(
            &["store number", "region code"],
            &[&["101", "R5"], &["102", "R9"]],
        );
        let reply = compose(template("Group of Stores"), Some("101, 102"), &dir);
        assert_eq!(reply.attachment.map(|t| t.len()), Some(2));
    }

    #[test]
    fn test_multiple_stores_placeholder() {
        let reply = compose(template("One store"), Some("555 556"), &directory());
        assert_eq!(
            reply.body_text,
            "This bills to: GL code 170.3010.multiple stores.000.6340.623020.000.0000"
        );
        // attach_file is false for "One store"
        assert!(reply.attachment.is_none());
    }

    #[test]
    fn test_blank_region_code_is_no_match() {
        let dir = directory_from(&["store number", "region code"], &[&["101", ""]]);
        let reply = compose(template("One store"), Some("101"), &dir);
        assert_eq!(reply.outcome, Outcome::NoMatch);
        assert!(!reply.body_text.contains("170.3010..000"));
    }

    #[test]
    fn test_multiple_without_matches_has_no_attachment() {
        let reply = compose(template("Group of Stores"), Some("555 556"), &directory());
        assert!(reply.attachment.is_none());
        assert_eq!(reply.outcome, Outcome::Resolved);
    }

    #[test]
    fn test_missing_store_column() {
        let dir = directory_from(&["shop", "region code"], &[&["5", "R1"]]);
        let reply = compose(template("Scrubs"), Some("5"), &dir);
        assert_eq!(
            reply.body_text,
            "The store list does not contain a 'store number' column."
        );
        assert_eq!(reply.outcome, Outcome::MissingColumn);

        let reply = compose(template("Group of Stores"), Some("5 6"), &dir);
        assert_eq!(reply.outcome, Outcome::MissingColumn);
        assert!(reply.attachment.is_none());
    }

    #[test]
    fn test_empty_store_input() {
        let reply = compose(template("One store"), Some("   "), &directory());
        assert_eq!(reply.body_text, NO_STORE_GIVEN);
        assert_eq!(reply.outcome, Outcome::NoStoreGiven);

        let reply = compose(template("One store"), None, &directory());
        assert_eq!(reply.outcome, Outcome::NoStoreGiven);
    }

    #[test]
    fn test_all_stores_attaches_full_table() {
        let reply = compose(template("All stores"), None, &directory());
        assert_eq!(reply.attachment.map(|t| t.len()), Some(3));
    }
}
