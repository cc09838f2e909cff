//! Phrase vocabulary used by the response classifier.
//!
//! Every heuristic signal the classifier reacts to is listed in
//! [`PHRASE_TABLE`], one row per category. Patterns are case-insensitive and
//! matched with `regex`; tests enumerate every category from this table.

use std::sync::LazyLock;

use regex::Regex;

/// A class of phrases that maps to one classifier signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PhraseCategory {
    /// Planner hands work to the Executor explicitly.
    Delegation,
    /// Planner says its analysis is finished without delegating.
    AnalysisComplete,
    /// Executor reports the work item as done.
    TaskComplete,
    /// A line reporting a failure.
    Error,
    /// A line reporting a success.
    Success,
    /// Planner accepts the Executor's work.
    Approval,
    /// Planner sends the work back.
    Rejection,
}

impl PhraseCategory {
    pub const ALL: [PhraseCategory; 7] = [
        PhraseCategory::Delegation,
        PhraseCategory::AnalysisComplete,
        PhraseCategory::TaskComplete,
        PhraseCategory::Error,
        PhraseCategory::Success,
        PhraseCategory::Approval,
        PhraseCategory::Rejection,
    ];
}

/// One row of the phrase table.
#[derive(Debug)]
pub struct PhraseRule {
    pub category: PhraseCategory,
    pub patterns: &'static [&'static str],
    /// A sample phrase that must match; used by the table tests.
    pub example: &'static str,
}

pub const PHRASE_TABLE: &[PhraseRule] = &[
    PhraseRule {
        category: PhraseCategory::Delegation,
        patterns: &[
            r"\bwork items? (?:are |have been )?(?:defined|created|ready|listed)\b",
            r"\bready (?:to|for) (?:implement|implementation|execute|execution)\b",
            r"\bnext step:?\s*execute\b",
            r"\bhand(?:ing)?[ -]?(?:off|over) to (?:the )?executor\b",
            r"\bdelegat(?:e|ing) to (?:the )?executor\b",
        ],
        example: "Work items defined. Next step: execute.",
    },
    PhraseRule {
        category: PhraseCategory::AnalysisComplete,
        patterns: &[
            r"\banalysis (?:is )?(?:now )?complete\b",
            r"\bplanning (?:is )?(?:now )?complete\b",
            r"\b(?:finished|completed) (?:the |my )?analysis\b",
            r"\bplan is (?:ready|final|complete)\b",
        ],
        example: "Analysis complete.",
    },
    PhraseRule {
        category: PhraseCategory::TaskComplete,
        patterns: &[
            r"\btask (?:is )?(?:now )?complete(?:d)?\b",
            r"\bsuccessfully implemented\b",
            r"\bready for review\b",
            r"\bimplementation (?:is )?(?:now )?complete\b",
            r"\bwork item (?:is )?(?:now )?(?:complete|done)\b",
        ],
        example: "Successfully implemented the change.",
    },
    PhraseRule {
        category: PhraseCategory::Error,
        patterns: &[
            r"^\s*(?:error|fatal)\b",
            r"\berror(?:\[[A-Z0-9]+\])?:",
            r"\bfailed to\b",
            r"\b(?:build|tests?|compilation) failed\b",
            r"\bexception\b",
            r"\btraceback\b",
            r"\bpanicked at\b",
            r"\bcommand not found\b",
            r"\bpermission denied\b",
            r"\bconnection refused\b",
            r"\bno such file or directory\b",
        ],
        example: "Error: connection refused",
    },
    PhraseRule {
        category: PhraseCategory::Success,
        patterns: &[
            r"\bsuccessfully\b",
            r"\bsucceeded\b",
            r"\ball (?:tests|checks) pass(?:ed|ing)?\b",
            r"\btests? passed\b",
            r"\bcompleted without errors\b",
            r"✓|✅",
        ],
        example: "All tests passed",
    },
    PhraseRule {
        category: PhraseCategory::Approval,
        patterns: &[
            r"\bapproved?\b",
            r"\blgtm\b",
            r"\blooks good\b",
            r"\baccept(?:ed)?\b",
        ],
        example: "APPROVED: the change meets the goal.",
    },
    PhraseRule {
        category: PhraseCategory::Rejection,
        patterns: &[
            r"\breject(?:ed)?\b",
            r"\bnot (?:approved|accepted)\b",
            r"\bneeds? (?:more )?(?:changes|rework|revision|work)\b",
            r"\bchanges requested\b",
            r"\bdo(?:es)? not (?:meet|satisfy)\b",
        ],
        example: "REJECTED: tests are missing.",
    },
];

struct CompiledRule {
    category: PhraseCategory,
    regex: Regex,
}

static COMPILED: LazyLock<Vec<CompiledRule>> = LazyLock::new(|| {
    PHRASE_TABLE
        .iter()
        .map(|rule| CompiledRule {
            category: rule.category,
            regex: Regex::new(&format!("(?im){}", rule.patterns.join("|"))).unwrap(),
        })
        .collect()
});

/// Does `text` contain a phrase from `category`?
pub fn matches(category: PhraseCategory, text: &str) -> bool {
    COMPILED
        .iter()
        .filter(|rule| rule.category == category)
        .any(|rule| rule.regex.is_match(text))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_category_has_exactly_one_rule() {
        for category in PhraseCategory::ALL {
            let count = PHRASE_TABLE
                .iter()
                .filter(|rule| rule.category == category)
                .count();
            assert_eq!(count, 1, "{category:?}");
        }
    }

    #[test]
    fn every_example_matches_its_category() {
        for rule in PHRASE_TABLE {
            assert!(
                matches(rule.category, rule.example),
                "{:?} should match {:?}",
                rule.category,
                rule.example
            );
        }
    }

    #[test]
    fn matching_is_case_insensitive() {
        assert!(matches(PhraseCategory::TaskComplete, "TASK COMPLETE"));
        assert!(matches(PhraseCategory::Delegation, "Ready To Implement"));
    }

    #[test]
    fn error_vocabulary_ignores_benign_mentions() {
        assert!(!matches(
            PhraseCategory::Error,
            "Improved error handling in the parser"
        ));
        assert!(!matches(PhraseCategory::Error, "test result: ok. 0 failed"));
        assert!(matches(PhraseCategory::Error, "error[E0425]: cannot find value"));
        assert!(matches(PhraseCategory::Error, "Build failed with 2 errors"));
    }

    #[test]
    fn scenario_phrases_hit_expected_categories() {
        assert!(matches(
            PhraseCategory::Delegation,
            "Work items created and ready to implement."
        ));
        assert!(matches(PhraseCategory::TaskComplete, "Ready for review."));
        assert!(matches(PhraseCategory::Success, "Successfully implemented"));
        assert!(!matches(PhraseCategory::Success, "Error: connection refused"));
    }
}
