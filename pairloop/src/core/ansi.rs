//! Terminal escape sequence stripping.
//!
//! Handles CSI (`ESC [ ... final`), OSC (`ESC ] ... BEL|ST`), charset
//! designations and two-byte escapes. Other C0 control characters are dropped
//! except `\n` and `\t`; `\r` is dropped so CRLF line endings become `\n`.

use std::sync::LazyLock;

use regex::Regex;

static COMPLETE_ESCAPE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\x1b\[[0-?]*[ -/]*[@-~]|\x1b\][^\x07\x1b]*(?:\x07|\x1b\\)|\x1b[()][0-9A-Za-z]|\x1b[@-Z\\^_78=>]",
    )
    .unwrap()
});

/// A suffix that could still grow into a complete escape sequence.
static INCOMPLETE_ESCAPE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\x1b(?:\[[0-?]*[ -/]*|\][^\x07\x1b]*\x1b?|[()])?\z").unwrap()
});

/// Remove escape sequences and control characters from `input`.
pub fn strip_ansi(input: &str) -> String {
    let without_escapes = COMPLETE_ESCAPE.replace_all(input, "");
    without_escapes
        .chars()
        .filter(|ch| !ch.is_control() || *ch == '\n' || *ch == '\t')
        .collect()
}

/// Split `input` at the start of a trailing, still-incomplete escape sequence.
///
/// Returns `(ready, held)`. Stripping `ready` now and `held` together with
/// the next chunk gives the same result as stripping the concatenation.
pub fn split_incomplete_escape(input: &str) -> (&str, &str) {
    match INCOMPLETE_ESCAPE.find(input) {
        Some(m) => input.split_at(m.start()),
        None => (input, ""),
    }
}
