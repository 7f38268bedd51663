//! Post-processing: deterministic cleanup of the model's JSON answer.
//!
//! ## Why is post-processing necessary?
//!
//! Even well-prompted models occasionally return output that is
//! *semantically correct* but *syntactically unusable*, for example:
//!
//! - Wrapping the object in ` ```json ... ``` ` fences despite the prompt
//!   saying "do not wrap in fences"
//! - Prefacing it with "Here is the table:" or trailing commentary
//! - Trailing commas after the last array element
//! - A byte-order mark or zero-width spaces copied from the source
//!
//! A second class of problems survives parsing: a table name with spaces or
//! punctuation (unusable as an SQL identifier) and repeated column names.
//! [`tidy_record`] fixes those on the typed record.
//!
//! ## Rule Order
//!
//! Invisible characters go first so fence detection sees clean input; the
//! object is cut out of surrounding prose before trailing commas are removed
//! so the comma rule never touches commentary.

use crate::table::StructuredTableRecord;
use once_cell::sync::Lazy;
use regex::Regex;

/// Apply all text cleanup rules to a raw model answer.
///
/// Rules (applied in order):
/// 1. Normalise line endings (CRLF → LF)
/// 2. Strip invisible Unicode (zero-width spaces, BOM, soft hyphens)
/// 3. Strip outer code fences
/// 4. Cut out the outermost `{ ... }` object
/// 5. Remove trailing commas before `}` / `]`
pub fn clean_json_response(input: &str) -> String {
    let s = normalise_line_endings(input);
    let s = remove_invisible_chars(&s);
    let s = strip_code_fences(&s);
    let s = extract_object(&s);
    remove_trailing_commas(&s)
}

// ── Rule 1: Normalise line endings ───────────────────────────────────────────

fn normalise_line_endings(input: &str) -> String {
    input.replace("\r\n", "\n").replace('\r', "\n")
}

// ── Rule 2: Remove invisible Unicode ─────────────────────────────────────────

fn remove_invisible_chars(input: &str) -> String {
    input
        .chars()
        .filter(|c| {
            !matches!(
                c,
                '\u{200B}' | '\u{200C}' | '\u{200D}' | '\u{2060}' | '\u{FEFF}' | '\u{00AD}'
            )
        })
        .collect()
}

// ── Rule 3: Strip outer code fences ──────────────────────────────────────────

static RE_OUTER_FENCES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```(?:json|JSON)?\s*\n(.*)\n```\s*$").unwrap());

fn strip_code_fences(input: &str) -> String {
    if let Some(caps) = RE_OUTER_FENCES.captures(input.trim()) {
        caps[1].to_string()
    } else {
        input.to_string()
    }
}

// ── Rule 4: Cut out the outermost object ─────────────────────────────────────

fn extract_object(input: &str) -> String {
    match (input.find('{'), input.rfind('}')) {
        (Some(start), Some(end)) if start < end => input[start..=end].to_string(),
        _ => input.trim().to_string(),
    }
}

// ── Rule 5: Remove trailing commas ───────────────────────────────────────────

static RE_TRAILING_COMMA: Lazy<Regex> = Lazy::new(|| Regex::new(r",(\s*[}\]])").unwrap());

fn remove_trailing_commas(input: &str) -> String {
    RE_TRAILING_COMMA.replace_all(input, "$1").to_string()
}

// ── Record rules ─────────────────────────────────────────────────────────────

static RE_NON_WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"\W+").unwrap());

/// Turn free text into an identifier: runs of non-word characters become a
/// single `_`, leading/trailing underscores are dropped.
pub fn sanitize_identifier(name: &str) -> String {
    RE_NON_WORD
        .replace_all(name.trim(), "_")
        .trim_matches('_')
        .to_string()
}

/// Enforce the record invariants the model is only asked to respect:
/// `name` is an identifier and `columns` are unique (first occurrence wins).
pub fn tidy_record(mut record: StructuredTableRecord) -> StructuredTableRecord {
    let name = sanitize_identifier(&record.name);
    record.name = if name.is_empty() {
        "table".to_string()
    } else {
        name
    };

    let mut seen = Vec::with_capacity(record.columns.len());
    record.columns.retain(|c| {
        if seen.contains(c) {
            false
        } else {
            seen.push(c.clone());
            true
        }
    });
    record
}

// ── Tests ────────────────────────────────────────────────────────────────────
