//! Key and header canonicalization.
//!
//! Join and group keys are compared only after [`normalize`]: case-folded,
//! trimmed, and with internal whitespace either removed ([`KeyPolicy::Compact`],
//! for identifiers such as trip codes) or collapsed to one space
//! ([`KeyPolicy::Collapse`], for names, e-mail addresses and timestamps).
//! Placeholder tokens (`N/A`, `none`, ...) normalize to the empty marker and
//! therefore never become a [`JoinKey`].

use std::fmt;

use heck::ToSnakeCase;
use serde::{Deserialize, Serialize};

use crate::data::{SENTINELS, Value};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyPolicy {
    /// Strip every whitespace character.
    Compact,
    /// Collapse whitespace runs to a single space.
    #[default]
    Collapse,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JoinKey(String);

impl JoinKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JoinKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub fn normalize(raw: &str, policy: KeyPolicy) -> String {
    let lowered = raw.to_lowercase();
    let normalized = match policy {
        KeyPolicy::Compact => lowered.chars().filter(|c| !c.is_whitespace()).collect(),
        KeyPolicy::Collapse => lowered.split_whitespace().collect::<Vec<_>>().join(" "),
    };
    if SENTINELS.contains(&normalized.as_str()) {
        String::new()
    } else {
        normalized
    }
}

pub fn join_key(value: &Value, policy: KeyPolicy) -> Option<JoinKey> {
    let raw = match value {
        Value::Absent => return None,
        Value::Number(d) => d.normalize().to_string(),
        Value::Text(s) => s.clone(),
    };
    let normalized = normalize(&raw, policy);
    if normalized.is_empty() {
        None
    } else {
        Some(JoinKey(normalized))
    }
}

/// How source headers are rewritten at ingestion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HeaderStyle {
    /// Keep headers verbatim.
    Original,
    /// Trim surrounding whitespace only.
    #[default]
    Trimmed,
    /// Trim, lower-case and replace spaces with underscores
    /// (`Post Code/ZIP Code` becomes `post_code/zip_code`).
    LowerUnderscore,
    /// Full snake case (`Post Code/ZIP Code` becomes `post_code_zip_code`).
    Snake,
}

pub fn normalize_header(name: &str, style: HeaderStyle) -> String {
    match style {
        HeaderStyle::Original => name.to_string(),
        HeaderStyle::Trimmed => name.trim().to_string(),
        HeaderStyle::LowerUnderscore => name.trim().to_lowercase().replace(' ', "_"),
        HeaderStyle::Snake => name.trim().to_snake_case(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compact_strips_all_whitespace() {
        assert_eq!(normalize("  T-12 34 ", KeyPolicy::Compact), "t-1234");
    }

    #[test]
    fn collapse_keeps_single_spaces() {
        assert_eq!(
            normalize(" Jane \t  DOE ", KeyPolicy::Collapse),
            "jane doe"
        );
    }

    #[test]
    fn sentinels_become_empty_marker() {
        for raw in ["", "  ", "N/A", "None", " NULL ", "nan"] {
            assert_eq!(normalize(raw, KeyPolicy::Collapse), "", "{raw:?}");
            assert!(join_key(&Value::text(raw), KeyPolicy::Compact).is_none());
        }
    }

    #[test]
    fn short_codes_are_real_keys() {
        let namibia = join_key(&Value::text("NA"), KeyPolicy::Compact);
        assert_eq!(namibia.as_ref().map(JoinKey::as_str), Some("na"));
        assert_eq!(namibia, join_key(&Value::text(" na"), KeyPolicy::Compact));
    }

    #[test]
    fn differently_formatted_keys_match() {
        let a = join_key(&Value::text("T-100 "), KeyPolicy::Compact);
        let b = join_key(&Value::text(" t-100"), KeyPolicy::Compact);
        assert!(a.is_some());
        assert_eq!(a, b);
    }

    #[test]
    fn header_styles() {
        assert_eq!(
            normalize_header(" Post Code/ZIP Code ", HeaderStyle::LowerUnderscore),
            "post_code/zip_code"
        );
        assert_eq!(
            normalize_header("Post Code/ZIP Code", HeaderStyle::Snake),
            "post_code_zip_code"
        );
        assert_eq!(normalize_header(" Status ", HeaderStyle::Trimmed), "Status");
    }
}
