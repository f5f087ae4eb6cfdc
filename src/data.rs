use std::{fmt, str::FromStr};

use anyhow::{Result, anyhow};
use chrono::{NaiveDate, NaiveDateTime};
use rust_decimal::{Decimal, prelude::ToPrimitive};
use serde::{Deserialize, Serialize};

/// Scalar cell value. Empty cells are carried as [`Value::Absent`] rather than
/// being filled with a placeholder string.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    #[default]
    Absent,
    Number(Decimal),
    Text(String),
}

/// Placeholder tokens that sources use in place of an empty cell.
pub const SENTINELS: &[&str] = &["", "n/a", "none", "null", "nan", "-"];

impl Value {
    /// Builds a value from a raw cell, mapping whitespace-only cells to `Absent`.
    pub fn from_cell(raw: &str) -> Self {
        if raw.trim().is_empty() {
            Value::Absent
        } else {
            Value::Text(raw.to_string())
        }
    }

    pub fn text(value: impl Into<String>) -> Self {
        Value::from_cell(&value.into())
    }

    pub fn is_absent(&self) -> bool {
        matches!(self, Value::Absent)
    }

    /// True for absent cells and for placeholder text such as `N/A` or `none`.
    pub fn is_blank(&self) -> bool {
        match self {
            Value::Absent => true,
            Value::Number(_) => false,
            Value::Text(s) => is_sentinel(s),
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_display(&self) -> String {
        match self {
            Value::Absent => String::new(),
            Value::Number(d) => d.to_string(),
            Value::Text(s) => s.clone(),
        }
    }

    /// Interprets the value as a monetary amount. `Ok(None)` means absent.
    pub fn as_amount(&self) -> Result<Option<Decimal>> {
        match self {
            Value::Absent => Ok(None),
            Value::Number(d) => Ok(Some(*d)),
            Value::Text(s) if is_sentinel(s) => Ok(None),
            Value::Text(s) => parse_amount(s)
                .map(Some)
                .ok_or_else(|| anyhow!("Failed to parse '{s}' as amount")),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_display())
    }
}

impl From<Decimal> for Value {
    fn from(value: Decimal) -> Self {
        Value::Number(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::from_cell(value)
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::from_cell(&value)
    }
}

pub fn is_sentinel(value: &str) -> bool {
    let trimmed = value.trim();
    SENTINELS
        .iter()
        .any(|token| trimmed.eq_ignore_ascii_case(token))
}

/// Parses amounts written with either `.` or `,` as the decimal separator,
/// ignoring currency symbols and grouping characters.
pub fn parse_amount(raw: &str) -> Option<Decimal> {
    let cleaned = raw
        .chars()
        .filter(|c| c.is_ascii_digit() || matches!(c, ',' | '.' | '-' | '+'))
        .collect::<String>();
    if !cleaned.chars().any(|c| c.is_ascii_digit()) {
        return None;
    }
    let last_comma = cleaned.rfind(',');
    let last_dot = cleaned.rfind('.');
    let canonical = match (last_comma, last_dot) {
        (Some(comma), Some(dot)) if comma > dot => cleaned.replace('.', "").replace(',', "."),
        (Some(_), Some(_)) => cleaned.replace(',', ""),
        (Some(comma), None) => {
            let decimals = cleaned.len() - comma - 1;
            if cleaned.matches(',').count() == 1 && decimals != 3 {
                cleaned.replace(',', ".")
            } else {
                cleaned.replace(',', "")
            }
        }
        (None, Some(_)) if cleaned.matches('.').count() > 1 => cleaned.replace('.', ""),
        _ => cleaned,
    };
    Decimal::from_str(&canonical).ok()
}

/// Renders an amount with exactly two decimals, e.g. `1234.50`.
pub fn format_amount(value: Decimal) -> String {
    let mut rounded = value.round_dp(2);
    rounded.rescale(2);
    rounded.to_string()
}

/// Renders an amount as `1.234,56`.
pub fn format_european_amount(value: Decimal) -> String {
    let plain = format_amount(value);
    let (sign, unsigned) = match plain.strip_prefix('-') {
        Some(rest) => ("-", rest),
        None => ("", plain.as_str()),
    };
    let (integer, fraction) = unsigned.split_once('.').unwrap_or((unsigned, "00"));
    let digits = integer.as_bytes();
    let mut grouped = String::with_capacity(integer.len() + integer.len() / 3);
    for (idx, digit) in digits.iter().enumerate() {
        if idx > 0 && (digits.len() - idx) % 3 == 0 {
            grouped.push('.');
        }
        grouped.push(*digit as char);
    }
    format!("{sign}{grouped},{fraction}")
}

pub fn parse_naive_date(value: &str) -> Result<NaiveDate> {
    const DATE_FORMATS: &[&str] = &[
        "%Y-%m-%d",
        "%d/%m/%Y",
        "%m/%d/%Y",
        "%Y/%m/%d",
        "%d-%m-%Y",
        "%d.%m.%Y",
        "%d %B %Y",
        "%B %d, %Y",
    ];
    for fmt in DATE_FORMATS {
        if let Ok(parsed) = NaiveDate::parse_from_str(value, fmt) {
            return Ok(parsed);
        }
    }
    Err(anyhow!("Failed to parse '{value}' as date"))
}

pub fn parse_naive_datetime(value: &str) -> Result<NaiveDateTime> {
    const DATETIME_FORMATS: &[&str] = &[
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%d/%m/%Y %H:%M:%S",
        "%m/%d/%Y %H:%M:%S",
        "%d.%m.%Y %H:%M:%S",
        "%Y-%m-%d %H:%M",
        "%Y-%m-%dT%H:%M",
    ];
    for fmt in DATETIME_FORMATS {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(value, fmt) {
            return Ok(parsed);
        }
    }
    Err(anyhow!("Failed to parse '{value}' as datetime"))
}

/// Accepts either a date or a timestamp (form submissions carry both).
pub fn parse_date_like(value: &str) -> Result<NaiveDate> {
    let trimmed = value.trim();
    parse_naive_date(trimmed)
        .or_else(|_| parse_naive_datetime(trimmed).map(|dt| dt.date()))
        .map_err(|_| anyhow!("Failed to parse '{value}' as date"))
}

/// Canonical identifier for a header, usable as an expression variable.
pub fn normalize_column_name(name: &str) -> String {
    let mut normalized = name
        .chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' => c,
            _ => '_',
        })
        .collect::<String>()
        .to_ascii_lowercase();
    if normalized.is_empty() {
        return "column".to_string();
    }
    if normalized.starts_with(|c: char| c.is_ascii_digit()) {
        normalized.insert(0, '_');
    }
    normalized
}

pub fn value_to_evalexpr(value: &Value) -> evalexpr::Value {
    match value {
        Value::Absent => evalexpr::Value::Empty,
        Value::Number(d) => decimal_to_evalexpr(*d),
        Value::Text(s) => {
            let trimmed = s.trim();
            if let Ok(i) = trimmed.parse::<i64>() {
                evalexpr::Value::Int(i)
            } else if let Ok(f) = trimmed.parse::<f64>() {
                evalexpr::Value::Float(f)
            } else {
                evalexpr::Value::String(s.clone())
            }
        }
    }
}

fn decimal_to_evalexpr(value: Decimal) -> evalexpr::Value {
    if value.fract().is_zero() {
        if let Some(i) = value.to_i64() {
            return evalexpr::Value::Int(i);
        }
    }
    evalexpr::Value::Float(value.to_f64().unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    #[test]
    fn from_cell_maps_whitespace_to_absent() {
        assert_eq!(Value::from_cell("   "), Value::Absent);
        assert_eq!(Value::from_cell("x"), Value::Text("x".to_string()));
    }

    #[test]
    fn blank_covers_placeholders() {
        assert!(Value::text("N/A").is_blank());
        assert!(Value::text(" none ").is_blank());
        assert!(!Value::text("INV-1").is_blank());
        // country codes and similar short values stay real
        assert!(!Value::text("NA").is_blank());
        assert!(!Value::Number(Decimal::ZERO).is_blank());
    }

    #[test]
    fn parse_amount_handles_both_separators() {
        assert_eq!(parse_amount("1.234,56"), Some(Decimal::new(123456, 2)));
        assert_eq!(parse_amount("1,234.56"), Some(Decimal::new(123456, 2)));
        assert_eq!(parse_amount("€ 12,5"), Some(Decimal::new(125, 1)));
        assert_eq!(parse_amount("1,000"), Some(Decimal::new(1000, 0)));
        assert_eq!(parse_amount("-40"), Some(Decimal::new(-40, 0)));
        assert_eq!(parse_amount("n/a"), None);
    }

    #[test]
    fn european_format_groups_thousands() {
        assert_eq!(format_european_amount(Decimal::new(123456789, 2)), "1.234.567,89");
        assert_eq!(format_european_amount(Decimal::new(5, 1)), "0,50");
        assert_eq!(format_european_amount(Decimal::new(-100000, 2)), "-1.000,00");
        assert_eq!(format_amount(Decimal::new(19, 0)), "19.00");
    }

    #[test]
    fn parse_date_like_accepts_timestamps() {
        let expected = NaiveDate::from_ymd_opt(2024, 5, 6).unwrap();
        assert_eq!(parse_date_like("2024-05-06").unwrap(), expected);
        assert_eq!(parse_date_like("06.05.2024").unwrap(), expected);
        assert_eq!(parse_date_like("2024-05-06 14:30:00").unwrap(), expected);
        assert!(parse_date_like("yesterday").is_err());
    }

    #[test]
    fn normalize_column_name_produces_identifiers() {
        assert_eq!(normalize_column_name("Order ID"), "order_id");
        assert_eq!(normalize_column_name("123Metric"), "_123metric");
        assert_eq!(normalize_column_name(""), "column");
    }

    #[test]
    fn value_to_evalexpr_reads_numeric_text() {
        assert_eq!(
            value_to_evalexpr(&Value::text("42")),
            evalexpr::Value::Int(42)
        );
        assert_eq!(
            value_to_evalexpr(&Value::Number(Decimal::new(25, 1))),
            evalexpr::Value::Float(2.5)
        );
        assert_eq!(value_to_evalexpr(&Value::Absent), evalexpr::Value::Empty);
    }
}
