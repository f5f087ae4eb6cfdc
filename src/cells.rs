//! Cell positions and ranges.
//!
//! Inside the engine a position is a zero-based `(column, row)` pair. The A1
//! notation used by spreadsheet templates (`F25`, `A2:F`) is parsed and
//! rendered here, at the configuration and client boundary only.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::error::RenderError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CellRef {
    pub column: usize,
    pub row: usize,
}

impl CellRef {
    pub fn new(column: usize, row: usize) -> Self {
        Self { column, row }
    }

    /// Moves down by `rows`, failing instead of wrapping.
    pub fn offset_rows(&self, rows: usize) -> Result<Self, RenderError> {
        let row = self
            .row
            .checked_add(rows)
            .ok_or_else(|| RenderError::Position(format!("{self} + {rows} rows")))?;
        Ok(Self {
            column: self.column,
            row,
        })
    }

    pub fn to_a1(&self) -> String {
        format!("{}{}", column_letters(self.column), self.row + 1)
    }
}

impl fmt::Display for CellRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_a1())
    }
}

impl FromStr for CellRef {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let (column, row) = split_a1(value)?;
        let column = column.ok_or_else(|| format!("'{value}' is missing a column"))?;
        let row = row.ok_or_else(|| format!("'{value}' is missing a row number"))?;
        Ok(CellRef { column, row })
    }
}

impl TryFrom<String> for CellRef {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<CellRef> for String {
    fn from(value: CellRef) -> Self {
        value.to_a1()
    }
}

/// A rectangular selector such as `A:AI`, `A2:F` or `B3:D10`. Missing bounds
/// extend to the edge of the sheet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeRef {
    pub start_column: usize,
    pub start_row: usize,
    pub end_column: Option<usize>,
    pub end_row: Option<usize>,
}

impl RangeRef {
    pub fn contains_column(&self, column: usize) -> bool {
        column >= self.start_column && self.end_column.is_none_or(|end| column <= end)
    }

    pub fn contains_row(&self, row: usize) -> bool {
        row >= self.start_row && self.end_row.is_none_or(|end| row <= end)
    }
}

impl FromStr for RangeRef {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        let (start, end) = match trimmed.split_once(':') {
            Some((start, end)) => (start, Some(end)),
            None => (trimmed, None),
        };
        let (start_column, start_row) = split_a1(start)?;
        let start_column =
            start_column.ok_or_else(|| format!("range '{value}' must start with a column"))?;
        let (end_column, end_row) = match end {
            Some(end) => split_a1(end)?,
            None => (None, None),
        };
        if end_column.is_some_and(|end| end < start_column) {
            return Err(format!("range '{value}' ends before it starts"));
        }
        let start_row = start_row.unwrap_or(0);
        if end_row.is_some_and(|end| end < start_row) {
            return Err(format!("range '{value}' ends before it starts"));
        }
        Ok(RangeRef {
            start_column,
            start_row,
            end_column,
            end_row,
        })
    }
}

pub fn column_letters(mut index: usize) -> String {
    let mut letters = Vec::new();
    loop {
        letters.push(b'A' + (index % 26) as u8);
        if index < 26 {
            break;
        }
        index = index / 26 - 1;
    }
    letters.reverse();
    String::from_utf8(letters).unwrap_or_default()
}

fn split_a1(value: &str) -> Result<(Option<usize>, Option<usize>), String> {
    let value = value.trim();
    if value.is_empty() {
        return Err("empty cell reference".to_string());
    }
    let split = value
        .find(|c: char| !c.is_ascii_alphabetic())
        .unwrap_or(value.len());
    let (letters, digits) = value.split_at(split);
    let column = if letters.is_empty() {
        None
    } else {
        let mut index = 0usize;
        for ch in letters.chars() {
            let digit = (ch.to_ascii_uppercase() as u8 - b'A') as usize + 1;
            index = index
                .checked_mul(26)
                .and_then(|i| i.checked_add(digit))
                .ok_or_else(|| format!("column in '{value}' is too large"))?;
        }
        Some(index - 1)
    };
    let row = if digits.is_empty() {
        None
    } else {
        let number: usize = digits
            .parse()
            .map_err(|_| format!("invalid row number in '{value}'"))?;
        if number == 0 {
            return Err(format!("row numbers start at 1 in '{value}'"));
        }
        Some(number - 1)
    };
    Ok((column, row))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_and_formats_a1() {
        let cell: CellRef = "A29".parse().unwrap();
        assert_eq!(cell, CellRef::new(0, 28));
        assert_eq!(cell.to_a1(), "A29");
        let wide: CellRef = "AI3".parse().unwrap();
        assert_eq!(wide.column, 34);
        assert_eq!(wide.to_a1(), "AI3");
    }

    #[test]
    fn column_letters_roll_over() {
        assert_eq!(column_letters(0), "A");
        assert_eq!(column_letters(25), "Z");
        assert_eq!(column_letters(26), "AA");
        assert_eq!(column_letters(701), "ZZ");
        assert_eq!(column_letters(702), "AAA");
    }

    #[test]
    fn rejects_malformed_cells() {
        assert!("29".parse::<CellRef>().is_err());
        assert!("A".parse::<CellRef>().is_err());
        assert!("A0".parse::<CellRef>().is_err());
        assert!("A1B".parse::<CellRef>().is_err());
    }

    #[test]
    fn parses_open_ranges() {
        let columns: RangeRef = "A:AI".parse().unwrap();
        assert_eq!(columns.start_row, 0);
        assert_eq!(columns.end_column, Some(34));
        assert_eq!(columns.end_row, None);

        let from_row: RangeRef = "A2:F".parse().unwrap();
        assert_eq!(from_row.start_row, 1);
        assert!(from_row.contains_column(5));
        assert!(!from_row.contains_column(6));
        assert!(!from_row.contains_row(0));

        let boxed: RangeRef = "B3:D10".parse().unwrap();
        assert_eq!(boxed.end_row, Some(9));
        assert!("D1:B2".parse::<RangeRef>().is_err());
    }

    #[test]
    fn offset_moves_down() {
        let base = CellRef::new(2, 28);
        assert_eq!(base.offset_rows(2).unwrap().to_a1(), "C31");
    }
}
