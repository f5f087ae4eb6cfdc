//! Mapping a document group onto template cells.
//!
//! Rendering is pure: it turns a group, a mapping and an identifier into the
//! list of [`CellWrite`]s a client should apply. Absent values and columns
//! the source does not have produce no write, leaving the template's own
//! content in place.

use log::debug;
use rust_decimal::Decimal;

use crate::{
    client::CellWrite,
    data::{Value, format_amount, format_european_amount, parse_date_like},
    derive::DeriveContext,
    error::RenderError,
    group::DocumentGroup,
    mapping::{CellMapping, MappingEntry, OutputFormat},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedDocument {
    pub document: String,
    pub identifier: String,
    pub writes: Vec<CellWrite>,
}

pub fn render(
    group: &DocumentGroup<'_>,
    mapping: &CellMapping,
    identifier: &str,
    context: &DeriveContext,
) -> Result<Vec<CellWrite>, RenderError> {
    let mut writes = Vec::new();
    for entry in &mapping.entries {
        match entry {
            MappingEntry::Static {
                cell,
                field,
                format,
            } => {
                let first = group.first();
                match first.get(field) {
                    Some(value) if !value.is_absent() => {
                        writes.push(CellWrite::new(*cell, apply_format(field, value, *format)?));
                    }
                    Some(_) => debug!("'{field}' is empty for '{}'; leaving {cell}", group.label()),
                    None => debug!("Column '{field}' not present; leaving {cell}"),
                }
            }
            MappingEntry::Computed {
                cell,
                compute,
                format,
            } => match context.evaluate(compute, group, identifier)? {
                Some(value) => {
                    let label = entry.describe();
                    writes.push(CellWrite::new(*cell, apply_format(&label, &value, *format)?));
                }
                None => debug!("{} produced nothing; leaving {cell}", entry.describe()),
            },
            MappingEntry::Repeating {
                cell,
                field,
                stride,
                format,
                capacity,
            } => {
                if let Some(capacity) = capacity
                    && group.len() > *capacity
                {
                    return Err(RenderError::Overflow {
                        field: field.clone(),
                        members: group.len(),
                        capacity: *capacity,
                    });
                }
                for (position, record) in group.members().enumerate() {
                    let Some(value) = record.get(field).filter(|value| !value.is_absent()) else {
                        continue;
                    };
                    let offset = position.checked_mul(*stride).ok_or_else(|| {
                        RenderError::Position(format!("{cell} + {position} x {stride}"))
                    })?;
                    let target = cell.offset_rows(offset)?;
                    writes.push(CellWrite::new(target, apply_format(field, value, *format)?));
                }
            }
        }
    }
    Ok(writes)
}

fn apply_format(field: &str, value: &Value, format: OutputFormat) -> Result<Value, RenderError> {
    let amount = || -> Result<Decimal, RenderError> {
        value
            .as_amount()
            .ok()
            .flatten()
            .ok_or_else(|| RenderError::InvalidAmount {
                column: field.to_string(),
                value: value.as_display(),
            })
    };
    Ok(match format {
        OutputFormat::Plain => value.clone(),
        OutputFormat::Amount => Value::text(format_amount(amount()?)),
        OutputFormat::EuropeanAmount => Value::text(format_european_amount(amount()?)),
        OutputFormat::Date => match parse_date_like(&value.as_display()) {
            Ok(date) => Value::text(date.format("%Y-%m-%d").to_string()),
            Err(_) => value.clone(),
        },
    })
}
