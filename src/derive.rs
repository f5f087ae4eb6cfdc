use chrono::NaiveDate;
use evalexpr::{
    ContextWithMutableVariables, HashMapContext, Value as EvalValue, eval_with_context,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{
    data::{Value, normalize_column_name, parse_date_like, value_to_evalexpr},
    error::RenderError,
    group::DocumentGroup,
    mapping::ComputedField,
    normalize::{KeyPolicy, normalize},
    table::RecordView,
};

pub const DEFAULT_DATE_FORMAT: &str = "%Y-%m-%d";
pub const INVALID_DATE: &str = "Invalid Date";

/// Where a member's line amount comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AmountSource {
    Column { column: String },
    Product { quantity: String, unit_price: String },
}

impl AmountSource {
    pub fn columns(&self) -> Vec<&str> {
        match self {
            AmountSource::Column { column } => vec![column.as_str()],
            AmountSource::Product {
                quantity,
                unit_price,
            } => vec![quantity.as_str(), unit_price.as_str()],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TaxRule {
    /// Column holding the tax status, read from the first member.
    pub column: String,
    /// Statuses that attract tax, compared after key normalization.
    pub taxable: Vec<String>,
    pub rate_percent: Decimal,
    /// `{rate}` is replaced with the applied rate.
    #[serde(default = "default_tax_label")]
    pub label: String,
}

fn default_tax_label() -> String {
    "VAT {rate}%".to_string()
}

/// Everything a computed field may need besides the group itself.
#[derive(Debug, Clone)]
pub struct DeriveContext {
    pub today: NaiveDate,
    pub amount: Option<AmountSource>,
    pub tax: Option<TaxRule>,
}

impl DeriveContext {
    pub fn new(today: NaiveDate) -> Self {
        Self {
            today,
            amount: None,
            tax: None,
        }
    }

    /// `Ok(None)` means nothing should be written.
    pub fn evaluate(
        &self,
        field: &ComputedField,
        group: &DocumentGroup<'_>,
        identifier: &str,
    ) -> Result<Option<Value>, RenderError> {
        let first = group.first();
        Ok(match field {
            ComputedField::Identifier => Some(Value::text(identifier)),
            ComputedField::Today { format } => Some(Value::text(
                self.today
                    .format(format.as_deref().unwrap_or(DEFAULT_DATE_FORMAT))
                    .to_string(),
            )),
            ComputedField::MonthName { column } => month_name(&first, column),
            ComputedField::Subtotal => Some(self.subtotal(group)?.into()),
            ComputedField::TaxAmount => Some(self.tax_amount(group)?.into()),
            ComputedField::TaxLabel => Some(Value::text(self.tax_label(&first))),
            ComputedField::Total => {
                let subtotal = self.subtotal(group)?;
                Some((subtotal + self.tax_on(&first, subtotal)).into())
            }
            ComputedField::Concat { columns, separator } => concat(&first, columns, separator),
            ComputedField::Expression { expr } => {
                let value = evaluate_expression(&first, expr)?;
                (!value.is_absent()).then_some(value)
            }
        })
    }

    /// Sum of member amounts; blank amounts count as zero.
    pub fn subtotal(&self, group: &DocumentGroup<'_>) -> Result<Decimal, RenderError> {
        let Some(source) = &self.amount else {
            return Ok(Decimal::ZERO);
        };
        group
            .members()
            .map(|record| member_amount(&record, source))
            .sum()
    }

    pub fn tax_amount(&self, group: &DocumentGroup<'_>) -> Result<Decimal, RenderError> {
        let subtotal = self.subtotal(group)?;
        Ok(self.tax_on(&group.first(), subtotal))
    }

    pub fn tax_label(&self, record: &RecordView<'_>) -> String {
        let Some(rule) = &self.tax else {
            return default_tax_label().replace("{rate}", "0");
        };
        let rate = self.applied_rate(record);
        rule.label.replace("{rate}", &rate.normalize().to_string())
    }

    fn tax_on(&self, record: &RecordView<'_>, subtotal: Decimal) -> Decimal {
        subtotal * self.applied_rate(record) / Decimal::ONE_HUNDRED
    }

    fn applied_rate(&self, record: &RecordView<'_>) -> Decimal {
        match &self.tax {
            Some(rule) if is_taxable(record, rule) => rule.rate_percent,
            _ => Decimal::ZERO,
        }
    }
}

fn is_taxable(record: &RecordView<'_>, rule: &TaxRule) -> bool {
    let Some(status) = record.get(&rule.column) else {
        return false;
    };
    let status = normalize(&status.as_display(), KeyPolicy::Collapse);
    !status.is_empty()
        && rule
            .taxable
            .iter()
            .any(|taxable| normalize(taxable, KeyPolicy::Collapse) == status)
}

fn member_amount(record: &RecordView<'_>, source: &AmountSource) -> Result<Decimal, RenderError> {
    match source {
        AmountSource::Column { column } => Ok(read_amount(record, column)?.unwrap_or_default()),
        AmountSource::Product {
            quantity,
            unit_price,
        } => match (read_amount(record, quantity)?, read_amount(record, unit_price)?) {
            (Some(quantity), Some(price)) => Ok(quantity * price),
            _ => Ok(Decimal::ZERO),
        },
    }
}

fn read_amount(record: &RecordView<'_>, column: &str) -> Result<Option<Decimal>, RenderError> {
    let Some(value) = record.get(column) else {
        return Ok(None);
    };
    value.as_amount().map_err(|_| RenderError::InvalidAmount {
        column: column.to_string(),
        value: value.as_display(),
    })
}

fn month_name(record: &RecordView<'_>, column: &str) -> Option<Value> {
    let value = record.get(column)?;
    if value.is_blank() {
        return None;
    }
    Some(match parse_date_like(&value.as_display()) {
        Ok(date) => Value::text(date.format("%B").to_string()),
        Err(_) => Value::text(INVALID_DATE),
    })
}

fn concat(record: &RecordView<'_>, columns: &[String], separator: &str) -> Option<Value> {
    let parts = columns
        .iter()
        .filter_map(|column| record.get(column))
        .filter(|value| !value.is_blank())
        .map(|value| value.as_display().trim().to_string())
        .collect::<Vec<_>>();
    if parts.is_empty() {
        None
    } else {
        Some(Value::text(parts.join(separator)))
    }
}

/// Evaluates `expr` with every column of `record` bound under its canonical
/// identifier (`Unit Price` becomes `unit_price`) and positionally as `c{idx}`.
pub fn evaluate_expression(record: &RecordView<'_>, expr: &str) -> Result<Value, RenderError> {
    let failed = |reason: String| RenderError::Expression {
        expr: expr.to_string(),
        reason,
    };
    let mut context: HashMapContext = HashMapContext::new();
    for (idx, (header, value)) in record.columns().iter().zip(record.values()).enumerate() {
        let bound = value_to_evalexpr(value);
        context
            .set_value(normalize_column_name(header), bound.clone())
            .map_err(|err| failed(format!("binding column '{header}': {err}")))?;
        context
            .set_value(format!("c{idx}"), bound)
            .map_err(|err| failed(format!("binding column index {idx}: {err}")))?;
    }
    let result = eval_with_context(expr, &context).map_err(|err| failed(err.to_string()))?;
    Ok(match result {
        EvalValue::String(s) => Value::text(s),
        EvalValue::Int(i) => Value::Number(Decimal::from(i)),
        EvalValue::Float(f) => Decimal::try_from(f)
            .map(Value::Number)
            .unwrap_or_else(|_| Value::text(f.to_string())),
        EvalValue::Boolean(b) => Value::text(b.to_string()),
        EvalValue::Tuple(values) => Value::text(
            values
                .into_iter()
                .map(|v| v.to_string())
                .collect::<Vec<_>>()
                .join("|"),
        ),
        EvalValue::Empty => Value::Absent,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{group::group, table::Table};

    fn invoices() -> Table {
        Table::from_strings(
            "RINV",
            &[
                "Customer",
                "Tax Status",
                "Quantity",
                "Unit Price",
                "Created Date",
                "First Name",
                "Last Name",
            ],
            &[
                vec!["c1", "Within Germany", "2", "10,50", "2024-05-06", "Jane", "Doe"],
                vec!["c1", "Within Germany", "1", "4", "2024-05-06", "Jane", "Doe"],
                vec!["c2", "EU", "3", "1.000,00", "not a date", "", "Roe"],
                vec!["c3", "", "", "7", "", "", ""],
            ],
        )
        .unwrap()
    }

    fn context() -> DeriveContext {
        let mut ctx = DeriveContext::new(NaiveDate::from_ymd_opt(2024, 6, 30).unwrap());
        ctx.amount = Some(AmountSource::Product {
            quantity: "Quantity".into(),
            unit_price: "Unit Price".into(),
        });
        ctx.tax = Some(TaxRule {
            column: "Tax Status".into(),
            taxable: vec!["within germany".into()],
            rate_percent: Decimal::new(19, 0),
            label: default_tax_label(),
        });
        ctx
    }

    #[test]
    fn subtotal_tax_and_total() {
        let table = invoices();
        let grouping = group(&table, "Customer", KeyPolicy::Collapse).unwrap();
        let ctx = context();
        let germany = &grouping.groups[0];
        assert_eq!(ctx.subtotal(germany).unwrap(), Decimal::new(25, 0));
        assert_eq!(ctx.tax_amount(germany).unwrap(), Decimal::new(475, 2));
        assert_eq!(ctx.tax_label(&germany.first()), "VAT 19%");
        assert_eq!(
            ctx.evaluate(&ComputedField::Total, germany, "RE-1").unwrap(),
            Some(Value::Number(Decimal::new(2975, 2)))
        );

        let abroad = &grouping.groups[1];
        assert_eq!(ctx.subtotal(abroad).unwrap(), Decimal::new(3000, 0));
        assert_eq!(ctx.tax_amount(abroad).unwrap(), Decimal::ZERO);
        assert_eq!(ctx.tax_label(&abroad.first()), "VAT 0%");

        // missing quantity counts as zero
        assert_eq!(ctx.subtotal(&grouping.groups[2]).unwrap(), Decimal::ZERO);
    }

    #[test]
    fn unparseable_amount_is_an_error() {
        let table =
            Table::from_strings("t", &["k", "Amount"], &[vec!["a", "twelve"]]).unwrap();
        let grouping = group(&table, "k", KeyPolicy::Collapse).unwrap();
        let mut ctx = context();
        ctx.amount = Some(AmountSource::Column {
            column: "Amount".into(),
        });
        assert!(matches!(
            ctx.subtotal(&grouping.groups[0]),
            Err(RenderError::InvalidAmount { .. })
        ));
    }

    #[test]
    fn month_name_and_invalid_dates() {
        let table = invoices();
        let grouping = group(&table, "Customer", KeyPolicy::Collapse).unwrap();
        let ctx = context();
        let field = ComputedField::MonthName {
            column: "Created Date".into(),
        };
        assert_eq!(
            ctx.evaluate(&field, &grouping.groups[0], "x").unwrap(),
            Some(Value::text("May"))
        );
        assert_eq!(
            ctx.evaluate(&field, &grouping.groups[1], "x").unwrap(),
            Some(Value::text(INVALID_DATE))
        );
        assert_eq!(ctx.evaluate(&field, &grouping.groups[2], "x").unwrap(), None);
    }

    #[test]
    fn today_identifier_and_concat() {
        let table = invoices();
        let grouping = group(&table, "Customer", KeyPolicy::Collapse).unwrap();
        let ctx = context();
        let first = &grouping.groups[0];
        assert_eq!(
            ctx.evaluate(&ComputedField::Today { format: None }, first, "x")
                .unwrap(),
            Some(Value::text("2024-06-30"))
        );
        assert_eq!(
            ctx.evaluate(
                &ComputedField::Today {
                    format: Some("%d.%m.%Y".into())
                },
                first,
                "x"
            )
            .unwrap(),
            Some(Value::text("30.06.2024"))
        );
        assert_eq!(
            ctx.evaluate(&ComputedField::Identifier, first, "CN-001405")
                .unwrap(),
            Some(Value::text("CN-001405"))
        );
        let name = ComputedField::Concat {
            columns: vec!["First Name".into(), "Last Name".into()],
            separator: " ".into(),
        };
        assert_eq!(
            ctx.evaluate(&name, first, "x").unwrap(),
            Some(Value::text("Jane Doe"))
        );
        assert_eq!(
            ctx.evaluate(&name, &grouping.groups[1], "x").unwrap(),
            Some(Value::text("Roe"))
        );
        assert_eq!(ctx.evaluate(&name, &grouping.groups[2], "x").unwrap(), None);
    }

    #[test]
    fn expressions_see_canonical_column_names() {
        let table = Table::from_strings(
            "t",
            &["Quantity", "Unit Price"],
            &[vec!["3", "4"]],
        )
        .unwrap();
        let record = table.record(0);
        assert_eq!(
            evaluate_expression(&record, "quantity * unit_price").unwrap(),
            Value::Number(Decimal::new(12, 0))
        );
        assert_eq!(
            evaluate_expression(&record, "c0 + c1").unwrap(),
            Value::Number(Decimal::new(7, 0))
        );
        assert!(matches!(
            evaluate_expression(&record, "missing + 1"),
            Err(RenderError::Expression { .. })
        ));
    }
}
