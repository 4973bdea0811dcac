//! Tabular export: one row per (target, strategy).

use std::borrow::Cow;
use std::fmt::Write;

use serde::Serialize;

use crate::catalog::{Catalog, OutcomeRow};
use crate::error::CompareError;

pub const CSV_HEADER: [&str; 9] = [
  "target",
  "strategy",
  "found_bug",
  "schedules_to_first_bug",
  "total_schedules",
  "total_buggy",
  "schedule_budget",
  "predicted_to_bug",
  "complete",
];

/// Rows as a JSON array.
pub fn to_json(catalog: &Catalog) -> Result<String, CompareError> {
  let rows: Vec<&OutcomeRow> = catalog.rows().collect();
  Ok(serde_json::to_string_pretty(&rows)?)
}

/// Any serializable report as pretty JSON.
pub fn report_json<T: Serialize>(report: &T) -> Result<String, CompareError> {
  Ok(serde_json::to_string_pretty(report)?)
}

/// Rows as CSV with a header line. Missing values are empty fields.
pub fn to_csv(catalog: &Catalog) -> String {
  let mut out = CSV_HEADER.join(",");
  out.push('\n');

  for row in catalog.rows() {
    let fields = [
      field(row.target.as_str()),
      field(&row.strategy),
      Cow::Owned(row.found_bug.to_string()),
      optional(row.schedules_to_first_bug),
      Cow::Owned(row.total_schedules.to_string()),
      Cow::Owned(row.total_buggy.to_string()),
      Cow::Owned(row.schedule_budget.to_string()),
      optional(row.predicted_to_bug),
      Cow::Owned(row.complete.to_string()),
    ];
    let _ = writeln!(out, "{}", fields.join(","));
  }
  out
}

fn optional<T: ToString>(value: Option<T>) -> Cow<'static, str> {
  value.map_or(Cow::Borrowed(""), |v| Cow::Owned(v.to_string()))
}

/// Quote a field when it holds a separator, a quote or a line break.
fn field(value: &str) -> Cow<'_, str> {
  if value.contains([',', '"', '\n', '\r']) {
    Cow::Owned(format!("\"{}\"", value.replace('"', "\"\"")))
  } else {
    Cow::Borrowed(value)
  }
}
