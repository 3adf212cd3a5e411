//! Rendering of valuation responses.
//!
//! A response is split into sections before rendering: headline scalars,
//! per-date series (one row per time index, with the date in years when
//! `dt` is known), the exercise boundary (one row per exercise date) and
//! sweep scenarios (one row per level). Per-path traces are left to the
//! JSON output.
pub mod csv_out;
pub mod minimal;
pub mod table;

use crate::OutputFormat;
use serde_json::{Map, Value};

/// Keys holding per-path payloads that only the JSON output carries.
const BULK_KEYS: [&str; 2] = ["traces", "state_variables"];

/// Lifecycle order of the state-proportion columns.
const STATES: [&str; 4] = ["uninvested", "operating", "suspended", "abandoned"];

/// Columns placed first in row-per-object sections when present.
const LEADING_COLUMNS: [&str; 4] = ["time_index", "time", "strike", "capex"];

/// Dispatch output to the appropriate formatter.
pub fn format_output(format: &OutputFormat, value: &Value) {
    match format {
        OutputFormat::Json => match serde_json::to_string_pretty(value) {
            Ok(s) => println!("{s}"),
            Err(e) => eprintln!("JSON serialization error: {e}"),
        },
        OutputFormat::Table => table::print_table(value),
        OutputFormat::Csv => csv_out::print_csv(value),
        OutputFormat::Minimal => minimal::print_minimal(value),
    }
}

/// One rectangular block of a rendered response.
#[derive(Debug, Clone, PartialEq)]
pub struct Section {
    pub title: &'static str,
    pub header: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

/// A response split into renderable parts.
#[derive(Debug, Default)]
pub struct Report<'a> {
    pub scalars: Vec<(&'a str, &'a Value)>,
    /// Columns indexed by time index, starting at `t = 0`.
    pub series: Vec<(&'a str, &'a [Value])>,
    pub boundary: &'a [Value],
    pub scenarios: &'a [Value],
    pub dt: Option<f64>,
    pub warnings: Vec<&'a str>,
    pub methodology: Option<&'a str>,
    /// Fields not rendered outside JSON.
    pub omitted: Vec<&'a str>,
}

impl<'a> Report<'a> {
    pub fn from_response(response: &'a Value) -> Self {
        let mut report = Report {
            dt: response
                .pointer("/assumptions/dt")
                .or_else(|| response.get("dt"))
                .and_then(Value::as_f64),
            methodology: response.get("methodology").and_then(Value::as_str),
            warnings: response
                .get("warnings")
                .and_then(Value::as_array)
                .map(|w| w.iter().filter_map(Value::as_str).collect())
                .unwrap_or_default(),
            ..Report::default()
        };
        match response.get("result").unwrap_or(response) {
            Value::Object(map) => report.classify(map),
            other => report.scalars.push(("value", other)),
        }
        report
    }

    fn classify(&mut self, map: &'a Map<String, Value>) {
        for (key, val) in map {
            let key = key.as_str();
            match val {
                Value::Array(points) if key == "exercise_boundary" => self.boundary = points.as_slice(),
                Value::Array(rows) if key == "results" => self.scenarios = rows.as_slice(),
                Value::Object(states) if key == "state_proportions" => {
                    for state in STATES {
                        if let Some(Value::Array(shares)) = states.get(state) {
                            self.series.push((state, shares.as_slice()));
                        }
                    }
                }
                Value::Array(items)
                    if !BULK_KEYS.contains(&key) && items.iter().all(Value::is_number) =>
                {
                    self.series.push((key, items.as_slice()))
                }
                Value::Array(_) | Value::Object(_) => self.omitted.push(key),
                _ => self.scalars.push((key, val)),
            }
        }
    }

    /// Non-empty sections in display order.
    pub fn sections(&self) -> Vec<Section> {
        let mut out = Vec::new();
        if !self.scalars.is_empty() {
            out.push(Section {
                title: "Results",
                header: vec!["field".into(), "value".into()],
                rows: self
                    .scalars
                    .iter()
                    .map(|(k, v)| vec![k.to_string(), cell(v)])
                    .collect(),
            });
        }
        out.extend(self.series_section());
        out.extend(object_section("Exercise boundary", self.boundary));
        out.extend(object_section("Scenarios", self.scenarios));
        out
    }

    fn series_section(&self) -> Option<Section> {
        let len = self.series.iter().map(|(_, v)| v.len()).max()?;
        let mut header = vec!["time_index".to_string()];
        if self.dt.is_some() {
            header.push("time".into());
        }
        header.extend(self.series.iter().map(|(name, _)| name.to_string()));

        let rows = (0..len)
            .map(|t| {
                let mut row = vec![t.to_string()];
                if let Some(dt) = self.dt {
                    row.push(format_time(t as f64 * dt));
                }
                row.extend(
                    self.series
                        .iter()
                        .map(|(_, v)| v.get(t).map(cell).unwrap_or_default()),
                );
                row
            })
            .collect();
        Some(Section {
            title: "Per-date series",
            header,
            rows,
        })
    }
}

/// One row per object, columns taken from the first object's keys.
fn object_section(title: &'static str, items: &[Value]) -> Option<Section> {
    let first = items.first()?.as_object()?;
    let mut header: Vec<String> = LEADING_COLUMNS
        .iter()
        .filter(|c| first.contains_key(**c))
        .map(|c| c.to_string())
        .collect();
    header.extend(
        first
            .keys()
            .filter(|k| !LEADING_COLUMNS.contains(&k.as_str()))
            .cloned(),
    );
    let rows = items
        .iter()
        .filter_map(Value::as_object)
        .map(|obj| {
            header
                .iter()
                .map(|h| obj.get(h).map(cell).unwrap_or_default())
                .collect()
        })
        .collect();
    Some(Section {
        title,
        header,
        rows,
    })
}

/// Text of one table or CSV cell; null renders empty.
pub fn cell(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Dates in years, without float noise from `t * dt`.
fn format_time(years: f64) -> String {
    let s = format!("{years:.10}");
    s.trim_end_matches('0').trim_end_matches('.').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    pub(crate) fn american_response() -> Value {
        json!({
            "result": {
                "value": 4.47,
                "standard_error": 0.02,
                "expected_exercise_time": null,
                "cumulative_exercise_probability": [0.0, 0.25, 0.5, 0.75],
                "exercise_boundary": [
                    {"time_index": 1, "time": 0.1, "eligible_paths": 40, "exercised_paths": 10, "critical_value": 36.5},
                    {"time_index": 2, "time": 0.2, "eligible_paths": 38, "exercised_paths": 0, "critical_value": null}
                ],
                "degenerate_regressions": 0,
                "traces": {"exercise_flags": [[false]]}
            },
            "methodology": "Least-Squares Monte Carlo",
            "assumptions": {"dt": 0.1},
            "warnings": ["No path finished in the money"],
            "metadata": {"computation_time_us": 12}
        })
    }

    #[test]
    fn test_american_response_sections() {
        let response = american_response();
        let report = Report::from_response(&response);
        assert_eq!(report.dt, Some(0.1));
        assert_eq!(report.omitted, vec!["traces"]);
        assert_eq!(report.warnings.len(), 1);

        let sections = report.sections();
        let titles: Vec<_> = sections.iter().map(|s| s.title).collect();
        assert_eq!(titles, vec!["Results", "Per-date series", "Exercise boundary"]);

        let series = &sections[1];
        assert_eq!(
            series.header,
            vec!["time_index", "time", "cumulative_exercise_probability"]
        );
        assert_eq!(series.rows.len(), 4);
        assert_eq!(series.rows[3], vec!["3", "0.3", "0.75"]);

        let boundary = &sections[2];
        assert_eq!(
            boundary.header,
            vec!["time_index", "time", "critical_value", "eligible_paths", "exercised_paths"]
        );
        assert_eq!(boundary.rows.len(), 2);
        assert_eq!(boundary.rows[0], vec!["1", "0.1", "36.5", "40", "10"]);
        assert_eq!(boundary.rows[1][2], "");
    }

    #[test]
    fn test_state_proportions_become_columns() {
        let response = json!({
            "result": {
                "rov": 12.0,
                "cumulative_investment_probability": [0.0, 0.5, 1.0],
                "state_proportions": {
                    "uninvested": [1.0, 0.5, 0.0],
                    "operating": [0.0, 0.5, 0.75],
                    "suspended": [0.0, 0.0, 0.25],
                    "abandoned": [0.0, 0.0, 0.0]
                }
            }
        });
        let report = Report::from_response(&response);
        assert_eq!(report.dt, None);
        let sections = report.sections();
        let series = &sections[1];
        assert_eq!(
            series.header,
            vec![
                "time_index",
                "cumulative_investment_probability",
                "uninvested",
                "operating",
                "suspended",
                "abandoned"
            ]
        );
        assert_eq!(series.rows[2], vec!["2", "1.0", "0.0", "0.75", "0.25", "0.0"]);
    }

    #[test]
    fn test_sweep_rows_per_level() {
        let response = json!({
            "sweep": "strike",
            "range": "36:40:2",
            "results": [
                {"strike": 36.0, "value": 1.2},
                {"strike": 38.0, "value": 2.3},
                {"strike": 40.0, "value": 3.5}
            ]
        });
        let sections = Report::from_response(&response).sections();
        assert_eq!(sections.len(), 2);
        assert_eq!(sections[1].title, "Scenarios");
        assert_eq!(sections[1].header, vec!["strike", "value"]);
        assert_eq!(sections[1].rows.len(), 3);
    }

    #[test]
    fn test_simulated_paths_are_omitted() {
        let response = json!({"dt": 0.25, "state_variables": [[1.0, 1.0], [1.1, 0.9]]});
        let report = Report::from_response(&response);
        assert_eq!(report.omitted, vec!["state_variables"]);
        assert!(report.series.is_empty());
        assert_eq!(report.scalars.len(), 1);
    }

    #[test]
    fn test_format_time_drops_float_noise() {
        assert_eq!(format_time(3.0 * 0.1), "0.3");
        assert_eq!(format_time(0.0), "0");
        assert_eq!(format_time(10.0), "10");
    }
}
