use serde_json::Value;
use std::fmt::Write;
use tabled::{builder::Builder, Table};

use super::{Report, Section};

/// Print every section of a response as a titled table.
pub fn print_table(value: &Value) {
    print!("{}", render_table(value));
}

pub fn render_table(value: &Value) -> String {
    let report = Report::from_response(value);
    let mut out = String::new();
    for section in report.sections() {
        let title = section.title;
        let _ = writeln!(out, "{title}\n{}\n", section_table(section));
    }

    if !report.warnings.is_empty() {
        out.push_str("Warnings:\n");
        for w in &report.warnings {
            let _ = writeln!(out, "  - {w}");
        }
        out.push('\n');
    }
    if let Some(meth) = report.methodology {
        let _ = writeln!(out, "Methodology: {meth}");
    }
    if !report.omitted.is_empty() {
        let _ = writeln!(
            out,
            "Omitted (see --output json): {}",
            report.omitted.join(", ")
        );
    }
    out
}

fn section_table(section: Section) -> Table {
    let mut builder = Builder::default();
    builder.push_record(section.header);
    for row in section.rows {
        builder.push_record(row);
    }
    Table::from(builder)
}
