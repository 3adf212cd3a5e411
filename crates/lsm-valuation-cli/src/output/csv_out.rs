use serde_json::Value;
use std::io::{self, Write};

use super::Report;

/// Write a response as CSV to stdout, one blank-line separated block per
/// section. Warnings follow as a final single-column block.
pub fn print_csv(value: &Value) {
    let stdout = io::stdout();
    if let Err(e) = write_csv(value, stdout.lock()) {
        eprintln!("CSV output error: {e}");
    }
}

pub fn write_csv<W: Write>(value: &Value, mut out: W) -> Result<(), csv::Error> {
    let report = Report::from_response(value);

    let mut blocks = report
        .sections()
        .into_iter()
        .map(|s| (s.header, s.rows))
        .collect::<Vec<_>>();
    if !report.warnings.is_empty() {
        blocks.push((
            vec!["warning".to_string()],
            report.warnings.iter().map(|w| vec![w.to_string()]).collect(),
        ));
    }

    for (i, (header, rows)) in blocks.iter().enumerate() {
        if i > 0 {
            out.write_all(b"\n")?;
        }
        let mut wtr = csv::WriterBuilder::new().flexible(true).from_writer(&mut out);
        wtr.write_record(header)?;
        for row in rows {
            wtr.write_record(row)?;
        }
        wtr.flush()?;
    }
    out.flush()?;
    Ok(())
}
