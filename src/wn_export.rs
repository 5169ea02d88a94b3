// ============================================================================
// Summary Export
// ============================================================================
//
// One CSV per (prefix, metric): `<out>/<prefix>_<metric>.csv` with columns
// `prefix,lambda,<src|dst>,<metric>,ol`. The node column is left out for
// tables grouped by lambda only. Undefined values are written as `NaN`.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use log::info;

use crate::wn_error::{AnalysisError, Result};
use crate::wn_metrics::{MetricsSummary, SummaryTable};

/// Label used in file names and the prefix column when no prefix was selected
pub const ALL_PREFIXES: &str = "all";

fn prefix_label(table: &SummaryTable) -> String {
    table
        .prefix
        .as_ref()
        .map_or_else(|| ALL_PREFIXES.to_string(), |p| p.to_string())
}

fn format_value(value: f64) -> String {
    if value.is_nan() {
        "NaN".to_string()
    } else {
        value.to_string()
    }
}

/// File name of a table inside the output folder
pub fn table_file_name(table: &SummaryTable) -> String {
    format!("{}_{}.csv", prefix_label(table), table.metric.name())
}

/// Write one summary table as CSV
pub fn write_table<W: Write>(table: &SummaryTable, writer: W) -> csv::Result<()> {
    let mut out = csv::Writer::from_writer(writer);

    let mut header = vec!["prefix", "lambda"];
    if let Some(column) = table.node_column {
        header.push(column.name());
    }
    header.push(table.metric.name());
    header.push("ol");
    out.write_record(&header)?;

    let prefix = prefix_label(table);
    for row in &table.rows {
        let mut record = vec![prefix.clone(), row.lambda.to_string()];
        if table.node_column.is_some() {
            record.push(row.node.map_or_else(String::new, |n| n.to_string()));
        }
        record.push(format_value(row.value));
        record.push(format_value(row.ol));
        out.write_record(&record)?;
    }
    out.flush()?;
    Ok(())
}

/// Write every table of `summary` into `out_dir`, creating it if needed.
/// Returns the written paths.
pub fn export_summary(summary: &MetricsSummary, out_dir: &Path) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(out_dir).map_err(|e| AnalysisError::io(out_dir, e))?;

    let mut written = Vec::new();
    for table in summary.tables() {
        let path = out_dir.join(table_file_name(table));
        let file = fs::File::create(&path).map_err(|e| AnalysisError::io(&path, e))?;
        write_table(table, file).map_err(|e| AnalysisError::io(&path, e.into()))?;
        written.push(path);
    }
    info!(
        "wrote {} table(s) for [{}] to {}",
        written.len(),
        summary
            .prefix
            .as_ref()
            .map_or_else(|| ALL_PREFIXES.to_string(), |p| p.to_string()),
        out_dir.display()
    );
    Ok(written)
}
