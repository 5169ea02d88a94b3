// Result corpus: finding run logs, reading run parameters out of their
// names, loading their rows and merging everything into one table.

use std::fs::{self, File};
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use log::{debug, info};
use rayon::prelude::*;

use crate::wn_error::{AnalysisError, Result};
use crate::wn_interface::{EventRecord, ParamValue, RunParams};
use crate::wn_table::EventTable;

/// Suffix of the simulator's per-run logs
pub const DEFAULT_SUFFIX: &str = ".csv";

/// Fields encoded in a run file name, in order: `<prefix>_<lambda>_<seed>.csv`
pub const RUN_FIELDS: [&str; 3] = ["prefix", "lambda", "seed"];

/// Columns a run log must provide (any order, extra columns are ignored)
pub const REQUIRED_COLUMNS: [&str; 5] = ["time", "src", "dst", "size", "event"];

/// One parsed file name: field name -> typed value, in field order
pub type ParamRow = IndexMap<String, ParamValue>;

// ============================================================================
// Locating run files
// ============================================================================

/// List the entries of `dir` whose name ends with `suffix`.
///
/// The suffix is matched literally. Subdirectories are neither descended into
/// nor returned. Paths come back sorted so runs load in a stable order.
pub fn locate_files(dir: &Path, suffix: &str) -> Result<Vec<PathBuf>> {
    let entries = fs::read_dir(dir).map_err(|e| AnalysisError::io(dir, e))?;

    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| AnalysisError::io(dir, e))?;
        let file_type = entry.file_type().map_err(|e| AnalysisError::io(&entry.path(), e))?;
        if file_type.is_dir() {
            continue;
        }
        if entry.file_name().to_string_lossy().ends_with(suffix) {
            files.push(entry.path());
        }
    }

    files.sort();
    Ok(files)
}

// ============================================================================
// Parameters from file names
// ============================================================================

/// Bind the `_`-separated tokens of a file name to `fields`.
///
/// The run log `suffix` (normally `.csv`) is stripped first. Tokens past `fields.len()` are
/// ignored; fewer tokens than fields is an error. Each value is numeric iff
/// its token is all digits.
pub fn extract_params(path: &Path, fields: &[&str], suffix: &str) -> Result<ParamRow> {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let stem = name.strip_suffix(suffix).unwrap_or(&name);
    let tokens: Vec<&str> = stem.split('_').collect();

    if tokens.len() < fields.len() {
        return Err(AnalysisError::MalformedFileName {
            path: path.to_path_buf(),
            expected: fields.len(),
            found: tokens.len(),
        });
    }

    let mut row = ParamRow::with_capacity(fields.len());
    for (field, token) in fields.iter().zip(tokens) {
        let value = ParamValue::classify(token).ok_or_else(|| AnalysisError::ParamOverflow {
            path: path.to_path_buf(),
            field: field.to_string(),
            token: token.to_string(),
        })?;
        row.insert(field.to_string(), value);
    }
    Ok(row)
}

impl RunParams {
    /// Parse `<prefix>_<lambda>_<seed><suffix>`
    pub fn from_path(path: &Path, suffix: &str) -> Result<Self> {
        let mut row = extract_params(path, &RUN_FIELDS, suffix)?;
        let mut take = |field: &str| {
            row.swap_remove(field).ok_or_else(|| AnalysisError::MalformedFileName {
                path: path.to_path_buf(),
                expected: RUN_FIELDS.len(),
                found: 0,
            })
        };
        Ok(Self {
            prefix: take("prefix")?,
            lambda: take("lambda")?,
            seed: take("seed")?,
        })
    }
}

// ============================================================================
// Loading rows
// ============================================================================

/// Read all event rows of one run log.
///
/// A missing column, a value of the wrong type or an unknown event code is a
/// schema error naming the file.
pub fn load_events(path: &Path) -> Result<Vec<EventRecord>> {
    let file = File::open(path).map_err(|e| AnalysisError::io(path, e))?;
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(file);

    let headers = reader
        .headers()
        .map_err(|e| AnalysisError::schema(path, e.to_string()))?
        .clone();
    for column in REQUIRED_COLUMNS {
        if !headers.iter().any(|h| h == column) {
            return Err(AnalysisError::schema(
                path,
                format!("missing column `{}`", column),
            ));
        }
    }

    reader
        .deserialize::<EventRecord>()
        .map(|record| record.map_err(|e| AnalysisError::schema(path, e.to_string())))
        .collect()
}

/// Load one run log and join its file-name parameters onto every row
pub fn load_run(path: &Path, suffix: &str) -> Result<EventTable> {
    let params = RunParams::from_path(path, suffix)?;
    let records = load_events(path)?;
    debug!(
        "{}: prefix={} lambda={} seed={} rows={}",
        path.display(),
        params.prefix,
        params.lambda,
        params.seed,
        records.len()
    );
    Ok(EventTable::from_run(params, records))
}

// ============================================================================
// Merging
// ============================================================================

/// Load every run log of every folder into one table.
///
/// Files of a folder are parsed in parallel. Each later file's rows end up
/// in front of the earlier ones; nothing downstream depends on row order.
/// The first file that fails to parse aborts the merge.
pub fn merge_folders<P: AsRef<Path>>(folders: &[P], suffix: &str) -> Result<EventTable> {
    let mut parts: Vec<EventTable> = Vec::new();

    for folder in folders {
        let folder = folder.as_ref();
        let files = locate_files(folder, suffix)?;
        info!("{}: {} run file(s)", folder.display(), files.len());

        let loaded: Vec<EventTable> = files
            .par_iter()
            .map(|path| load_run(path, suffix))
            .collect::<Result<_>>()?;
        parts.extend(loaded);
    }

    let mut merged = EventTable::new();
    for part in parts.into_iter().rev() {
        merged.append(part);
    }
    info!(
        "merged {} run(s), {} row(s)",
        merged.run_count(),
        merged.len()
    );
    Ok(merged)
}
