// Merged-corpus cache
//
// Parsing thousands of run logs is the slow part of an analysis, so the merged
// table is stored next to the results as `alld.cbor`. Once the file exists it
// is trusted for the folder-set it was built from: nothing compares it against
// the CSV files themselves. Delete it, or ask for a forced refresh, after the
// logs change. A request for a different folder-set rebuilds it.
//
// File layout (CBOR, ciborium):
// - version: format version, bumped on layout changes
// - folders: folders the table was merged from
// - row_count: number of rows
// - digest: blake3 of the column data, detects truncated or damaged files
// - runs + columns: the table itself, stored column-wise

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::wn_corpus::{merge_folders, DEFAULT_SUFFIX};
use crate::wn_error::{AnalysisError, Result};
use crate::wn_interface::{EventRecord, NodeId, PacketEvent, RunParams, SimTime};
use crate::wn_table::{EventTable, TableRow};

/// Cache file name inside a result folder
pub const CACHE_FILE_NAME: &str = "alld.cbor";

const CACHE_VERSION: u32 = 1;

/// Default cache location for a result folder
pub fn default_cache_path(result_folder: &Path) -> PathBuf {
    result_folder.join(CACHE_FILE_NAME)
}

fn folder_names<P: AsRef<Path>>(folders: &[P]) -> Vec<String> {
    folders
        .iter()
        .map(|f| f.as_ref().display().to_string())
        .collect()
}

// ============================================================================
// Stored layout
// ============================================================================

#[derive(Debug, Default, Serialize, Deserialize)]
struct Columns {
    run: Vec<u32>,
    time: Vec<SimTime>,
    src: Vec<NodeId>,
    dst: Vec<NodeId>,
    size: Vec<u32>,
    event: Vec<PacketEvent>,
}

impl Columns {
    fn from_table(table: &EventTable) -> Self {
        let rows = table.raw_rows();
        let mut columns = Columns {
            run: Vec::with_capacity(rows.len()),
            time: Vec::with_capacity(rows.len()),
            src: Vec::with_capacity(rows.len()),
            dst: Vec::with_capacity(rows.len()),
            size: Vec::with_capacity(rows.len()),
            event: Vec::with_capacity(rows.len()),
        };
        for row in rows {
            columns.run.push(row.run);
            columns.time.push(row.record.time);
            columns.src.push(row.record.src);
            columns.dst.push(row.record.dst);
            columns.size.push(row.record.size);
            columns.event.push(row.record.event);
        }
        columns
    }

    fn len(&self) -> Option<usize> {
        let len = self.run.len();
        let same = [
            self.time.len(),
            self.src.len(),
            self.dst.len(),
            self.size.len(),
            self.event.len(),
        ]
        .iter()
        .all(|l| *l == len);
        same.then_some(len)
    }

    fn into_rows(self) -> Vec<TableRow> {
        let mut rows = Vec::with_capacity(self.run.len());
        for i in 0..self.run.len() {
            rows.push(TableRow {
                run: self.run[i],
                record: EventRecord {
                    time: self.time[i],
                    src: self.src[i],
                    dst: self.dst[i],
                    size: self.size[i],
                    event: self.event[i],
                },
            });
        }
        rows
    }

    fn digest(&self, runs: &[RunParams]) -> String {
        let mut hasher = blake3::Hasher::new();
        for run in runs {
            for value in [&run.prefix, &run.lambda, &run.seed] {
                hasher.update(value.to_string().as_bytes());
                hasher.update(&[0]);
            }
        }
        for i in 0..self.run.len() {
            hasher.update(&self.run[i].to_le_bytes());
            hasher.update(&self.time[i].to_le_bytes());
            hasher.update(&self.src[i].to_le_bytes());
            hasher.update(&self.dst[i].to_le_bytes());
            hasher.update(&self.size[i].to_le_bytes());
            hasher.update(&[self.event[i].code()]);
        }
        hasher.finalize().to_hex().to_string()
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct CacheFile {
    version: u32,
    folders: Vec<String>,
    row_count: u64,
    digest: String,
    runs: Vec<RunParams>,
    columns: Columns,
}

// ============================================================================
// Cache
// ============================================================================

/// Merge-or-reuse front end for a result folder-set.
///
/// ```no_run
/// use std::path::Path;
/// use wn_analysis::wn_cache::{default_cache_path, CorpusCache};
///
/// let folder = Path::new("results");
/// let cache = CorpusCache::new(default_cache_path(folder));
/// let table = cache.load_or_merge(&[folder]).unwrap();
/// ```
#[derive(Debug, Clone)]
pub struct CorpusCache {
    path: PathBuf,
    suffix: String,
    force_refresh: bool,
}

impl CorpusCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            suffix: DEFAULT_SUFFIX.to_string(),
            force_refresh: false,
        }
    }

    /// Ignore an existing cache file and rebuild it from the logs
    pub fn with_force_refresh(mut self, force_refresh: bool) -> Self {
        self.force_refresh = force_refresh;
        self
    }

    pub fn with_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.suffix = suffix.into();
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// Return the cached table if there is one for this folder-set,
    /// otherwise merge `folders` and write the cache.
    pub fn load_or_merge<P: AsRef<Path>>(&self, folders: &[P]) -> Result<EventTable> {
        if self.exists() {
            if self.force_refresh {
                info!("forced refresh, rebuilding {}", self.path.display());
            } else {
                let (cached_folders, table) = self.read()?;
                let requested = folder_names(folders);
                if cached_folders == requested {
                    warn!(
                        "using cached corpus {} (delete it or force a refresh after logs change)",
                        self.path.display()
                    );
                    return Ok(table);
                }
                info!(
                    "{} was built from [{}], rebuilding for [{}]",
                    self.path.display(),
                    cached_folders.join(", "),
                    requested.join(", ")
                );
            }
        }

        let table = merge_folders(folders, &self.suffix)?;
        self.store(&table, folders)?;
        Ok(table)
    }

    /// Read the cache file
    pub fn load(&self) -> Result<EventTable> {
        self.read().map(|(_, table)| table)
    }

    /// Folder-set and table stored in the cache file
    fn read(&self) -> Result<(Vec<String>, EventTable)> {
        let file = File::open(&self.path).map_err(|e| AnalysisError::io(&self.path, e))?;
        let cached: CacheFile = ciborium::de::from_reader(BufReader::new(file)).map_err(|e| {
            AnalysisError::CacheDecode {
                path: self.path.clone(),
                reason: e.to_string(),
            }
        })?;

        if cached.version != CACHE_VERSION {
            return Err(self.corrupt(format!(
                "format version {} (expected {})",
                cached.version, CACHE_VERSION
            )));
        }
        let len = cached
            .columns
            .len()
            .ok_or_else(|| self.corrupt("column lengths differ"))?;
        if len as u64 != cached.row_count {
            return Err(self.corrupt(format!(
                "{} rows stored, header says {}",
                len, cached.row_count
            )));
        }
        if cached.columns.digest(&cached.runs) != cached.digest {
            return Err(self.corrupt("digest mismatch"));
        }

        let table = EventTable::from_raw(cached.runs, cached.columns.into_rows())
            .ok_or_else(|| self.corrupt("row refers to an unknown run"))?;
        info!(
            "loaded {} row(s) of {} run(s) from {}",
            table.len(),
            table.run_count(),
            self.path.display()
        );
        Ok((cached.folders, table))
    }

    /// Write `table` to the cache file, replacing any previous one.
    ///
    /// The data goes to a sibling temporary file first and is renamed into
    /// place, so an interrupted write never leaves a half-written cache.
    pub fn store<P: AsRef<Path>>(&self, table: &EventTable, folders: &[P]) -> Result<()> {
        let columns = Columns::from_table(table);
        let cached = CacheFile {
            version: CACHE_VERSION,
            folders: folder_names(folders),
            row_count: table.len() as u64,
            digest: columns.digest(table.runs()),
            runs: table.runs().to_vec(),
            columns,
        };

        let tmp_path = self.path.with_extension("cbor.tmp");
        let file = File::create(&tmp_path).map_err(|e| AnalysisError::io(&tmp_path, e))?;
        let mut writer = BufWriter::new(file);
        ciborium::ser::into_writer(&cached, &mut writer).map_err(|e| {
            AnalysisError::CacheEncode {
                path: self.path.clone(),
                reason: e.to_string(),
            }
        })?;
        writer.flush().map_err(|e| AnalysisError::io(&tmp_path, e))?;
        drop(writer);

        fs::rename(&tmp_path, &self.path).map_err(|e| AnalysisError::io(&self.path, e))?;
        info!(
            "cached {} row(s) to {}",
            table.len(),
            self.path.display()
        );
        Ok(())
    }

    fn corrupt(&self, reason: impl Into<String>) -> AnalysisError {
        AnalysisError::CacheCorrupt {
            path: self.path.clone(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wn_interface::ParamValue;
    use std::io::Write;
    use tempfile::TempDir;

    fn write_run(dir: &Path, name: &str, rows: &[&str]) {
        let mut file = File::create(dir.join(name)).unwrap();
        writeln!(file, "time,src,dst,event,size").unwrap();
        for row in rows {
            writeln!(file, "{}", row).unwrap();
        }
    }

    fn sample_folder() -> TempDir {
        let dir = TempDir::new().unwrap();
        write_run(
            dir.path(),
            "aloha_10_1.csv",
            &["0.100000,1,1,3,100", "0.200000,1,2,1,100", "0.300000,1,1,4,100"],
        );
        write_run(
            dir.path(),
            "aloha_20_1.csv",
            &["0.150000,2,2,3,200", "0.250000,2,1,2,200"],
        );
        write_run(dir.path(), "realistic_10_2.csv", &["1.500000,3,1,7,300"]);
        dir
    }

    #[test]
    fn test_cache_round_trip() {
        let dir = sample_folder();
        let cache = CorpusCache::new(default_cache_path(dir.path()));
        assert!(!cache.exists());

        let merged = cache.load_or_merge(&[dir.path()]).unwrap();
        assert!(cache.exists());
        assert_eq!(merged.len(), 6);

        let reloaded = cache.load().unwrap();
        assert_eq!(reloaded, merged);
        assert_eq!(reloaded.len(), merged.len());
        assert_eq!(reloaded.runs(), merged.runs());
    }

    #[test]
    fn test_existing_cache_is_trusted() {
        let dir = sample_folder();
        let cache = CorpusCache::new(default_cache_path(dir.path()));
        let first = cache.load_or_merge(&[dir.path()]).unwrap();

        // logs change after the cache was written
        write_run(dir.path(), "aloha_30_1.csv", &["0.1,5,5,3,100"]);

        let second = cache.load_or_merge(&[dir.path()]).unwrap();
        assert_eq!(second, first);
        assert_eq!(second.run_count(), 3);
    }

    #[test]
    fn test_force_refresh_rebuilds() {
        let dir = sample_folder();
        let cache = CorpusCache::new(default_cache_path(dir.path()));
        cache.load_or_merge(&[dir.path()]).unwrap();

        write_run(dir.path(), "aloha_30_1.csv", &["0.1,5,5,3,100"]);

        let refreshed = cache
            .clone()
            .with_force_refresh(true)
            .load_or_merge(&[dir.path()])
            .unwrap();
        assert_eq!(refreshed.run_count(), 4);

        // the rewritten cache holds the new run too
        assert_eq!(cache.load().unwrap().run_count(), 4);
    }

    #[test]
    fn test_other_folder_set_rebuilds() {
        let a = TempDir::new().unwrap();
        let b = TempDir::new().unwrap();
        write_run(a.path(), "aloha_10_1.csv", &["0.1,1,1,3,100"]);
        write_run(b.path(), "realistic_10_1.csv", &["0.2,2,2,3,100"]);

        let store = TempDir::new().unwrap();
        let cache = CorpusCache::new(default_cache_path(store.path()));

        let both = cache.load_or_merge(&[a.path(), b.path()]).unwrap();
        assert_eq!(both.run_count(), 2);

        let only_a = cache.load_or_merge(&[a.path()]).unwrap();
        assert_eq!(only_a.run_count(), 1);
        assert_eq!(
            only_a.prefixes(),
            vec![ParamValue::Text("aloha".to_string())]
        );

        // the cache now belongs to [a]
        assert_eq!(cache.load().unwrap(), only_a);
        assert_eq!(cache.load_or_merge(&[a.path()]).unwrap(), only_a);
    }

    #[test]
    fn test_cache_file_not_picked_up_as_run() {
        let dir = sample_folder();
        let cache = CorpusCache::new(default_cache_path(dir.path())).with_force_refresh(true);
        cache.load_or_merge(&[dir.path()]).unwrap();
        let again = cache.load_or_merge(&[dir.path()]).unwrap();
        assert_eq!(again.run_count(), 3);
    }

    #[test]
    fn test_truncated_cache_rejected() {
        let dir = sample_folder();
        let cache = CorpusCache::new(default_cache_path(dir.path()));
        cache.load_or_merge(&[dir.path()]).unwrap();

        let bytes = fs::read(cache.path()).unwrap();
        fs::write(cache.path(), &bytes[..bytes.len() / 2]).unwrap();

        assert!(matches!(
            cache.load(),
            Err(AnalysisError::CacheDecode { .. })
        ));
    }

    #[test]
    fn test_empty_corpus_cached() {
        let dir = TempDir::new().unwrap();
        let cache = CorpusCache::new(default_cache_path(dir.path()));
        let table = cache.load_or_merge(&[dir.path()]).unwrap();
        assert!(table.is_empty());
        assert!(cache.load().unwrap().is_empty());
    }
}
