//! # wn-analysis - Offline analysis of ALOHA simulator logs
//!
//! The wireless network simulator writes one CSV event log per run, named
//! `<prefix>_<lambda>_<seed>.csv` (`prefix` is the protocol/channel variant,
//! `lambda` the arrival rate, `seed` the random seed). This crate merges a
//! folder of such logs into one table, caches it, and computes per-rate,
//! per-node performance metrics from it.
//!
//! ## Core Components
//!
//! - **Corpus** (`wn_corpus`): locate run logs, parse run parameters from file
//!   names, load and merge them
//! - **EventTable** (`wn_table`): the merged table, every row tagged with its run
//! - **CorpusCache** (`wn_cache`): CBOR cache of the merged table with explicit
//!   force-refresh
//! - **MetricsEngine** (`wn_metrics`): offered load, drop rate, collision rate,
//!   throughput, channel loss and queue length as grouped reductions
//! - **Export** (`wn_export`): one CSV per prefix and metric
//!
//! ```no_run
//! use wn_analysis::{CorpusCache, EngineParams, MetricsEngine};
//! use wn_analysis::wn_cache::default_cache_path;
//! use std::path::Path;
//!
//! let folder = Path::new("results");
//! let table = CorpusCache::new(default_cache_path(folder))
//!     .load_or_merge(&[folder])
//!     .unwrap();
//!
//! for prefix in table.prefixes() {
//!     let engine = MetricsEngine::for_prefix(&table, EngineParams::default(), Some(&prefix));
//!     let drop_rate = engine.drop_rate();
//!     println!("{}: {} group(s)", prefix, drop_rate.len());
//! }
//! ```
//!
//! The `analyze_results` binary in `analyzer/` wires these together with a
//! YAML config (`wn_config`) and a command line.

// Data model
pub mod wn_error;
pub mod wn_interface;
pub mod wn_table;

// Loading and caching
pub mod wn_cache;
pub mod wn_corpus;

// Analysis
pub mod wn_config;
pub mod wn_export;
pub mod wn_metrics;

// Re-export commonly used types
pub use wn_cache::CorpusCache;
pub use wn_config::{AnalysisConfig, SimulationParams};
pub use wn_corpus::{extract_params, load_run, locate_files, merge_folders};
pub use wn_error::{AnalysisError, Result};
pub use wn_export::{export_summary, write_table};
pub use wn_interface::{EventRecord, EventSet, NodeId, PacketEvent, ParamValue, RunParams, SimTime};
pub use wn_metrics::{
    summarize_by_prefix, EngineParams, Metric, MetricsEngine, MetricsSummary, NodeColumn,
    SummaryRow, SummaryTable,
};
pub use wn_table::{EventTable, Row};
