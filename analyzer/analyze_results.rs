// Result Analyzer - Summarize a folder of simulator event logs
//
// Usage:
//   cargo run --bin analyze_results results/
//   cargo run --bin analyze_results results/ --prefix aloha --coarse
//   cargo run --bin analyze_results --config analysis.yaml --force-refresh
//
// Merges every `<prefix>_<lambda>_<seed>.csv` of the folder(s) into one table
// (cached as `alld.cbor`), then writes one CSV per prefix and metric into the
// output folder.

use std::path::PathBuf;
use std::process;

use clap::Parser;
use log::{error, info, warn, LevelFilter};
use simple_logger::SimpleLogger;

use wn_analysis::wn_config::{AnalysisConfig, SimulationParams};
use wn_analysis::{
    export_summary, AnalysisError, CorpusCache, MetricsEngine, ParamValue, Result,
};

#[derive(Debug, Parser)]
#[command(name = "analyze_results", about = "Summarize ALOHA simulator result logs")]
struct Cli {
    /// Result folder (default: `results`, or the config's `result_folder`)
    result_folder: Option<PathBuf>,

    /// More result folders merged with the first one
    #[arg(long = "extra-folder")]
    extra_folders: Vec<PathBuf>,

    /// Analysis config (YAML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Cache file (default: `<result_folder>/alld.cbor`)
    #[arg(long)]
    cache: Option<PathBuf>,

    /// Rebuild the cache from the logs even if it exists
    #[arg(short, long)]
    force_refresh: bool,

    /// Group drop, collision and throughput by lambda only
    #[arg(long)]
    coarse: bool,

    /// Only analyze these prefixes (repeatable)
    #[arg(short, long = "prefix")]
    prefixes: Vec<String>,

    /// Output folder for the summary tables
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Simulator config (JSON) to read node count, data rate and packet size from
    #[arg(long)]
    simulation: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    /// Config file values overridden by the command line
    fn into_config(self) -> Result<AnalysisConfig> {
        let mut config = match &self.config {
            Some(path) => AnalysisConfig::from_yaml_file(path)?,
            None => AnalysisConfig::default(),
        };

        if let Some(folder) = self.result_folder {
            config.result_folder = folder;
        }
        config.extra_folders.extend(self.extra_folders);
        if self.cache.is_some() {
            config.cache_path = self.cache;
        }
        config.force_refresh |= self.force_refresh;
        config.coarse |= self.coarse;
        if !self.prefixes.is_empty() {
            config.prefixes = self.prefixes;
        }
        if self.output.is_some() {
            config.output_folder = self.output;
        }
        if self.simulation.is_some() {
            config.simulation_config = self.simulation;
        }
        if self.verbose {
            config.log_level = "debug".to_string();
        }
        Ok(config)
    }
}

fn main() {
    let cli = Cli::parse();

    let (config, level) = match load_config(cli) {
        Ok(loaded) => loaded,
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    };

    SimpleLogger::new().with_level(level).init().unwrap();

    if let Err(e) = run(&config) {
        error!("{}", e);
        process::exit(1);
    }
}

fn load_config(cli: Cli) -> Result<(AnalysisConfig, LevelFilter)> {
    let config = cli.into_config()?;
    config.validate()?;
    let level = config.log_level()?;
    Ok((config, level))
}

fn run(config: &AnalysisConfig) -> Result<()> {
    let simulation = match &config.simulation_config {
        Some(path) => Some(SimulationParams::from_json_file(
            path,
            &config.simulation_section,
        )?),
        None => None,
    };
    let params = config.engine_params(simulation.as_ref());
    info!(
        "nodes: {} packet size: {:.1}B data rate: {}b/s coarse: {}",
        params.n_nodes, params.packet_size, params.data_rate, params.coarse
    );

    let cache = CorpusCache::new(config.cache_path())
        .with_suffix(config.suffix.clone())
        .with_force_refresh(config.force_refresh);
    let table = cache.load_or_merge(&config.folders())?;

    if table.is_empty() {
        warn!(
            "no events found under {}",
            config.result_folder.display()
        );
        return Ok(());
    }

    let prefixes = if config.prefixes.is_empty() {
        table.prefixes()
    } else {
        config
            .prefixes
            .iter()
            .map(|p| {
                ParamValue::classify(p).ok_or_else(|| {
                    AnalysisError::config(&config.result_folder, format!("bad prefix `{}`", p))
                })
            })
            .collect::<Result<Vec<_>>>()?
    };

    let out_dir = config.output_folder();
    for prefix in &prefixes {
        let engine = MetricsEngine::for_prefix(&table, params.clone(), Some(prefix));
        let summary = engine.summarize();
        if summary.runs == 0 {
            warn!("no runs with prefix {}", prefix);
            continue;
        }
        summary.log_summary();
        export_summary(&summary, &out_dir)?;
    }

    Ok(())
}
