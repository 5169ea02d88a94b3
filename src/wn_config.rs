// Analysis configuration
//
// Two sources:
// - the analysis config itself (YAML), every field optional
// - the simulator's JSON config, read only for node count, data rate and
//   packet size range

use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, warn, LevelFilter};
use serde::Deserialize;
use serde_json::Value;

use crate::wn_cache::CACHE_FILE_NAME;
use crate::wn_corpus::DEFAULT_SUFFIX;
use crate::wn_error::{AnalysisError, Result};
use crate::wn_metrics::{EngineParams, DEFAULT_DATA_RATE};

// ============================================================================
// Analysis Configuration
// ============================================================================

/// Main configuration of an analysis run
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AnalysisConfig {
    /// Folder holding `<prefix>_<lambda>_<seed>.csv` logs
    pub result_folder: PathBuf,

    /// More folders merged together with `result_folder`
    pub extra_folders: Vec<PathBuf>,

    /// Cache file name, placed inside `result_folder`
    pub cache_name: String,

    /// Explicit cache path (overrides `cache_name`)
    pub cache_path: Option<PathBuf>,

    /// Run log suffix
    pub suffix: String,

    /// Rebuild the cache even if it exists
    pub force_refresh: bool,

    /// Group drop, collision and throughput by lambda only
    pub coarse: bool,

    /// Prefixes to analyze (empty: every prefix found)
    pub prefixes: Vec<String>,

    /// Link bit rate (bits/s); taken from the simulator config when unset
    pub data_rate: Option<f64>,

    /// Number of nodes; taken from the simulator config when unset
    pub n_nodes: Option<usize>,

    /// Packet size range (bytes); the analytic packet size is its midpoint
    pub packet_size_min: Option<f64>,
    pub packet_size_max: Option<f64>,

    /// Simulator JSON config and the section to read from it
    pub simulation_config: Option<PathBuf>,
    pub simulation_section: String,

    /// Where summary tables are written (default `<result_folder>/summary`)
    pub output_folder: Option<PathBuf>,

    pub log_level: String,

    /// File the config was read from, for error messages
    #[serde(skip)]
    pub origin: Option<PathBuf>,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            result_folder: PathBuf::from("results"),
            extra_folders: Vec::new(),
            cache_name: CACHE_FILE_NAME.to_string(),
            cache_path: None,
            suffix: DEFAULT_SUFFIX.to_string(),
            force_refresh: false,
            coarse: false,
            prefixes: Vec::new(),
            data_rate: None,
            n_nodes: None,
            packet_size_min: None,
            packet_size_max: None,
            simulation_config: None,
            simulation_section: "simulation".to_string(),
            output_folder: None,
            log_level: "info".to_string(),
            origin: None,
        }
    }
}

impl AnalysisConfig {
    pub fn from_yaml_str(yaml: &str, origin: &Path) -> Result<Self> {
        let mut config: Self = serde_yaml::from_str(yaml)
            .map_err(|e| AnalysisError::config(origin, e.to_string()))?;
        config.origin = Some(origin.to_path_buf());
        Ok(config)
    }

    pub fn from_yaml_file(path: &Path) -> Result<Self> {
        let yaml = fs::read_to_string(path).map_err(|e| AnalysisError::io(path, e))?;
        Self::from_yaml_str(&yaml, path)
    }

    /// All folders of the folder-set, `result_folder` first
    pub fn folders(&self) -> Vec<PathBuf> {
        let mut folders = vec![self.result_folder.clone()];
        folders.extend(self.extra_folders.iter().cloned());
        folders
    }

    pub fn cache_path(&self) -> PathBuf {
        self.cache_path
            .clone()
            .unwrap_or_else(|| self.result_folder.join(&self.cache_name))
    }

    pub fn output_folder(&self) -> PathBuf {
        self.output_folder
            .clone()
            .unwrap_or_else(|| self.result_folder.join("summary"))
    }

    fn origin(&self) -> &Path {
        self.origin
            .as_deref()
            .unwrap_or_else(|| Path::new("command line"))
    }

    pub fn log_level(&self) -> Result<LevelFilter> {
        self.log_level.parse().map_err(|_| {
            AnalysisError::config(
                self.origin(),
                format!("unknown log level `{}`", self.log_level),
            )
        })
    }

    /// Reject settings that cannot work together: an unknown log level, or an
    /// output folder that is also scanned for run logs (exported tables would
    /// be read back as runs on the next merge).
    pub fn validate(&self) -> Result<()> {
        self.log_level()?;

        let output = self.output_folder();
        for folder in self.folders() {
            if same_folder(&output, &folder) {
                return Err(AnalysisError::config(
                    self.origin(),
                    format!(
                        "output folder {} is also a result folder",
                        output.display()
                    ),
                ));
            }
        }
        Ok(())
    }

    /// Engine constants: explicit values first, then the simulator config,
    /// then defaults.
    pub fn engine_params(&self, simulation: Option<&SimulationParams>) -> EngineParams {
        let defaults = EngineParams::default();

        let data_rate = self
            .data_rate
            .or_else(|| simulation.and_then(|s| s.data_rate))
            .unwrap_or(DEFAULT_DATA_RATE);

        let n_nodes = self
            .n_nodes
            .or_else(|| simulation.and_then(|s| s.n_nodes))
            .unwrap_or_else(|| {
                warn!("node count unknown, analytic offered load is per node");
                defaults.n_nodes
            });

        let packet_size = match (self.packet_size_min, self.packet_size_max) {
            (Some(min), Some(max)) => (min + max) / 2.0,
            _ => simulation
                .and_then(|s| s.packet_size)
                .unwrap_or(defaults.packet_size),
        };

        EngineParams {
            data_rate,
            n_nodes,
            packet_size,
            coarse: self.coarse,
        }
    }
}

fn same_folder(a: &Path, b: &Path) -> bool {
    if a == b {
        return true;
    }
    match (fs::canonicalize(a), fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

// ============================================================================
// Simulator Configuration
// ============================================================================

/// What the analysis needs from the simulator's config file
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SimulationParams {
    pub n_nodes: Option<usize>,
    pub data_rate: Option<f64>,
    /// Mean packet size (bytes)
    pub packet_size: Option<f64>,
}

impl SimulationParams {
    pub fn from_json_file(path: &Path, section: &str) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| AnalysisError::io(path, e))?;
        Self::from_json_str(&content, section, path)
    }

    /// Parse a simulator config. The file may contain `//` and `/* */`
    /// comments. Parameters given as lists are sweeps; the first value is used.
    pub fn from_json_str(content: &str, section: &str, origin: &Path) -> Result<Self> {
        let json: Value = serde_json::from_str(&strip_comments(content))
            .map_err(|e| AnalysisError::config(origin, e.to_string()))?;
        let section_value = json
            .get(section)
            .ok_or_else(|| AnalysisError::config(origin, format!("no section `{}`", section)))?;

        let params = Self {
            n_nodes: section_value.get("nodes").and_then(node_count),
            data_rate: section_value.get("datarate").and_then(first_number),
            packet_size: section_value
                .get("size")
                .and_then(sweep_first)
                .and_then(mean_of_distribution),
        };
        debug!("{}: {:?}", origin.display(), params);
        Ok(params)
    }
}

/// First value of a sweep, or the value itself
fn sweep_first(value: &Value) -> Option<&Value> {
    match value {
        Value::Array(values) => values.first(),
        other => Some(other),
    }
}

fn first_number(value: &Value) -> Option<f64> {
    sweep_first(value).and_then(Value::as_f64)
}

// `nodes` is a list of [x, y] positions, or a sweep over such lists
fn node_count(value: &Value) -> Option<usize> {
    let nodes = value.as_array()?;
    match nodes.first() {
        Some(Value::Array(first)) if first.first().map_or(false, Value::is_array) => {
            Some(first.len())
        }
        _ => Some(nodes.len()),
    }
}

// {"distribution": "unif", "min": a, "max": b} | "const" with "mean" | "exp"
fn mean_of_distribution(value: &Value) -> Option<f64> {
    let number = |key: &str| value.get(key).and_then(Value::as_f64);
    match value.get("distribution")?.as_str()? {
        "unif" => Some((number("min")? + number("max")?) / 2.0),
        "const" => number("mean"),
        "exp" => number("mean").or_else(|| number("lambda").map(|l| 1.0 / l)),
        _ => None,
    }
}

/// Remove `//` line comments and `/* */` block comments, leaving string
/// literals untouched
pub fn strip_comments(content: &str) -> String {
    let mut out = String::with_capacity(content.len());
    let mut chars = content.chars().peekable();
    let mut in_string = false;

    while let Some(c) = chars.next() {
        if in_string {
            out.push(c);
            match c {
                '\\' => {
                    if let Some(escaped) = chars.next() {
                        out.push(escaped);
                    }
                }
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }

        match (c, chars.peek()) {
            ('"', _) => {
                in_string = true;
                out.push(c);
            }
            ('/', Some('/')) => {
                for skipped in chars.by_ref() {
                    if skipped == '\n' {
                        out.push('\n');
                        break;
                    }
                }
            }
            ('/', Some('*')) => {
                chars.next();
                let mut prev = ' ';
                for skipped in chars.by_ref() {
                    if prev == '*' && skipped == '/' {
                        break;
                    }
                    if skipped == '\n' {
                        out.push('\n');
                    }
                    prev = skipped;
                }
            }
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const SIM_CONFIG: &str = r#"
{
    // ALOHA on a perfect channel
    "simulation": {
        "duration": 10,
        "seed": [1, 2, 3],
        "datarate": 8000000,
        "queue": 2,
        /* poisson arrivals,
           one rate per run */
        "interarrival": [
            {"distribution": "exp", "lambda": 10},
            {"distribution": "exp", "lambda": 20}
        ],
        "size": {"distribution": "unif", "min": 32, "max": 1460, "int": 1},
        "maxsize": 1460,
        "processing": {"distribution": "const", "mean": 0.000001},
        "nodes": [[[0, 0], [0, 10], [10, 0], [10, 10]]],
        "output": "aloha_{interarrival.lambda}_{seed}.csv"
    }
}
"#;

    #[test]
    fn test_defaults() {
        let config = AnalysisConfig::default();
        assert_eq!(config.cache_path(), PathBuf::from("results").join("alld.cbor"));
        assert_eq!(config.output_folder(), PathBuf::from("results").join("summary"));
        assert_eq!(config.folders(), vec![PathBuf::from("results")]);
        assert_eq!(config.log_level().unwrap(), LevelFilter::Info);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_yaml_overrides() {
        let yaml = r#"
result_folder: out/aloha
extra_folders: [out/realistic]
coarse: true
prefixes: [aloha]
n_nodes: 10
packet_size_min: 32
packet_size_max: 1500
log_level: debug
"#;
        let config = AnalysisConfig::from_yaml_str(yaml, Path::new("analysis.yaml")).unwrap();
        assert_eq!(
            config.folders(),
            vec![PathBuf::from("out/aloha"), PathBuf::from("out/realistic")]
        );
        assert_eq!(config.cache_path(), PathBuf::from("out/aloha/alld.cbor"));
        assert_eq!(config.log_level().unwrap(), LevelFilter::Debug);
        assert_eq!(config.origin, Some(PathBuf::from("analysis.yaml")));

        let params = config.engine_params(None);
        assert!(params.coarse);
        assert_eq!(params.n_nodes, 10);
        assert_eq!(params.packet_size, 766.0);
        assert_eq!(params.data_rate, DEFAULT_DATA_RATE);
    }

    #[test]
    fn test_yaml_unknown_field_rejected() {
        let err = AnalysisConfig::from_yaml_str("colour: blue\n", Path::new("a.yaml")).unwrap_err();
        assert!(matches!(err, AnalysisError::Config { .. }));
    }

    #[test]
    fn test_unknown_log_level_rejected() {
        let config =
            AnalysisConfig::from_yaml_str("log_level: chatty\n", Path::new("a.yaml")).unwrap();
        let err = config.log_level().unwrap_err();
        assert!(matches!(err, AnalysisError::Config { ref path, .. } if path == Path::new("a.yaml")));
        assert!(err.to_string().contains("chatty"));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_output_inside_result_folder_set_rejected() {
        let config = AnalysisConfig {
            output_folder: Some(PathBuf::from("results")),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(AnalysisError::Config { .. })));

        let dir = tempfile::TempDir::new().unwrap();
        let extra = dir.path().join("extra");
        fs::create_dir(&extra).unwrap();
        let config = AnalysisConfig {
            result_folder: dir.path().to_path_buf(),
            extra_folders: vec![extra.clone()],
            output_folder: Some(extra.join(".")),
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = AnalysisConfig {
            output_folder: Some(dir.path().join("summary")),
            ..config
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_strip_comments_keeps_strings() {
        let stripped = strip_comments("{\"url\": \"http://x/*y*/\"} // tail\n/* a */1");
        assert_eq!(stripped, "{\"url\": \"http://x/*y*/\"} \n1");
    }

    #[test]
    fn test_simulation_params() {
        let sim =
            SimulationParams::from_json_str(SIM_CONFIG, "simulation", Path::new("config.json"))
                .unwrap();
        assert_eq!(sim.n_nodes, Some(4));
        assert_eq!(sim.data_rate, Some(8_000_000.0));
        assert_eq!(sim.packet_size, Some(746.0));
    }

    #[test]
    fn test_simulation_missing_section() {
        let err = SimulationParams::from_json_str(SIM_CONFIG, "realistic", Path::new("c.json"))
            .unwrap_err();
        assert!(err.to_string().contains("realistic"));
    }

    #[test]
    fn test_engine_params_precedence() {
        let sim = SimulationParams {
            n_nodes: Some(4),
            data_rate: Some(1_000_000.0),
            packet_size: Some(500.0),
        };

        let config = AnalysisConfig::default();
        let params = config.engine_params(Some(&sim));
        assert_eq!(params.n_nodes, 4);
        assert_eq!(params.data_rate, 1_000_000.0);
        assert_eq!(params.packet_size, 500.0);

        let config = AnalysisConfig {
            n_nodes: Some(10),
            ..Default::default()
        };
        assert_eq!(config.engine_params(Some(&sim)).n_nodes, 10);
    }
}
