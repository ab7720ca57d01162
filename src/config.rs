//! CLI argument parsing (`clap`) and JSON configuration loading (§6, §4.9).

use crate::error::SimError;
use crate::node::{NodeParams, Role};
use crate::preset::LoRaMode;
use crate::propagation::{Position, PropagationModel};
use clap::Parser;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Simulate a LoRa flooding mesh network and emit per-message/per-node CSV
/// logs plus an aggregate summary.
#[derive(Parser, Debug)]
#[command(name = "kssm-mesh-simulator", version, about)]
pub struct CliArgs {
    /// Path to the node descriptor JSON array.
    #[arg(long)]
    pub nodes_data: PathBuf,

    /// Total simulated time, in seconds.
    #[arg(long, default_value_t = 10.0)]
    pub simulation_time: f64,

    /// Simulation step size, in microseconds.
    #[arg(long, default_value_t = 1000)]
    pub time_resolution: u64,

    /// Directory the CSV streams are written into.
    #[arg(long, default_value = "results")]
    pub results_dir: PathBuf,

    /// Accepted for compatibility with the reference tool; bitmap plotting
    /// is not built into this binary.
    #[arg(long, default_value_t = false)]
    pub png: bool,

    /// Accepted for compatibility; implies --png. MP4 assembly is not built
    /// into this binary.
    #[arg(long, default_value_t = false)]
    pub mp4: bool,

    #[arg(long, default_value_t = 5)]
    pub slowmo_factor: u32,

    #[arg(long, default_value_t = 100)]
    pub dpi: u32,

    /// Optional global config JSON (plotting + propagation-model selection).
    #[arg(long)]
    pub config: Option<PathBuf>,
}

/// The plotting-adjacent config JSON plus the supplemented
/// `propagation_model` field (SPEC_FULL.md §6).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RunConfigJson {
    pub propagation_model: String,
    pub plot_every_n_microseconds_if_state_not_changed: u64,
    pub plot_node_font_size: u32,
    pub plot_range_circles: bool,
    pub plot_range_circles_minimal_rssi: f64,
    pub plot_range_circles_color_from_message_id: bool,
}

impl Default for RunConfigJson {
    fn default() -> Self {
        RunConfigJson {
            propagation_model: "FSPL".to_string(),
            plot_every_n_microseconds_if_state_not_changed: 1_000_000,
            plot_node_font_size: 10,
            plot_range_circles: false,
            plot_range_circles_minimal_rssi: -120.0,
            plot_range_circles_color_from_message_id: false,
        }
    }
}

/// Fully parsed and validated run configuration: CLI flags plus the
/// optional config JSON.
pub struct RunConfig {
    pub simulation_time_us: u64,
    pub time_resolution_us: u64,
    pub results_dir: PathBuf,
    pub propagation_model: PropagationModel,
}

impl RunConfig {
    pub fn load(args: &CliArgs) -> Result<Self, SimError> {
        if args.simulation_time <= 0.0 {
            return Err(SimError::config("simulation_time must be positive"));
        }
        if args.time_resolution == 0 {
            return Err(SimError::config("time_resolution must be positive"));
        }

        let config_json = match &args.config {
            Some(path) => load_json_from_file::<RunConfigJson>(path)?,
            None => RunConfigJson::default(),
        };
        let propagation_model = PropagationModel::parse(&config_json.propagation_model)?;

        Ok(RunConfig {
            simulation_time_us: (args.simulation_time * 1_000_000.0) as u64,
            time_resolution_us: args.time_resolution,
            results_dir: args.results_dir.clone(),
            propagation_model,
        })
    }
}

/// Raw shape of one element of the `--nodes_data` JSON array (§6).
#[derive(Debug, Deserialize)]
#[serde(default)]
struct NodeSpecJson {
    node_id: String,
    long_name: String,
    position: [f64; 3],
    tx_power: f64,
    noise_level: f64,
    frequency: f64,
    lora_mode: String,
    hop_start: u8,
    role: String,
    position_interval: f64,
    nodeinfo_interval: f64,
    text_message_min_interval: f64,
    text_message_max_interval: f64,
    debug: bool,
}

impl Default for NodeSpecJson {
    fn default() -> Self {
        NodeSpecJson {
            node_id: "0".to_string(),
            long_name: String::new(),
            position: [0.0, 0.0, 0.0],
            tx_power: 14.0,
            noise_level: -100.0,
            frequency: 915_000_000.0,
            lora_mode: "MediumFast".to_string(),
            hop_start: 3,
            role: "CLIENT".to_string(),
            position_interval: 900.0,
            nodeinfo_interval: 10_800.0,
            text_message_min_interval: 0.0,
            text_message_max_interval: 0.0,
            debug: false,
        }
    }
}

/// Parse a hex node_id, masked to the low 32 bits like the original
/// `int(n["node_id"], 16) & 0xffffffff` — ids wider than 32 bits are
/// truncated, never rejected on magnitude.
fn parse_node_id(raw: &str) -> Result<u32, SimError> {
    let trimmed = raw.trim_start_matches("0x").trim_start_matches("0X");
    let value = u64::from_str_radix(trimmed, 16).map_err(|e| SimError::config(format!("invalid node_id '{raw}': {e}")))?;
    Ok((value & 0xFFFF_FFFF) as u32)
}

/// Load and validate the node descriptor array into constructible
/// `NodeParams`. Any malformed entry is a `ConfigError` (§4.7): the
/// simulator fails to start, there is no per-node recovery.
pub fn load_node_params(path: &Path) -> Result<Vec<NodeParams>, SimError> {
    let specs: Vec<NodeSpecJson> = load_json_from_file(path)?;
    specs.into_iter().map(node_params_from_spec).collect()
}

fn node_params_from_spec(spec: NodeSpecJson) -> Result<NodeParams, SimError> {
    let id = parse_node_id(&spec.node_id)?;
    if spec.hop_start > 7 {
        return Err(SimError::config(format!("node {id}: hop_start {} out of range [0,7]", spec.hop_start)));
    }
    let lora_mode = LoRaMode::parse(&spec.lora_mode)?;
    let role = Role::parse(&spec.role);

    Ok(NodeParams {
        id,
        long_name: spec.long_name,
        position: Position {
            x: spec.position[0],
            y: spec.position[1],
            z: spec.position[2],
        },
        tx_power: spec.tx_power,
        noise_level: spec.noise_level,
        frequency: spec.frequency,
        lora_mode,
        role,
        hop_start: spec.hop_start,
        nodeinfo_interval_us: (spec.nodeinfo_interval * 1_000_000.0) as u64,
        position_interval_us: (spec.position_interval * 1_000_000.0) as u64,
        text_min_us: (spec.text_message_min_interval * 1_000_000.0) as u64,
        text_max_us: (spec.text_message_max_interval * 1_000_000.0) as u64,
    })
}

fn load_json_from_file<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, SimError> {
    let file = std::fs::File::open(path).map_err(|e| SimError::config(format!("failed to open {}: {e}", path.display())))?;
    serde_json::from_reader(file).map_err(|e| SimError::config(format!("failed to parse {}: {e}", path.display())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_id_parses_hex_with_or_without_prefix() {
        assert_eq!(parse_node_id("0x1A").unwrap(), 0x1A);
        assert_eq!(parse_node_id("1A").unwrap(), 0x1A);
        assert!(parse_node_id("not-hex").is_err());
    }

    #[test]
    fn hop_start_out_of_range_is_config_error() {
        let mut spec = NodeSpecJson::default();
        spec.hop_start = 8;
        assert!(node_params_from_spec(spec).is_err());
    }

    #[test]
    fn unknown_lora_mode_is_config_error_but_unknown_role_is_not() {
        let mut spec = NodeSpecJson::default();
        spec.lora_mode = "Bogus".to_string();
        assert!(node_params_from_spec(spec).is_err());

        let mut spec2 = NodeSpecJson::default();
        spec2.role = "Bogus".to_string();
        assert!(node_params_from_spec(spec2).is_ok());
    }
}
