//! Simulator driver: owns the node collection and the simulated clock,
//! advances every node one step per tick, and fans out `inform` calls from
//! transmitting nodes to every other node (§4.6).

use crate::config::RunConfig;
use crate::error::SimError;
use crate::logger::{Logger, NodeRowRecord};
use crate::node::{Effect, Node, NodeParams, NodeState};
use crate::propagation::{rssi_dbm, snr_db, PropagationCache, DEFAULT_MINIMAL_SNR_DB};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::HashMap;

pub struct Simulator {
    nodes: Vec<Node>,
    id_to_index: HashMap<u32, usize>,
    clock_us: u64,
    step_us: u64,
    total_ticks: u64,
    propagation: PropagationCache,
    logger: Logger,
    rng: StdRng,
    report_period_us: u64,
}

impl Simulator {
    pub fn new(node_params: Vec<NodeParams>, config: &RunConfig, logger: Logger, seed: u64) -> Result<Self, SimError> {
        if node_params.is_empty() {
            return Err(SimError::config("nodes_data must contain at least one node"));
        }
        let mut rng = StdRng::seed_from_u64(seed);
        let mut id_to_index = HashMap::with_capacity(node_params.len());
        let mut nodes = Vec::with_capacity(node_params.len());
        for (idx, params) in node_params.into_iter().enumerate() {
            if id_to_index.insert(params.id, idx).is_some() {
                return Err(SimError::config(format!("duplicate node_id {}", params.id)));
            }
            nodes.push(Node::new(params, &mut rng));
        }

        let total_ticks = config.simulation_time_us / config.time_resolution_us;
        Ok(Simulator {
            nodes,
            id_to_index,
            clock_us: 0,
            step_us: config.time_resolution_us,
            total_ticks,
            propagation: PropagationCache::new(config.propagation_model),
            logger,
            rng,
            report_period_us: config.time_resolution_us.saturating_mul(1000).max(1),
        })
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn run(&mut self) -> Result<(), SimError> {
        for _ in 0..self.total_ticks {
            self.tick()?;
        }
        self.logger.flush()
    }

    fn tick(&mut self) -> Result<(), SimError> {
        self.clock_us += self.step_us;
        let mut any_state_changed = false;

        // A node that transitions WAITING_TO_TX -> TX_BUSY this tick only ran
        // the WAITING_TO_TX arm of `step`; it must not inform anyone until
        // next tick. So who informs this tick is decided by the state (and
        // the message in flight) a node was *already in* before `step` ran,
        // captured before the call since `step` may consume `active_tx` on
        // the same tick the transmission completes.
        let mut transmitting: Vec<(usize, u32, crate::message::MeshMessage)> = Vec::new();
        for i in 0..self.nodes.len() {
            if self.nodes[i].state == NodeState::TxBusy {
                if let Some(msg) = self.nodes[i].active_transmission() {
                    transmitting.push((i, self.nodes[i].id, msg.clone()));
                }
            }
            let prev_state = self.nodes[i].state;
            let effects = self.nodes[i].step(self.step_us, &mut self.rng);
            self.apply_effects(effects)?;
            if self.nodes[i].state != prev_state {
                any_state_changed = true;
                self.log_node_row(i)?;
            }
        }

        for (sender_idx, sender_id, msg) in transmitting {
            let sender_pos = self.nodes[sender_idx].position;
            let sender_tx_power = self.nodes[sender_idx].tx_power;
            let frequency = self.nodes[sender_idx].frequency;

            for j in 0..self.nodes.len() {
                if j == sender_idx {
                    continue;
                }
                let rx_pos = self.nodes[j].position;
                let rx_noise = self.nodes[j].noise_level;
                let rx_id = self.nodes[j].id;
                let loss_db = self.propagation.loss_db(sender_id, rx_id, sender_pos, rx_pos, frequency)?;
                let rssi = rssi_dbm(sender_tx_power, loss_db);
                let snr = snr_db(rssi, rx_noise);

                let prev_state = self.nodes[j].state;
                let effects = self.nodes[j].inform(sender_id, &msg, self.step_us, snr, rssi, DEFAULT_MINIMAL_SNR_DB);
                self.apply_effects(effects)?;
                if self.nodes[j].state != prev_state {
                    any_state_changed = true;
                    self.log_node_row(j)?;
                }
            }
        }

        if any_state_changed || self.clock_us % self.report_period_us == 0 {
            log::info!("t={}us ({} nodes)", self.clock_us, self.nodes.len());
        }
        Ok(())
    }

    fn apply_effects(&mut self, effects: Vec<Effect>) -> Result<(), SimError> {
        for effect in effects {
            match effect {
                Effect::BlameCollision { blamed_node_id } => {
                    if let Some(&idx) = self.id_to_index.get(&blamed_node_id) {
                        self.nodes[idx].collisions_caused += 1;
                    }
                }
                Effect::MessageConfirmed { originator_id } => {
                    if let Some(&idx) = self.id_to_index.get(&originator_id) {
                        self.nodes[idx].messages_confirmed += 1;
                    }
                }
                Effect::MessageLog(row) => self.logger.log_message(&row)?,
                Effect::BackoffLog(row) => self.logger.log_backoff(&row)?,
                Effect::Transient(msg) => log::debug!("{msg}"),
            }
        }
        Ok(())
    }

    fn log_node_row(&mut self, idx: usize) -> Result<(), SimError> {
        let n = &self.nodes[idx];
        self.logger.log_node(NodeRowRecord {
            time: n.current_time_us,
            node_id: n.id,
            long_name: n.long_name.clone(),
            role: n.role.name().to_string(),
            position: format!("({}, {}, {})", n.position.x, n.position.y, n.position.z),
            tx_power: n.tx_power,
            noise_level: n.noise_level,
            frequency: n.frequency,
            lora_mode: n.lora_mode.name().to_string(),
            state: n.state.name().to_string(),
            backoff_time: n.backoff_time_us(),
            message_queue_len: n.queue_len(),
            messages_heard: n.messages_heard.len(),
            known_nodes: n.known_nodes.len(),
            rx_success: n.rx_success,
            rx_fail: n.rx_fail,
            rx_dups: n.rx_dups,
            rx_unicast: n.rx_unicast,
            tx_done: n.tx_done,
            forwarded: n.forwarded,
            tx_cancelled: n.tx_cancelled,
            collisions_caused: n.collisions_caused,
            tx_origin: n.tx_origin,
            messages_confirmed: n.messages_confirmed,
            tx_time_sum: n.tx_time_sum,
            rx_time_sum: n.rx_time_sum,
            backoff_time_sum: n.backoff_time_sum,
            tx_util: n.tx_util(),
            air_util: n.air_util(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::Role;
    use crate::preset::LoRaMode;
    use crate::propagation::{Position, PropagationModel};
    use tempfile::tempdir;

    fn two_node_params() -> Vec<NodeParams> {
        vec![
            NodeParams {
                id: 1,
                long_name: "A".to_string(),
                position: Position { x: 0.0, y: 0.0, z: 10.0 },
                tx_power: 14.0,
                noise_level: -100.0,
                frequency: 915_000_000.0,
                lora_mode: LoRaMode::MediumFast,
                role: Role::Client,
                hop_start: 3,
                nodeinfo_interval_us: 500_000,
                position_interval_us: 5_000_000,
                text_min_us: 0,
                text_max_us: 0,
            },
            NodeParams {
                id: 2,
                long_name: "B".to_string(),
                position: Position { x: 100.0, y: 0.0, z: 10.0 },
                tx_power: 14.0,
                noise_level: -100.0,
                frequency: 915_000_000.0,
                lora_mode: LoRaMode::MediumFast,
                role: Role::Client,
                hop_start: 3,
                nodeinfo_interval_us: 5_000_000,
                position_interval_us: 5_000_000,
                text_min_us: 0,
                text_max_us: 0,
            },
        ]
    }

    #[test]
    fn two_node_broadcast_is_eventually_heard() {
        let dir = tempdir().unwrap();
        let logger = Logger::create(dir.path()).unwrap();
        let config = RunConfig {
            simulation_time_us: 5_000_000,
            time_resolution_us: 1000,
            results_dir: dir.path().to_path_buf(),
            propagation_model: PropagationModel::Fspl,
        };
        let mut sim = Simulator::new(two_node_params(), &config, logger, 42).unwrap();
        sim.run().unwrap();

        let b = sim.nodes().iter().find(|n| n.id == 2).unwrap();
        assert!(b.rx_success >= 1);
        assert!(b.known_nodes.contains(&1));
    }

    #[test]
    fn rejects_duplicate_node_ids() {
        let dir = tempdir().unwrap();
        let logger = Logger::create(dir.path()).unwrap();
        let config = RunConfig {
            simulation_time_us: 1_000_000,
            time_resolution_us: 1000,
            results_dir: dir.path().to_path_buf(),
            propagation_model: PropagationModel::Fspl,
        };
        let mut dup = two_node_params();
        dup[1].id = 1;
        assert!(Simulator::new(dup, &config, logger, 1).is_err());
    }

    #[test]
    fn out_of_range_receiver_never_hears_sender() {
        let dir = tempdir().unwrap();
        let logger = Logger::create(dir.path()).unwrap();
        let config = RunConfig {
            simulation_time_us: 3_000_000,
            time_resolution_us: 1000,
            results_dir: dir.path().to_path_buf(),
            propagation_model: PropagationModel::Fspl,
        };
        let mut params = two_node_params();
        params[1].position = Position { x: 10_000_000.0, y: 0.0, z: 10.0 };
        let mut sim = Simulator::new(params, &config, logger, 42).unwrap();
        sim.run().unwrap();

        let b = sim.nodes().iter().find(|n| n.id == 2).unwrap();
        assert_eq!(b.rx_success, 0);
        assert_eq!(b.state, NodeState::Idle);
    }
}
