//! Summary/statistics aggregator: consumes terminal node state and produces
//! aggregate tables and per-source success matrices (§4.8).

use crate::node::Node;

/// One row of the per-node summary table — the same counter set carried by
/// `nodes.csv`, reusable for an end-of-run console report.
pub struct NodeSummary {
    pub node_id: u32,
    pub long_name: String,
    pub rx_success: u64,
    pub rx_fail: u64,
    pub rx_dups: u64,
    pub tx_done: u64,
    pub forwarded: u64,
    pub tx_cancelled: u64,
    pub collisions_caused: u64,
    pub tx_origin: u64,
    pub messages_confirmed: u64,
    pub tx_util: f64,
    pub air_util: f64,
}

/// Per-source success rate: how many distinct other nodes confirmed each
/// originated message, normalized against the maximum possible (every other
/// node in the run hearing every originated message once).
pub struct SourceSuccess {
    pub node_id: u32,
    pub tx_origin: u64,
    pub messages_confirmed: u64,
    pub normalized_success_rate: f64,
}

pub struct Summary {
    pub nodes: Vec<NodeSummary>,
    pub sources: Vec<SourceSuccess>,
}

/// Build the aggregate summary from the driver's terminal node state. Pure
/// function, no I/O.
pub fn summarize(nodes: &[Node]) -> Summary {
    let known_node_count = nodes.len() as u64;

    let node_summaries = nodes
        .iter()
        .map(|n| NodeSummary {
            node_id: n.id,
            long_name: n.long_name.clone(),
            rx_success: n.rx_success,
            rx_fail: n.rx_fail,
            rx_dups: n.rx_dups,
            tx_done: n.tx_done,
            forwarded: n.forwarded,
            tx_cancelled: n.tx_cancelled,
            collisions_caused: n.collisions_caused,
            tx_origin: n.tx_origin,
            messages_confirmed: n.messages_confirmed,
            tx_util: n.tx_util(),
            air_util: n.air_util(),
        })
        .collect();

    let sources = nodes
        .iter()
        .filter(|n| n.tx_origin > 0)
        .map(|n| {
            let max_possible = n.tx_origin * known_node_count.saturating_sub(1);
            let rate = if max_possible == 0 { 0.0 } else { n.messages_confirmed as f64 / max_possible as f64 };
            SourceSuccess {
                node_id: n.id,
                tx_origin: n.tx_origin,
                messages_confirmed: n.messages_confirmed,
                normalized_success_rate: rate,
            }
        })
        .collect();

    Summary { nodes: node_summaries, sources }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{Node, NodeParams, Role};
    use crate::preset::LoRaMode;
    use crate::propagation::Position;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn make_node(id: u32, rng: &mut impl rand::Rng) -> Node {
        Node::new(
            NodeParams {
                id,
                long_name: format!("n{id}"),
                position: Position { x: 0.0, y: 0.0, z: 10.0 },
                tx_power: 14.0,
                noise_level: -100.0,
                frequency: 915_000_000.0,
                lora_mode: LoRaMode::MediumFast,
                role: Role::Client,
                hop_start: 3,
                nodeinfo_interval_us: 0,
                position_interval_us: 0,
                text_min_us: 0,
                text_max_us: 0,
            },
            rng,
        )
    }

    #[test]
    fn single_node_run_has_zero_success_rate_not_panic() {
        let mut rng = StdRng::seed_from_u64(1);
        let node = make_node(1, &mut rng);
        let summary = summarize(std::slice::from_ref(&node));
        assert!(summary.sources.is_empty());
    }

    #[test]
    fn success_rate_normalizes_by_other_node_count() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut a = make_node(1, &mut rng);
        let b = make_node(2, &mut rng);
        let c = make_node(3, &mut rng);
        a.tx_origin = 2;
        a.messages_confirmed = 3; // 2 originated messages, each heard by up to 2 others
        let nodes = vec![a, b, c];
        let summary = summarize(&nodes);
        let source = summary.sources.iter().find(|s| s.node_id == 1).unwrap();
        assert_eq!(source.tx_origin, 2);
        assert!((source.normalized_success_rate - (3.0 / 4.0)).abs() < 1e-9);
    }
}
