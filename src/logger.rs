//! Append-only row writers for the three CSV streams (§6): messages, nodes,
//! backoff. Each stream is its own `csv::Writer`, opened once at startup
//! under `--results_dir`, with the header written on first row and the
//! writer flushed at the end of the run.

use crate::node::{BackoffLogRow, MessageLogRow};
use serde::Serialize;
use std::fs::File;
use std::path::Path;

use crate::error::SimError;

#[derive(Serialize)]
struct MessageRowRecord {
    timestamp: u64,
    message_id: u32,
    sender_addr: u32,
    dest_addr: u32,
    message_type: u8,
    message_length: u16,
    message_tx_time: u64,
    hop_start: u8,
    hop_limit: u8,
    tx_node: u32,
    rx_node: u32,
    rssi: f64,
    snr: f64,
    collision: u8,
    complete_reception: u8,
}

impl From<&MessageLogRow> for MessageRowRecord {
    fn from(r: &MessageLogRow) -> Self {
        MessageRowRecord {
            timestamp: r.timestamp,
            message_id: r.message_id,
            sender_addr: r.sender_addr,
            dest_addr: r.dest_addr,
            message_type: r.message_type,
            message_length: r.message_length,
            message_tx_time: r.message_tx_time,
            hop_start: r.hop_start,
            hop_limit: r.hop_limit,
            tx_node: r.tx_node,
            rx_node: r.rx_node,
            rssi: r.rssi,
            snr: r.snr,
            collision: r.collision,
            complete_reception: r.complete_reception,
        }
    }
}

/// One `nodes.csv` row: a snapshot of a node's full state, emitted on every
/// state-change event.
#[derive(Serialize)]
pub struct NodeRowRecord {
    pub time: u64,
    pub node_id: u32,
    pub long_name: String,
    pub role: String,
    pub position: String,
    pub tx_power: f64,
    pub noise_level: f64,
    pub frequency: f64,
    pub lora_mode: String,
    pub state: String,
    pub backoff_time: i64,
    pub message_queue_len: usize,
    pub messages_heard: usize,
    pub known_nodes: usize,
    pub rx_success: u64,
    pub rx_fail: u64,
    pub rx_dups: u64,
    pub rx_unicast: u64,
    pub tx_done: u64,
    pub forwarded: u64,
    pub tx_cancelled: u64,
    pub collisions_caused: u64,
    pub tx_origin: u64,
    pub messages_confirmed: u64,
    pub tx_time_sum: u64,
    pub rx_time_sum: u64,
    pub backoff_time_sum: u64,
    pub tx_util: f64,
    pub air_util: f64,
}

#[derive(Serialize)]
struct BackoffRowRecord {
    time: u64,
    node_id: u32,
    long_name: String,
    role: String,
    tx_util: f64,
    air_util: f64,
    rebroadcast: u8,
    #[serde(rename = "SNR")]
    snr: f64,
    #[serde(rename = "CWsize")]
    cw_size: u32,
    calculated_backoff: u64,
}

impl From<&BackoffLogRow> for BackoffRowRecord {
    fn from(r: &BackoffLogRow) -> Self {
        BackoffRowRecord {
            time: r.time,
            node_id: r.node_id,
            long_name: r.long_name.clone(),
            role: r.role.to_string(),
            tx_util: r.tx_util,
            air_util: r.air_util,
            rebroadcast: r.rebroadcast,
            snr: r.snr,
            cw_size: r.cw_size,
            calculated_backoff: r.calculated_backoff,
        }
    }
}

/// Owns the three CSV streams for a run. Opened once, rows appended as
/// events occur, flushed at the end of the run.
pub struct Logger {
    messages: csv::Writer<File>,
    nodes: csv::Writer<File>,
    backoff: csv::Writer<File>,
}

impl Logger {
    pub fn create(results_dir: &Path) -> Result<Self, SimError> {
        std::fs::create_dir_all(results_dir).map_err(|e| SimError::config(format!("failed to create results dir: {e}")))?;
        let messages_path = results_dir.join("messages.csv");
        let nodes_path = results_dir.join("nodes.csv");
        let backoff_path = results_dir.join("backoff.csv");

        let messages = csv::Writer::from_path(&messages_path).map_err(|e| SimError::config(format!("failed to open messages.csv: {e}")))?;
        let nodes = csv::Writer::from_path(&nodes_path).map_err(|e| SimError::config(format!("failed to open nodes.csv: {e}")))?;
        let backoff = csv::Writer::from_path(&backoff_path).map_err(|e| SimError::config(format!("failed to open backoff.csv: {e}")))?;

        Ok(Logger { messages, nodes, backoff })
    }

    pub fn log_message(&mut self, row: &MessageLogRow) -> Result<(), SimError> {
        self.messages
            .serialize(MessageRowRecord::from(row))
            .map_err(|e| SimError::config(format!("failed to write messages.csv row: {e}")))
    }

    pub fn log_node(&mut self, row: NodeRowRecord) -> Result<(), SimError> {
        self.nodes.serialize(row).map_err(|e| SimError::config(format!("failed to write nodes.csv row: {e}")))
    }

    pub fn log_backoff(&mut self, row: &BackoffLogRow) -> Result<(), SimError> {
        self.backoff
            .serialize(BackoffRowRecord::from(row))
            .map_err(|e| SimError::config(format!("failed to write backoff.csv row: {e}")))
    }

    pub fn flush(&mut self) -> Result<(), SimError> {
        self.messages.flush().map_err(|e| SimError::config(format!("flush messages.csv: {e}")))?;
        self.nodes.flush().map_err(|e| SimError::config(format!("flush nodes.csv: {e}")))?;
        self.backoff.flush().map_err(|e| SimError::config(format!("flush backoff.csv: {e}")))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn logger_creates_three_streams_with_headers() {
        let dir = tempdir().unwrap();
        let mut logger = Logger::create(dir.path()).unwrap();
        logger
            .log_message(&MessageLogRow {
                timestamp: 1,
                message_id: 2,
                sender_addr: 3,
                dest_addr: crate::message::BROADCAST_ADDR,
                message_type: 1,
                message_length: 20,
                message_tx_time: 1000,
                hop_start: 3,
                hop_limit: 3,
                tx_node: 3,
                rx_node: 4,
                rssi: -80.0,
                snr: 5.0,
                collision: 0,
                complete_reception: 1,
            })
            .unwrap();
        logger.flush().unwrap();

        let contents = std::fs::read_to_string(dir.path().join("messages.csv")).unwrap();
        assert!(contents.starts_with("timestamp,message_id"));
        assert_eq!(contents.lines().count(), 2);
    }
}
