//! The mesh message object: immutable-at-rest identity/payload record that
//! computes its own time-on-air (§4.1).

use crate::error::SimError;
use crate::preset::ModemPreset;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Broadcast destination address, per the Meshtastic wire convention.
pub const BROADCAST_ADDR: u32 = 0xffff_ffff;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageType {
    Text,
    Position,
    NodeInfo,
    Telemetry,
}

impl MessageType {
    pub fn as_u8(&self) -> u8 {
        match self {
            MessageType::Text => 1,
            MessageType::Position => 2,
            MessageType::NodeInfo => 3,
            MessageType::Telemetry => 4,
        }
    }
}

/// A mesh message in flight. Length is fixed after construction; `hop_limit`
/// is the only field a forwarder mutates (decremented, never below zero) on
/// re-enqueue.
#[derive(Debug, Clone)]
pub struct MeshMessage {
    pub id: u32,
    pub message_type: MessageType,
    pub length: u16,
    pub hop_start: u8,
    pub hop_limit: u8,
    pub sender_addr: u32,
    pub dest_addr: u32,
    pub preset: ModemPreset,
    pub tx_time_us: u64,
}

impl MeshMessage {
    /// Construct a new message, validating length/hop bounds and computing
    /// its airtime from the given preset. `id` is drawn from `rng` if not
    /// supplied by the caller.
    pub fn new(
        id: Option<u32>,
        message_type: MessageType,
        length: u16,
        hop_start: u8,
        sender_addr: u32,
        dest_addr: u32,
        preset: ModemPreset,
        rng: &mut impl Rng,
    ) -> Result<Self, SimError> {
        if length < 1 || length > 250 {
            return Err(SimError::config(format!("message length {length} out of range [1,250]")));
        }
        if hop_start > 7 {
            return Err(SimError::config(format!("hop_start {hop_start} out of range [0,7]")));
        }
        let id = id.unwrap_or_else(|| rng.gen());
        let tx_time_us = calculate_tx_time_us(&preset, length);
        Ok(MeshMessage {
            id,
            message_type,
            length,
            hop_start,
            hop_limit: hop_start,
            sender_addr,
            dest_addr,
            preset,
            tx_time_us,
        })
    }

    /// Decrement hop_limit for rebroadcast. Invariant: hop_limit never
    /// exceeds hop_start and never underflows below zero.
    pub fn decrement_hop_limit(&mut self) {
        if self.hop_limit > 0 {
            self.hop_limit -= 1;
        }
    }
}

/// tx_time_us = floor(preamble_time_us + payload_symbols * symbol_time_us)
/// per §4.1. Pure function of (preset, length): implementations must
/// reproduce this to the integer microsecond.
pub fn calculate_tx_time_us(preset: &ModemPreset, length: u16) -> u64 {
    let symbol_time_us = preset.symbol_time_us();
    let low_data_rate_opt = preset.low_data_rate_optimization();
    let preamble_time_us = preset.preamble_time_us();

    let sf = preset.spreading_factor as f64;
    let cr = preset.coding_rate as f64;
    let l = length as f64;
    let denom = 4.0 * (sf - if low_data_rate_opt { 2.0 } else { 0.0 });
    let numerator = 8.0 * l - 4.0 * sf + 28.0 + 16.0;
    let inner = (numerator / denom).ceil() * (cr - 4.0);
    let payload_symbols = 8.0 + inner.max(0.0);

    (preamble_time_us + payload_symbols * symbol_time_us).floor() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preset::LoRaMode;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn rejects_out_of_range_length() {
        let mut rng = StdRng::seed_from_u64(1);
        let preset = LoRaMode::MediumFast.preset();
        assert!(MeshMessage::new(None, MessageType::NodeInfo, 0, 3, 1, BROADCAST_ADDR, preset, &mut rng).is_err());
        assert!(MeshMessage::new(None, MessageType::NodeInfo, 251, 3, 1, BROADCAST_ADDR, preset, &mut rng).is_err());
        assert!(MeshMessage::new(None, MessageType::NodeInfo, 1, 3, 1, BROADCAST_ADDR, preset, &mut rng).is_ok());
        assert!(MeshMessage::new(None, MessageType::NodeInfo, 250, 3, 1, BROADCAST_ADDR, preset, &mut rng).is_ok());
    }

    #[test]
    fn rejects_out_of_range_hop_start() {
        let mut rng = StdRng::seed_from_u64(1);
        let preset = LoRaMode::MediumFast.preset();
        assert!(MeshMessage::new(None, MessageType::NodeInfo, 30, 8, 1, BROADCAST_ADDR, preset, &mut rng).is_err());
        assert!(MeshMessage::new(None, MessageType::NodeInfo, 30, 7, 1, BROADCAST_ADDR, preset, &mut rng).is_ok());
    }

    #[test]
    fn tx_time_is_deterministic_pure_function() {
        let preset = LoRaMode::MediumFast.preset();
        let a = calculate_tx_time_us(&preset, 40);
        let b = calculate_tx_time_us(&preset, 40);
        assert_eq!(a, b);
        let c = calculate_tx_time_us(&preset, 100);
        assert!(c > a);
    }

    #[test]
    fn hop_limit_never_exceeds_hop_start() {
        let mut rng = StdRng::seed_from_u64(1);
        let preset = LoRaMode::MediumFast.preset();
        let mut msg = MeshMessage::new(None, MessageType::Text, 20, 3, 1, BROADCAST_ADDR, preset, &mut rng).unwrap();
        assert_eq!(msg.hop_limit, msg.hop_start);
        msg.decrement_hop_limit();
        assert!(msg.hop_limit <= msg.hop_start);
    }
}
