//! The node: MAC state machine, contention-window backoff, message
//! generation, and flood-routing/duplicate handling (§4.3-4.5). This is the
//! heart of the simulator.

use crate::message::{MeshMessage, MessageType, BROADCAST_ADDR};
use crate::preset::{LoRaMode, ModemPreset};
use crate::propagation::Position;
use rand::Rng;
use std::collections::{HashMap, HashSet, VecDeque};

/// Bounded capacity of a node's outgoing message queue.
pub const QUEUE_CAPACITY: usize = 20;
/// Number of step-intervals of silence before a stuck partial reception is
/// purged.
pub const RX_TIMEOUT_STEPS: u64 = 3;

pub const CW_MIN: u32 = 3;
pub const CW_MAX: u32 = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeState {
    Idle,
    WaitingToTx,
    TxBusy,
    RxBusy,
}

impl NodeState {
    pub fn name(&self) -> &'static str {
        match self {
            NodeState::Idle => "IDLE",
            NodeState::WaitingToTx => "WAITING_TO_TX",
            NodeState::TxBusy => "TX_BUSY",
            NodeState::RxBusy => "RX_BUSY",
        }
    }
}

/// Role taxonomy. Unknown role strings from input JSON parse to `Client`
/// (never an error, unlike an unrecognized `LoRaMode`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    ClientMute,
    ClientHidden,
    Router,
    RouterClient,
    RouterLate,
    Repeater,
    Tracker,
    Sensor,
    Tak,
    TakTracker,
    LostAndFound,
}

impl Role {
    pub fn parse(name: &str) -> Role {
        match name {
            "CLIENT" => Role::Client,
            "CLIENT_MUTE" => Role::ClientMute,
            "CLIENT_HIDDEN" => Role::ClientHidden,
            "ROUTER" => Role::Router,
            "ROUTER_CLIENT" => Role::RouterClient,
            "ROUTER_LATE" => Role::RouterLate,
            "REPEATER" => Role::Repeater,
            "TRACKER" => Role::Tracker,
            "SENSOR" => Role::Sensor,
            "TAK" => Role::Tak,
            "TAK_TRACKER" => Role::TakTracker,
            "LOST_AND_FOUND" => Role::LostAndFound,
            _ => Role::Client,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Role::Client => "CLIENT",
            Role::ClientMute => "CLIENT_MUTE",
            Role::ClientHidden => "CLIENT_HIDDEN",
            Role::Router => "ROUTER",
            Role::RouterClient => "ROUTER_CLIENT",
            Role::RouterLate => "ROUTER_LATE",
            Role::Repeater => "REPEATER",
            Role::Tracker => "TRACKER",
            Role::Sensor => "SENSOR",
            Role::Tak => "TAK",
            Role::TakTracker => "TAK_TRACKER",
            Role::LostAndFound => "LOST_AND_FOUND",
        }
    }

    /// Rebroadcasts even after hearing duplicates.
    pub fn is_unconditional_forwarder(&self) -> bool {
        matches!(self, Role::Router | Role::Repeater | Role::RouterClient | Role::RouterLate)
    }

    /// Never originates beacons (position/nodeinfo).
    pub fn is_hidden(&self) -> bool {
        matches!(self, Role::ClientHidden | Role::Repeater)
    }

    /// Processes hop_limit and re-enqueues for rebroadcast.
    pub fn is_forwarder(&self) -> bool {
        self.is_unconditional_forwarder() || matches!(self, Role::Client | Role::ClientHidden)
    }
}

#[derive(Debug, Clone)]
struct ReceptionEntry {
    message: MeshMessage,
    rx_time_us: u64,
    last_heard_us: u64,
    collision_us: u64,
    rssi: f64,
    snr: f64,
}

#[derive(Debug, Clone)]
pub struct HeardRecord {
    pub count: u32,
    pub rssi: f64,
    pub snr: f64,
    pub sender_addr: u32,
    pub hops_away: u8,
}

/// Cross-node effects a node's `inform`/`process_received` call can produce.
/// The driver applies these against its own node directory, since a node
/// has no direct mutable access to its neighbors (§3/§9: non-owning,
/// index-based handles).
#[derive(Debug, Clone)]
pub enum Effect {
    /// Blame the given transmitter for causing a collision at this receiver.
    BlameCollision { blamed_node_id: u32 },
    /// Tell the originator that one more distinct receiver heard its message.
    MessageConfirmed { originator_id: u32 },
    /// A message row ready for `messages.csv`.
    MessageLog(MessageLogRow),
    /// A backoff row ready for `backoff.csv`.
    BackoffLog(BackoffLogRow),
    /// A transient (non-fatal) condition, logged at debug level by the driver.
    Transient(String),
}

/// Row shape matching `messages.csv` (§6).
#[derive(Debug, Clone)]
pub struct MessageLogRow {
    pub timestamp: u64,
    pub message_id: u32,
    pub sender_addr: u32,
    pub dest_addr: u32,
    pub message_type: u8,
    pub message_length: u16,
    pub message_tx_time: u64,
    pub hop_start: u8,
    pub hop_limit: u8,
    pub tx_node: u32,
    pub rx_node: u32,
    pub rssi: f64,
    pub snr: f64,
    pub collision: u8,
    pub complete_reception: u8,
}

/// Row shape matching `backoff.csv` (§6).
#[derive(Debug, Clone)]
pub struct BackoffLogRow {
    pub time: u64,
    pub node_id: u32,
    pub long_name: String,
    pub role: &'static str,
    pub tx_util: f64,
    pub air_util: f64,
    pub rebroadcast: u8,
    pub snr: f64,
    pub cw_size: u32,
    pub calculated_backoff: u64,
}

fn slot_time_us(preset: &ModemPreset) -> f64 {
    2.5 * preset.symbol_time_us() + 7600.0
}

/// Linear-map a clamped SNR in [-20,10] dB onto [CW_MIN, CW_MAX], rounded.
pub fn snr_to_cw(snr_db: f64) -> u32 {
    let clamped = snr_db.clamp(-20.0, 10.0);
    let t = (clamped + 20.0) / 30.0;
    (CW_MIN as f64 + t * (CW_MAX - CW_MIN) as f64).round() as u32
}

fn linear_map(value: f64, from_lo: f64, from_hi: f64, to_lo: f64, to_hi: f64) -> f64 {
    let t = ((value - from_lo) / (from_hi - from_lo)).clamp(0.0, 1.0);
    to_lo + t * (to_hi - to_lo)
}

/// `2*CWmax*slot + 2^CWsize*slot`: the deliberately long deferral window
/// used only by ROUTER_LATE on duplicate reception of its own pending
/// rebroadcast.
fn worst_case_backoff_us(preset: &ModemPreset, cw_size: u32) -> u64 {
    let slot = slot_time_us(preset);
    (2.0 * CW_MAX as f64 * slot + 2f64.powi(cw_size as i32) * slot).floor() as u64
}

pub struct Node {
    pub id: u32,
    pub long_name: String,
    pub position: Position,
    pub tx_power: f64,
    pub noise_level: f64,
    pub frequency: f64,
    pub lora_mode: LoRaMode,
    pub preset: ModemPreset,
    pub role: Role,
    pub hop_start: u8,

    nodeinfo_interval_us: u64,
    position_interval_us: u64,
    text_min_us: u64,
    text_max_us: u64,
    last_nodeinfo_time_us: Option<u64>,
    last_position_time_us: Option<u64>,
    last_text_time_us: Option<u64>,

    pub current_time_us: u64,
    pub state: NodeState,
    queue: VecDeque<MeshMessage>,
    tx_buffer: Option<MeshMessage>,
    active_tx: Option<MeshMessage>,
    backoff_time_us: i64,
    tx_time_remaining_us: u64,
    currently_receiving: HashMap<u32, ReceptionEntry>,

    pub messages_heard: HashMap<u32, HeardRecord>,
    pub known_nodes: HashSet<u32>,
    pub tx_origin_list: Vec<u32>,

    pub rx_success: u64,
    pub rx_fail: u64,
    pub rx_dups: u64,
    pub rx_unicast: u64,
    pub tx_done: u64,
    pub forwarded: u64,
    pub tx_cancelled: u64,
    pub collisions_caused: u64,
    pub messages_confirmed: u64,
    pub tx_origin: u64,

    pub tx_time_sum: u64,
    pub rx_time_sum: u64,
    pub backoff_time_sum: u64,

    last_step_interval_us: u64,
}

/// Input parameters needed to construct a `Node`, mirroring the JSON keys
/// of §6 after validation/parsing in `crate::config`.
pub struct NodeParams {
    pub id: u32,
    pub long_name: String,
    pub position: Position,
    pub tx_power: f64,
    pub noise_level: f64,
    pub frequency: f64,
    pub lora_mode: LoRaMode,
    pub role: Role,
    pub hop_start: u8,
    pub nodeinfo_interval_us: u64,
    pub position_interval_us: u64,
    pub text_min_us: u64,
    pub text_max_us: u64,
}

impl Node {
    pub fn new(params: NodeParams, rng: &mut impl Rng) -> Self {
        let preset = params.lora_mode.preset();
        let last_nodeinfo_time_us = if params.nodeinfo_interval_us > 0 {
            Some(rng.gen_range(0..params.nodeinfo_interval_us))
        } else {
            None
        };
        let last_position_time_us = if params.position_interval_us > 0 {
            Some(rng.gen_range(0..params.position_interval_us))
        } else {
            None
        };
        let last_text_time_us = if params.text_min_us < params.text_max_us && params.text_max_us > 0 {
            Some(rng.gen_range(params.text_min_us..params.text_max_us))
        } else {
            None
        };

        Node {
            id: params.id,
            long_name: params.long_name,
            position: params.position,
            tx_power: params.tx_power,
            noise_level: params.noise_level,
            frequency: params.frequency,
            lora_mode: params.lora_mode,
            preset,
            role: params.role,
            hop_start: params.hop_start,
            nodeinfo_interval_us: params.nodeinfo_interval_us,
            position_interval_us: params.position_interval_us,
            text_min_us: params.text_min_us,
            text_max_us: params.text_max_us,
            last_nodeinfo_time_us,
            last_position_time_us,
            last_text_time_us,
            current_time_us: 0,
            state: NodeState::Idle,
            queue: VecDeque::new(),
            tx_buffer: None,
            active_tx: None,
            backoff_time_us: 0,
            tx_time_remaining_us: 0,
            currently_receiving: HashMap::new(),
            messages_heard: HashMap::new(),
            known_nodes: HashSet::new(),
            tx_origin_list: Vec::new(),
            rx_success: 0,
            rx_fail: 0,
            rx_dups: 0,
            rx_unicast: 0,
            tx_done: 0,
            forwarded: 0,
            tx_cancelled: 0,
            collisions_caused: 0,
            messages_confirmed: 0,
            tx_origin: 0,
            tx_time_sum: 0,
            rx_time_sum: 0,
            backoff_time_sum: 0,
            last_step_interval_us: 0,
        }
    }

    pub fn tx_util(&self) -> f64 {
        if self.current_time_us == 0 {
            0.0
        } else {
            self.tx_time_sum as f64 / self.current_time_us as f64
        }
    }

    pub fn air_util(&self) -> f64 {
        if self.current_time_us == 0 {
            0.0
        } else {
            (self.tx_time_sum + self.rx_time_sum) as f64 / self.current_time_us as f64
        }
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub fn backoff_time_us(&self) -> i64 {
        self.backoff_time_us
    }

    /// The message currently occupying the channel, if this node is
    /// `TxBusy`. Used by the driver to fan out `inform` calls (§4.4).
    pub fn active_transmission(&self) -> Option<&MeshMessage> {
        self.active_tx.as_ref()
    }

    /// A state-machine invariant was violated: a transition the MAC model
    /// assumes can never happen was about to happen anyway. Aborts the
    /// process with the (node_id, from, to) triple rather than silently
    /// corrupting state (§4.3/§4.7).
    fn illegal_transition(&self, from: NodeState, to: NodeState) -> ! {
        panic!("{}", crate::error::SimError::InvariantError { node_id: self.id, from, to });
    }

    /// We are rebroadcasting a message iff we did not originate it.
    /// (Resolved open question, DESIGN.md #1.)
    fn is_rebroadcast(&self, msg: &MeshMessage) -> bool {
        msg.sender_addr != self.id
    }

    fn enqueue_originated(&mut self, msg: MeshMessage, effects: &mut Vec<Effect>) {
        if self.queue.len() >= QUEUE_CAPACITY {
            effects.push(Effect::Transient(format!("node {} queue full, dropping originated message", self.id)));
            return;
        }
        self.tx_origin += 1;
        self.tx_origin_list.push(msg.id);
        self.queue.push_back(msg);
    }

    fn generate_beacons(&mut self, rng: &mut impl Rng, effects: &mut Vec<Effect>) {
        if self.role.is_hidden() {
            return;
        }
        let due_nodeinfo = self.nodeinfo_interval_us > 0
            && match self.last_nodeinfo_time_us {
                None => true,
                Some(t) => self.current_time_us > t + self.nodeinfo_interval_us,
            };
        if due_nodeinfo {
            let length = rng.gen_range(25..=50u16);
            if let Ok(msg) = MeshMessage::new(None, MessageType::NodeInfo, length, self.hop_start, self.id, BROADCAST_ADDR, self.preset, rng) {
                self.enqueue_originated(msg, effects);
            }
            return;
        }
        let due_position = self.position_interval_us > 0
            && match self.last_position_time_us {
                None => true,
                Some(t) => self.current_time_us > t + self.position_interval_us,
            };
        if due_position {
            let length = rng.gen_range(30..=70u16);
            if let Ok(msg) = MeshMessage::new(None, MessageType::Position, length, self.hop_start, self.id, BROADCAST_ADDR, self.preset, rng) {
                self.enqueue_originated(msg, effects);
            }
        }
    }

    fn generate_text(&mut self, rng: &mut impl Rng, effects: &mut Vec<Effect>) {
        if self.text_min_us >= self.text_max_us || self.text_max_us == 0 {
            return;
        }
        if let Some(last) = self.last_text_time_us {
            if self.current_time_us > last {
                let length = rng.gen_range(20..=100u16);
                if let Ok(msg) = MeshMessage::new(None, MessageType::Text, length, self.hop_start, self.id, BROADCAST_ADDR, self.preset, rng) {
                    self.enqueue_originated(msg, effects);
                }
                self.last_text_time_us = Some(self.current_time_us + rng.gen_range(self.text_min_us..self.text_max_us));
            }
        }
    }

    /// Updates cold-start beacon bookkeeping once a beacon message finishes
    /// transmitting.
    fn note_tx_complete(&mut self, msg: &MeshMessage) {
        match msg.message_type {
            MessageType::NodeInfo => self.last_nodeinfo_time_us = Some(self.current_time_us),
            MessageType::Position => self.last_position_time_us = Some(self.current_time_us),
            _ => {}
        }
    }

    fn compute_backoff(&self, msg: &MeshMessage, rebroadcast: bool, rng: &mut impl Rng) -> (u64, u32, f64) {
        let slot = slot_time_us(&self.preset);
        if !rebroadcast {
            let cw = linear_map(self.air_util() * 100.0, 0.0, 100.0, CW_MIN as f64, CW_MAX as f64).round() as u32;
            let backoff = rng.gen_range(0..=2u64.pow(cw)) as f64 * slot;
            (backoff.floor() as u64, cw, f64::NAN)
        } else {
            let heard_snr = self.messages_heard.get(&msg.id).map(|h| h.snr).unwrap_or(0.0);
            let cw = snr_to_cw(heard_snr);
            let backoff = if matches!(self.role, Role::Router | Role::Repeater) {
                rng.gen_range(0..=2 * cw as u64) as f64 * slot
            } else {
                2.0 * CW_MAX as f64 * slot + rng.gen_range(0..=2u64.pow(cw)) as f64 * slot
            };
            (backoff.floor() as u64, cw, heard_snr)
        }
    }

    /// Advance this node by one step. Does not touch other nodes; cross-node
    /// radio coupling is driven by the simulator via `inform` (§4.4).
    pub fn step(&mut self, step_us: u64, rng: &mut impl Rng) -> Vec<Effect> {
        let mut effects = Vec::new();
        self.current_time_us += step_us;
        self.last_step_interval_us = step_us;

        if self.state == NodeState::Idle {
            self.generate_beacons(rng, &mut effects);
        }
        self.generate_text(rng, &mut effects);

        match self.state {
            NodeState::Idle => {
                if self.tx_buffer.is_none() {
                    if let Some(msg) = self.queue.pop_front() {
                        let rebroadcast = self.is_rebroadcast(&msg);
                        let (backoff_us, cw, snr) = self.compute_backoff(&msg, rebroadcast, rng);
                        effects.push(Effect::BackoffLog(BackoffLogRow {
                            time: self.current_time_us,
                            node_id: self.id,
                            long_name: self.long_name.clone(),
                            role: self.role.name(),
                            tx_util: self.tx_util(),
                            air_util: self.air_util(),
                            rebroadcast: rebroadcast as u8,
                            snr,
                            cw_size: cw,
                            calculated_backoff: backoff_us,
                        }));
                        self.backoff_time_us = backoff_us as i64;
                        self.tx_buffer = Some(msg);
                        self.state = NodeState::WaitingToTx;
                    }
                }
            }
            NodeState::WaitingToTx => {
                if self.currently_receiving.is_empty() {
                    if self.backoff_time_us > step_us as i64 {
                        self.backoff_time_us -= step_us as i64;
                        self.backoff_time_sum += step_us;
                    } else {
                        self.backoff_time_sum += self.backoff_time_us.max(0) as u64;
                        self.backoff_time_us = 0;
                        let msg_id = match self.tx_buffer.as_ref() {
                            Some(msg) => msg.id,
                            None => self.illegal_transition(NodeState::WaitingToTx, NodeState::TxBusy),
                        };
                        let heard_count = self.messages_heard.get(&msg_id).map(|h| h.count).unwrap_or(0);
                        if self.role.is_unconditional_forwarder() || heard_count <= 1 {
                            let msg = match self.tx_buffer.take() {
                                Some(msg) => msg,
                                None => self.illegal_transition(NodeState::WaitingToTx, NodeState::TxBusy),
                            };
                            self.tx_time_remaining_us = msg.tx_time_us;
                            self.active_tx = Some(msg);
                            self.state = NodeState::TxBusy;
                        } else {
                            self.tx_buffer = None;
                            self.tx_cancelled += 1;
                            self.state = NodeState::Idle;
                        }
                    }
                } else {
                    // A reception started mid-backoff; inform() already
                    // moved us to RxBusy and the countdown is paused.
                }
            }
            NodeState::TxBusy => {
                if self.tx_time_remaining_us <= step_us {
                    let msg = match self.active_tx.take() {
                        Some(msg) => msg,
                        None => self.illegal_transition(NodeState::TxBusy, NodeState::Idle),
                    };
                    self.tx_time_sum += msg.tx_time_us;
                    self.tx_done += 1;
                    self.note_tx_complete(&msg);
                    self.tx_time_remaining_us = 0;
                    self.state = NodeState::Idle;
                } else {
                    self.tx_time_remaining_us -= step_us;
                }
            }
            NodeState::RxBusy => {
                self.purge_timed_out_receptions(&mut effects);
                if self.currently_receiving.is_empty() {
                    self.state = if self.backoff_time_us > 0 { NodeState::WaitingToTx } else { NodeState::Idle };
                }
            }
        }
        effects
    }

    fn purge_timed_out_receptions(&mut self, effects: &mut Vec<Effect>) {
        let now = self.current_time_us;
        let stale: Vec<u32> = self
            .currently_receiving
            .iter()
            .filter(|(_, e)| e.last_heard_us + self.rx_timeout_window_us() < now)
            .map(|(id, _)| *id)
            .collect();
        for id in stale {
            if let Some(entry) = self.currently_receiving.remove(&id) {
                self.rx_fail += 1;
                self.rx_time_sum += entry.rx_time_us;
                effects.push(Effect::MessageLog(MessageLogRow {
                    timestamp: now,
                    message_id: entry.message.id,
                    sender_addr: entry.message.sender_addr,
                    dest_addr: entry.message.dest_addr,
                    message_type: entry.message.message_type.as_u8(),
                    message_length: entry.message.length,
                    message_tx_time: entry.message.tx_time_us,
                    hop_start: entry.message.hop_start,
                    hop_limit: entry.message.hop_limit,
                    tx_node: id,
                    rx_node: self.id,
                    rssi: entry.rssi,
                    snr: entry.snr,
                    collision: 1,
                    complete_reception: 0,
                }));
            }
        }
    }

    fn rx_timeout_window_us(&self) -> u64 {
        self.last_step_interval_us.max(1) * RX_TIMEOUT_STEPS
    }

    /// Receive a radio transmission from `sender_id` (§4.4). `snr`/`rssi` are
    /// computed by the driver via the propagation model.
    pub fn inform(&mut self, sender_id: u32, msg: &MeshMessage, step_us: u64, snr: f64, rssi: f64, minimal_snr_db: f64) -> Vec<Effect> {
        let mut effects = Vec::new();
        if self.state == NodeState::TxBusy {
            return effects; // half-duplex: deaf while transmitting
        }
        if snr <= minimal_snr_db {
            return effects;
        }

        let was_non_empty = !self.currently_receiving.is_empty();
        if let Some(entry) = self.currently_receiving.get_mut(&sender_id) {
            entry.rx_time_us += step_us;
            entry.last_heard_us = self.current_time_us;
        } else {
            if was_non_empty {
                effects.push(Effect::BlameCollision { blamed_node_id: sender_id });
            }
            self.currently_receiving.insert(
                sender_id,
                ReceptionEntry {
                    message: msg.clone(),
                    rx_time_us: step_us,
                    last_heard_us: self.current_time_us,
                    collision_us: 0,
                    rssi,
                    snr,
                },
            );
            self.state = NodeState::RxBusy;
        }

        if self.currently_receiving.len() > 1 {
            for entry in self.currently_receiving.values_mut() {
                entry.collision_us += step_us;
            }
        }

        let completed: Vec<u32> = self
            .currently_receiving
            .iter()
            .filter(|(_, e)| e.rx_time_us >= e.message.tx_time_us)
            .map(|(id, _)| *id)
            .collect();

        for id in completed {
            let entry = self.currently_receiving.remove(&id).expect("just collected");
            let collided = entry.collision_us > 0;
            effects.push(Effect::MessageLog(MessageLogRow {
                timestamp: self.current_time_us,
                message_id: entry.message.id,
                sender_addr: entry.message.sender_addr,
                dest_addr: entry.message.dest_addr,
                message_type: entry.message.message_type.as_u8(),
                message_length: entry.message.length,
                message_tx_time: entry.message.tx_time_us,
                hop_start: entry.message.hop_start,
                hop_limit: entry.message.hop_limit,
                tx_node: id,
                rx_node: self.id,
                rssi: entry.rssi,
                snr: entry.snr,
                collision: collided as u8,
                complete_reception: 1,
            }));
            self.rx_time_sum += entry.rx_time_us;
            if collided {
                self.rx_fail += 1;
            } else {
                self.rx_success += 1;
                self.known_nodes.insert(id);
                let more_effects = self.process_received(entry.message, entry.rssi, entry.snr);
                effects.extend(more_effects);
            }
        }

        if self.currently_receiving.is_empty() {
            self.state = if self.backoff_time_us > 0 { NodeState::WaitingToTx } else { NodeState::Idle };
        }
        effects
    }

    /// Flood-routing / duplicate-suppression logic (§4.5).
    fn process_received(&mut self, mut msg: MeshMessage, rssi: f64, snr: f64) -> Vec<Effect> {
        let mut effects = Vec::new();

        if let Some(heard) = self.messages_heard.get_mut(&msg.id) {
            heard.count += 1;
            self.rx_dups += 1;

            let pending_same = self.tx_buffer.as_ref().map(|m| m.id) == Some(msg.id);
            if !self.role.is_unconditional_forwarder() && pending_same && self.backoff_time_us > 0 {
                self.tx_buffer = None;
                self.backoff_time_us = 0;
                self.tx_cancelled += 1;
            } else if self.role == Role::RouterLate && pending_same {
                let cw = snr_to_cw(snr);
                self.backoff_time_us = worst_case_backoff_us(&self.preset, cw) as i64;
            }
            return effects;
        }

        if msg.sender_addr == self.id {
            return effects;
        }

        let hops_away = msg.hop_start.saturating_sub(msg.hop_limit);
        self.messages_heard.insert(
            msg.id,
            HeardRecord {
                count: 1,
                rssi,
                snr,
                sender_addr: msg.sender_addr,
                hops_away,
            },
        );
        effects.push(Effect::MessageConfirmed { originator_id: msg.sender_addr });

        if msg.dest_addr == self.id {
            self.rx_unicast += 1;
        } else if self.role.is_forwarder() && msg.hop_limit > 0 {
            msg.decrement_hop_limit();
            if self.queue.len() < QUEUE_CAPACITY {
                self.forwarded += 1;
                self.queue.push_back(msg);
            } else {
                effects.push(Effect::Transient(format!("node {} queue full, dropping forward", self.id)));
            }
        }
        effects
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::propagation::Position;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn make_node(id: u32, role: Role, rng: &mut impl Rng) -> Node {
        Node::new(
            NodeParams {
                id,
                long_name: format!("node-{id}"),
                position: Position { x: id as f64 * 100.0, y: 0.0, z: 10.0 },
                tx_power: 14.0,
                noise_level: -100.0,
                frequency: 915_000_000.0,
                lora_mode: LoRaMode::MediumFast,
                role,
                hop_start: 3,
                nodeinfo_interval_us: 5_000_000,
                position_interval_us: 5_000_000,
                text_min_us: 0,
                text_max_us: 0,
            },
            rng,
        )
    }

    #[test]
    fn unknown_role_defaults_to_client() {
        assert_eq!(Role::parse("NOT_A_ROLE"), Role::Client);
    }

    #[test]
    fn snr_to_cw_stays_in_bounds() {
        assert_eq!(snr_to_cw(-1000.0), CW_MIN);
        assert_eq!(snr_to_cw(1000.0), CW_MAX);
        let mid = snr_to_cw(-5.0);
        assert!(mid >= CW_MIN && mid <= CW_MAX);
    }

    #[test]
    fn rebroadcast_flag_is_sender_not_self() {
        let mut rng = StdRng::seed_from_u64(7);
        let node = make_node(1, Role::Client, &mut rng);
        let preset = LoRaMode::MediumFast.preset();
        let own = MeshMessage::new(None, MessageType::Text, 20, 3, 1, BROADCAST_ADDR, preset, &mut rng).unwrap();
        let other = MeshMessage::new(None, MessageType::Text, 20, 3, 2, BROADCAST_ADDR, preset, &mut rng).unwrap();
        assert!(!node.is_rebroadcast(&own));
        assert!(node.is_rebroadcast(&other));
    }

    #[test]
    fn queue_overflow_is_transient_not_fatal() {
        let mut rng = StdRng::seed_from_u64(3);
        let mut node = make_node(1, Role::Client, &mut rng);
        let preset = LoRaMode::MediumFast.preset();
        let mut saw_transient = false;
        for _ in 0..QUEUE_CAPACITY + 5 {
            let msg = MeshMessage::new(None, MessageType::Text, 20, 3, 1, BROADCAST_ADDR, preset, &mut rng).unwrap();
            let mut effects = Vec::new();
            node.enqueue_originated(msg, &mut effects);
            if effects.iter().any(|e| matches!(e, Effect::Transient(_))) {
                saw_transient = true;
            }
        }
        assert!(saw_transient);
        assert!(node.queue_len() <= QUEUE_CAPACITY);
    }

    #[test]
    fn idle_node_eventually_generates_a_beacon() {
        let mut rng = StdRng::seed_from_u64(11);
        let mut node = make_node(1, Role::Client, &mut rng);
        let mut generated = false;
        for _ in 0..20 {
            node.step(1_000_000, &mut rng);
            if node.queue_len() > 0 || node.state != NodeState::Idle {
                generated = true;
                break;
            }
        }
        assert!(generated);
    }

    #[test]
    fn hidden_role_never_generates_beacons() {
        let mut rng = StdRng::seed_from_u64(13);
        let mut node = make_node(1, Role::ClientHidden, &mut rng);
        for _ in 0..20 {
            node.step(1_000_000, &mut rng);
        }
        assert_eq!(node.queue_len(), 0);
        assert_eq!(node.state, NodeState::Idle);
    }

    #[test]
    fn backoff_time_never_negative_after_step() {
        let mut rng = StdRng::seed_from_u64(17);
        let mut node = make_node(1, Role::Client, &mut rng);
        for _ in 0..50 {
            node.step(100_000, &mut rng);
            assert!(node.backoff_time_us() >= 0);
        }
    }
}
