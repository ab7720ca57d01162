//! Error taxonomy for the simulator: configuration failures, illegal state
//! transitions, and transient (silently-dropped) conditions.

use thiserror::Error;

/// The three-way error taxonomy of the simulation design.
///
/// `ConfigError` surfaces at startup and terminates the process.
/// `InvariantError` indicates a logic bug and is raised via `panic!`, not
/// returned as a `Result` — see `Node::illegal_transition` in `node.rs`. The
/// variant carries the (node_id, from, to) triple so a panic message states
/// exactly which invariant fired.
/// `Transient` conditions (queue full) are never returned to a caller; they
/// are logged at debug level and dropped. The variant exists for the same
/// testability reason as `InvariantError`.
#[derive(Debug, Error)]
pub enum SimError {
    #[error("config error: {0}")]
    ConfigError(String),

    #[error("illegal state transition for node {node_id}: {from:?} -> {to:?}")]
    InvariantError {
        node_id: u32,
        from: crate::node::NodeState,
        to: crate::node::NodeState,
    },

    #[error("transient: {0}")]
    Transient(String),
}

impl SimError {
    pub fn config<S: Into<String>>(msg: S) -> Self {
        SimError::ConfigError(msg.into())
    }

    pub fn transient<S: Into<String>>(msg: S) -> Self {
        SimError::Transient(msg.into())
    }
}
