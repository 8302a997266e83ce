//! Correction snapshots and mode messages

use std::sync::atomic::{AtomicU64, Ordering};

use crate::ws::protocol::ServerMsg;

use super::player::SimPlayer;
use super::state::PlayerState;

/// Correction for a client after its input `ack_sequence_id` was applied
pub fn correction(ack_sequence_id: u64, state: &PlayerState) -> ServerMsg {
    ServerMsg::Snapshot {
        ack_sequence_id,
        x: state.position.x,
        y: state.position.y,
        z: state.position.z,
        vel_x: state.velocity.x,
        vel_y: state.velocity.y,
        vel_z: state.velocity.z,
        on_ground: state.on_ground,
    }
}

/// Mode toggle describing `sim`, or prediction off when there is none
pub fn physics_mode(sim: Option<&SimPlayer>) -> ServerMsg {
    match sim {
        Some(sim) => ServerMsg::PhysicsMode {
            enabled: true,
            controller_id: Some(sim.controller_id.clone()),
            config: Some(sim.config),
        },
        None => ServerMsg::PhysicsMode {
            enabled: false,
            controller_id: None,
            config: None,
        },
    }
}

/// Snapshot delivery counters for debugging
#[derive(Debug, Default)]
pub struct SnapshotStats {
    sent: AtomicU64,
    dropped: AtomicU64,
}

impl SnapshotStats {
    pub fn record(&self, delivered: bool) {
        if delivered {
            self.sent.fetch_add(1, Ordering::Relaxed);
        } else {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
