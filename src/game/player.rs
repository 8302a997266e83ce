//! Per-player simulation state

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use super::controller::BaseController;
use super::input::{InputBacklog, PlayerInput};
use super::state::{MovementConfig, PlayerState};
use crate::mirror::{guarded, MeshMirror, ProbeCharacter};

/// Mutable simulation record, touched only by the tick loop
pub struct SimPlayer {
    pub player_id: Uuid,
    pub state: PlayerState,
    pub last_applied_seq: u64,
    pub last_input: PlayerInput,
    /// Consecutive ticks without a fresh input
    pub empty_ticks: u32,
    pub config: MovementConfig,
    pub controller_id: String,
    pub controller: Arc<dyn BaseController>,
    probe: Option<ProbeCharacter>,
}

impl SimPlayer {
    pub fn new(
        player_id: Uuid,
        state: PlayerState,
        config: MovementConfig,
        controller: Arc<dyn BaseController>,
    ) -> Self {
        Self {
            player_id,
            state,
            last_applied_seq: 0,
            last_input: PlayerInput::neutral(),
            empty_ticks: 0,
            config: config.sanitized(),
            controller_id: controller.id().to_string(),
            controller,
            probe: None,
        }
    }

    /// Input to simulate this tick.
    ///
    /// Takes the next pending input when one exists. Otherwise the last input
    /// is replayed for up to `decay_ticks` ticks, after which directional keys
    /// and jump are released while modifiers and look direction stay.
    pub fn next_input(&mut self, backlog: &InputBacklog, decay_ticks: u32) -> PlayerInput {
        if let Some(input) = backlog.pop_after(self.last_applied_seq) {
            self.last_applied_seq = input.sequence;
            self.last_input = input;
            self.empty_ticks = 0;
            return input;
        }

        self.empty_ticks = self.empty_ticks.saturating_add(1);
        if self.empty_ticks > decay_ticks {
            self.last_input = self.last_input.released();
        }
        self.last_input
    }

    pub fn set_config(&mut self, config: MovementConfig) {
        self.config = config.sanitized();
    }

    pub fn set_controller(&mut self, controller: Arc<dyn BaseController>) {
        self.controller_id = controller.id().to_string();
        self.controller = controller;
    }

    /// Probe matching the current capsule, rebuilt when dimensions drift.
    /// `None` means mesh refinement is unavailable for this tick.
    pub fn ensure_probe(&mut self, mirror: &mut dyn MeshMirror) -> Option<&ProbeCharacter> {
        let (width, height) = (self.config.width, self.config.height);
        let stale = self
            .probe
            .as_ref()
            .map(|p| !p.matches(width, height))
            .unwrap_or(true);

        if stale {
            match guarded("probe creation", || mirror.create_probe(width, height)) {
                Ok(probe) => {
                    debug!(player_id = %self.player_id, width, height, "Probe character built");
                    self.probe = Some(probe);
                }
                Err(e) => {
                    warn!(player_id = %self.player_id, error = %e, "Probe character unavailable");
                    self.probe = None;
                }
            }
        }
        self.probe.as_ref()
    }

    #[cfg(test)]
    pub fn has_probe(&self) -> bool {
        self.probe.is_some()
    }
}

/// Shared handle for one predicted player. The network side only touches
/// the backlog and the move-suppression flag.
pub struct SimSlot {
    pub backlog: InputBacklog,
    suppress_next_move: AtomicBool,
    pub sim: Mutex<SimPlayer>,
}

impl SimSlot {
    pub fn new(sim: SimPlayer) -> Self {
        Self {
            backlog: InputBacklog::new(),
            suppress_next_move: AtomicBool::new(false),
            sim: Mutex::new(sim),
        }
    }

    /// Arm the one-shot pass for the engine move echo of a simulation write.
    pub fn arm_move_suppression(&self) {
        self.suppress_next_move.store(true, Ordering::Release);
    }

    /// Consume the one-shot pass; true if it was armed.
    pub fn take_move_suppression(&self) -> bool {
        self.suppress_next_move.swap(false, Ordering::AcqRel)
    }
}
