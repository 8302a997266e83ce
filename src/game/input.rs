//! Client movement input and the per-player input backlog

use bitflags::bitflags;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

bitflags! {
    /// Held movement keys, as sent on the wire
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct InputBits: u32 {
        const FORWARD = 1 << 0;
        const BACKWARD = 1 << 1;
        const LEFT = 1 << 2;
        const RIGHT = 1 << 3;
        const JUMP = 1 << 4;
        const SNEAK = 1 << 5;
        const SPRINT = 1 << 6;
    }
}

impl InputBits {
    pub const MOVEMENT: InputBits = InputBits::FORWARD
        .union(InputBits::BACKWARD)
        .union(InputBits::LEFT)
        .union(InputBits::RIGHT);

    /// Modifiers survive input decay
    pub const MODIFIERS: InputBits = InputBits::SNEAK.union(InputBits::SPRINT);
}

/// One tick of client input
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlayerInput {
    pub sequence: u64,
    pub bits: InputBits,
    /// Degrees
    pub yaw: f32,
    /// Degrees
    pub pitch: f32,
}

impl PlayerInput {
    pub fn new(sequence: u64, bits: InputBits, yaw: f32, pitch: f32) -> Self {
        Self {
            sequence,
            bits,
            yaw,
            pitch,
        }
    }

    /// Unknown wire bits are dropped.
    pub fn from_wire(sequence: u64, bits: u32, yaw: f32, pitch: f32) -> Self {
        Self::new(sequence, InputBits::from_bits_truncate(bits), yaw, pitch)
    }

    pub fn neutral() -> Self {
        Self::new(0, InputBits::empty(), 0.0, 0.0)
    }

    pub fn forward(&self) -> bool {
        self.bits.contains(InputBits::FORWARD)
    }

    pub fn backward(&self) -> bool {
        self.bits.contains(InputBits::BACKWARD)
    }

    pub fn left(&self) -> bool {
        self.bits.contains(InputBits::LEFT)
    }

    pub fn right(&self) -> bool {
        self.bits.contains(InputBits::RIGHT)
    }

    pub fn jump(&self) -> bool {
        self.bits.contains(InputBits::JUMP)
    }

    pub fn sneak(&self) -> bool {
        self.bits.contains(InputBits::SNEAK)
    }

    pub fn sprint(&self) -> bool {
        self.bits.contains(InputBits::SPRINT)
    }

    pub fn has_movement_input(&self) -> bool {
        self.bits.intersects(InputBits::MOVEMENT)
    }

    /// Same input with directional keys and jump let go.
    pub fn released(&self) -> Self {
        Self {
            bits: self.bits & InputBits::MODIFIERS,
            ..*self
        }
    }
}

impl Default for PlayerInput {
    fn default() -> Self {
        Self::neutral()
    }
}

/// Pending inputs kept per player, two seconds at the default tick rate
pub const MAX_BACKLOG: usize = 40;

/// Inputs received but not yet simulated, ordered by sequence
#[derive(Debug, Default)]
pub struct InputBacklog {
    pending: Mutex<BTreeMap<u64, PlayerInput>>,
}

impl InputBacklog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an input. Sequence zero is invalid and rejected; a duplicate
    /// sequence replaces the earlier copy. Past [`MAX_BACKLOG`] the oldest
    /// entries are dropped.
    pub fn push(&self, input: PlayerInput) -> bool {
        if input.sequence == 0 {
            return false;
        }
        let mut pending = self.pending.lock();
        pending.insert(input.sequence, input);
        while pending.len() > MAX_BACKLOG {
            if let Some((dropped, _)) = pending.pop_first() {
                debug!(sequence = dropped, "Input backlog full, dropping oldest");
            }
        }
        true
    }

    /// Lowest pending input newer than `last_applied`; older entries are
    /// discarded on the way.
    pub fn pop_after(&self, last_applied: u64) -> Option<PlayerInput> {
        let mut pending = self.pending.lock();
        while let Some(entry) = pending.first_entry() {
            let input = entry.remove();
            if input.sequence > last_applied {
                return Some(input);
            }
        }
        None
    }
}

#[cfg(test)]
impl InputBacklog {
    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(seq: u64) -> PlayerInput {
        PlayerInput::new(seq, InputBits::FORWARD, 0.0, 0.0)
    }

    #[test]
    fn backlog_pops_in_sequence_order() {
        let backlog = InputBacklog::new();
        for seq in [3, 1, 2] {
            assert!(backlog.push(input(seq)));
        }

        assert_eq!(backlog.pop_after(0).map(|i| i.sequence), Some(1));
        assert_eq!(backlog.pop_after(1).map(|i| i.sequence), Some(2));
        assert_eq!(backlog.pop_after(2).map(|i| i.sequence), Some(3));
        assert!(backlog.pop_after(3).is_none());
    }

    #[test]
    fn backlog_discards_stale_entries() {
        let backlog = InputBacklog::new();
        backlog.push(input(4));
        backlog.push(input(5));
        backlog.push(input(9));

        assert_eq!(backlog.pop_after(5).map(|i| i.sequence), Some(9));
        assert!(backlog.is_empty());
    }

    #[test]
    fn flood_keeps_only_newest_inputs() {
        let backlog = InputBacklog::new();
        let total = MAX_BACKLOG as u64 + 25;
        for seq in 1..=total {
            assert!(backlog.push(input(seq)));
        }

        assert_eq!(backlog.len(), MAX_BACKLOG);
        let oldest_kept = total - MAX_BACKLOG as u64 + 1;
        assert_eq!(backlog.pop_after(0).map(|i| i.sequence), Some(oldest_kept));
    }

    #[test]
    fn sequence_zero_is_rejected() {
        let backlog = InputBacklog::new();
        assert!(!backlog.push(input(0)));
        assert!(backlog.is_empty());
    }

    #[test]
    fn release_keeps_modifiers_and_look() {
        let held = PlayerInput::new(
            7,
            InputBits::FORWARD | InputBits::JUMP | InputBits::SPRINT | InputBits::SNEAK,
            90.0,
            -10.0,
        );
        let released = held.released();

        assert!(!released.has_movement_input());
        assert!(!released.jump());
        assert!(released.sprint());
        assert!(released.sneak());
        assert_eq!(released.yaw, 90.0);
        assert_eq!(released.pitch, -10.0);
        assert_eq!(released.sequence, 7);
    }

    #[test]
    fn unknown_wire_bits_are_ignored() {
        let input = PlayerInput::from_wire(1, 0b1000_0001, 0.0, 0.0);
        assert_eq!(input.bits, InputBits::FORWARD);
    }
}
