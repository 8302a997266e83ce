//! Mesh refinement of block-only movement
//!
//! The base controller only sees block boxes. These passes replay its
//! result through the mirrored mesh world and reconcile the two.

use glam::DVec3;
use tracing::warn;
use uuid::Uuid;

use super::state::{MovementConfig, PlayerState};
use crate::mirror::{guarded, GroundProbe, MeshMirror, MoveRequest, MoveResult, ProbeCharacter};
use crate::world::WorldId;

/// Vertical speed above which a player counts as rising
pub const RISING_EPSILON: f32 = 0.02;
/// How far below the feet an airborne player is probed for mesh ground
pub const GROUND_PROBE_DISTANCE: f32 = 0.05;

/// Everything a refinement pass needs for one player this tick
pub struct MeshPass<'a> {
    pub mirror: &'a mut dyn MeshMirror,
    pub world: WorldId,
    pub probe: &'a ProbeCharacter,
    pub config: &'a MovementConfig,
    pub dt: f32,
    pub player_id: Uuid,
}

impl MeshPass<'_> {
    /// Land an airborne, non-rising player on mesh ground the block grid
    /// cannot see. Horizontal position is never changed.
    pub fn settle_on_mesh_ground(&mut self, prev: PlayerState) -> PlayerState {
        if prev.on_ground || prev.velocity.y > RISING_EPSILON {
            return prev;
        }

        let request = GroundProbe {
            feet: prev.position,
            dt: self.dt,
            height: self.config.height,
            step_down: GROUND_PROBE_DISTANCE,
        };
        let (world, probe) = (self.world, self.probe);
        let mirror = &mut *self.mirror;
        match guarded("ground probe", || mirror.probe_ground(world, probe, &request)) {
            Ok(true) => {
                let mut settled = prev;
                settled.velocity.y = settled.velocity.y.max(0.0);
                settled.on_ground = true;
                settled
            }
            Ok(false) => prev,
            Err(e) => {
                warn!(player_id = %self.player_id, error = %e, "Mesh ground probe failed");
                prev
            }
        }
    }

    /// Replay the base step's displacement through the mirror. Falls back to
    /// `base` unchanged when the mirror cannot answer.
    pub fn refine(&mut self, prev: &PlayerState, base: PlayerState) -> PlayerState {
        let requested = base.position - prev.position;
        let request = MoveRequest {
            feet: prev.position,
            displacement: requested,
            dt: self.dt,
            height: self.config.height,
            step_height: self.config.step_height,
            allow_step: prev.on_ground && base.velocity.y <= RISING_EPSILON,
        };

        let (world, probe) = (self.world, self.probe);
        let mirror = &mut *self.mirror;
        match guarded("character move", || mirror.move_character(world, probe, &request)) {
            Ok(result) => combine(prev, &base, requested, &result),
            Err(e) => {
                warn!(player_id = %self.player_id, error = %e, "Mesh refinement failed");
                base
            }
        }
    }
}

/// Merge the mirror's achieved move into the base step's state.
pub fn combine(
    prev: &PlayerState,
    base: &PlayerState,
    requested: DVec3,
    result: &MoveResult,
) -> PlayerState {
    let blocked_x = result.blocked_x(&requested);
    let blocked_y = result.blocked_y(&requested);
    let blocked_z = result.blocked_z(&requested);

    let mut velocity = base.velocity;
    if blocked_x {
        velocity.x = 0.0;
    }
    if blocked_y {
        velocity.y = 0.0;
    }
    if blocked_z {
        velocity.z = 0.0;
    }

    let mut on_ground = base.on_ground;
    if !on_ground && requested.y < 0.0 && blocked_y {
        on_ground = true;
    }
    if velocity.y > RISING_EPSILON {
        on_ground = false;
    }
    if on_ground && velocity.y < 0.0 {
        velocity.y = 0.0;
    }

    PlayerState {
        position: prev.position + result.achieved,
        velocity,
        on_ground,
        colliding_horizontally: base.colliding_horizontally || blocked_x || blocked_z,
    }
}
