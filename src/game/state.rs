//! Authoritative player movement state and tuning

use glam::{DVec3, Vec3};
use serde::{Deserialize, Serialize};

use crate::world::Aabb;

/// Authoritative movement state; `position` is the feet point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlayerState {
    pub position: DVec3,
    pub velocity: Vec3,
    pub on_ground: bool,
    pub colliding_horizontally: bool,
}

impl PlayerState {
    pub fn at(position: DVec3) -> Self {
        Self {
            position,
            velocity: Vec3::ZERO,
            on_ground: false,
            colliding_horizontally: false,
        }
    }

    pub fn bounds(&self, config: &MovementConfig) -> Aabb {
        Aabb::from_feet(self.position, config.width as f64, config.height as f64)
    }
}

/// Movement tuning; speeds in blocks per second.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MovementConfig {
    pub speed: f32,
    pub accel: f32,
    pub friction: f32,
    pub air_resistance: f32,
    pub gravity: f32,
    pub jump_force: f32,
    pub step_height: f32,
    pub width: f32,
    pub height: f32,
    pub sprint_multiplier: f32,
    pub sneak_multiplier: f32,
}

impl Default for MovementConfig {
    fn default() -> Self {
        Self {
            speed: 4.317,
            accel: 40.0,
            friction: 30.0,
            air_resistance: 8.0,
            gravity: -32.0,
            jump_force: 8.4,
            step_height: 0.6,
            width: 0.6,
            height: 1.8,
            sprint_multiplier: 1.3,
            sneak_multiplier: 0.3,
        }
    }
}

impl MovementConfig {
    /// Replace non-finite fields with defaults, restore defaults for
    /// non-positive dimensions and keep the capsule at least as tall as wide.
    pub fn sanitized(self) -> Self {
        let d = Self::default();
        let pick = |v: f32, fallback: f32| if v.is_finite() { v } else { fallback };
        let positive = |v: f32, fallback: f32| if v.is_finite() && v > 0.0 { v } else { fallback };
        let width = positive(self.width, d.width);
        Self {
            speed: pick(self.speed, d.speed).max(0.0),
            accel: pick(self.accel, d.accel).max(0.0),
            friction: pick(self.friction, d.friction).max(0.0),
            air_resistance: pick(self.air_resistance, d.air_resistance).max(0.0),
            gravity: pick(self.gravity, d.gravity),
            jump_force: pick(self.jump_force, d.jump_force).max(0.0),
            step_height: pick(self.step_height, d.step_height).max(0.0),
            width,
            height: positive(self.height, d.height).max(width),
            sprint_multiplier: pick(self.sprint_multiplier, d.sprint_multiplier).max(0.0),
            sneak_multiplier: pick(self.sneak_multiplier, d.sneak_multiplier).max(0.0),
        }
    }
}

/// Engine-side placement of a player
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform {
    pub position: DVec3,
    pub yaw: f32,
    pub pitch: f32,
}

impl Transform {
    pub fn new(position: DVec3, yaw: f32, pitch: f32) -> Self {
        Self {
            position,
            yaw,
            pitch,
        }
    }
}
