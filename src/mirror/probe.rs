//! Capsule probe characters and move classification

use glam::DVec3;
use rapier3d::control::{CharacterAutostep, CharacterLength, KinematicCharacterController};
use rapier3d::prelude::*;

use super::MirrorError;

/// Smallest probe radius accepted
pub const MIN_PROBE_RADIUS: f32 = 0.01;
/// Inner capsule used for penetration recovery, relative to the outer one
pub const INNER_CAPSULE_SCALE: f32 = 0.9;
/// Steepest slope the probe walks up, in degrees
pub const MAX_SLOPE_DEGREES: f32 = 50.0;
/// Width/height drift tolerated before a probe is rebuilt
pub const PROBE_DIMENSION_EPSILON: f32 = 1.0e-4;
/// Step-down snap used while grounded never exceeds this
pub const MAX_STICK_DOWN: f32 = 0.1;
/// Gap kept between the probe and geometry
pub const PROBE_SKIN: f32 = 0.01;

const NEGLIGIBLE_REQUEST: f64 = 1.0e-9;
const AXIS_EPSILON: f64 = 1.0e-6;
const SIGN_EPSILON: f64 = 1.0e-9;
/// Vertical deviation from the request that marks a grounded move as
/// following a slope or step
const SURFACE_FOLLOW_EPSILON: f64 = 1.0e-4;

/// A vertical capsule matched to a player's collision dimensions
#[derive(Clone)]
pub struct ProbeCharacter {
    width: f32,
    height: f32,
    outer: SharedShape,
    inner: SharedShape,
}

impl std::fmt::Debug for ProbeCharacter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProbeCharacter")
            .field("width", &self.width)
            .field("height", &self.height)
            .finish()
    }
}

impl ProbeCharacter {
    pub fn new(width: f32, height: f32) -> Result<Self, MirrorError> {
        if !width.is_finite() || !height.is_finite() {
            return Err(MirrorError::InvalidProbe { width, height });
        }
        let radius = (width * 0.5).max(MIN_PROBE_RADIUS);
        let half_segment = (height - 2.0 * radius).max(0.0) * 0.5;

        Ok(Self {
            width,
            height,
            outer: SharedShape::capsule_y(half_segment, radius),
            inner: SharedShape::capsule_y(
                half_segment * INNER_CAPSULE_SCALE,
                radius * INNER_CAPSULE_SCALE,
            ),
        })
    }

    pub fn matches(&self, width: f32, height: f32) -> bool {
        (self.width - width).abs() <= PROBE_DIMENSION_EPSILON
            && (self.height - height).abs() <= PROBE_DIMENSION_EPSILON
    }

    pub fn outer(&self) -> &dyn Shape {
        &*self.outer
    }

    pub fn inner(&self) -> &dyn Shape {
        &*self.inner
    }

    /// Controller configured for one move; stepping assists only when the
    /// caller allows them.
    pub fn controller(&self, step_height: f32, allow_step: bool) -> KinematicCharacterController {
        let step = step_height.max(0.0);
        KinematicCharacterController {
            offset: CharacterLength::Absolute(PROBE_SKIN),
            max_slope_climb_angle: MAX_SLOPE_DEGREES.to_radians(),
            min_slope_slide_angle: MAX_SLOPE_DEGREES.to_radians(),
            autostep: (allow_step && step > 0.0).then(|| CharacterAutostep {
                max_height: CharacterLength::Absolute(step),
                min_width: CharacterLength::Absolute(0.1),
                include_dynamic_bodies: false,
            }),
            snap_to_ground: (allow_step && step > 0.0)
                .then(|| CharacterLength::Absolute(step.min(MAX_STICK_DOWN))),
            ..KinematicCharacterController::default()
        }
    }
}

/// A single displacement to replay through the mirror
#[derive(Debug, Clone, Copy)]
pub struct MoveRequest {
    pub feet: DVec3,
    pub displacement: DVec3,
    pub dt: f32,
    pub height: f32,
    pub step_height: f32,
    pub allow_step: bool,
}

impl MoveRequest {
    pub fn is_finite(&self) -> bool {
        self.feet.is_finite()
            && self.displacement.is_finite()
            && self.dt.is_finite()
            && self.height.is_finite()
            && self.step_height.is_finite()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MoveResult {
    pub achieved: DVec3,
    pub on_ground: bool,
    pub colliding_horizontally: bool,
}

impl MoveResult {
    /// Nothing to collide with: the whole displacement is achieved.
    pub fn unobstructed(displacement: DVec3) -> Self {
        Self {
            achieved: displacement,
            on_ground: false,
            colliding_horizontally: false,
        }
    }

    /// A grounded move whose height differs from the request climbed or
    /// descended a surface instead of moving flat.
    pub fn followed_surface(&self, requested: &DVec3) -> bool {
        self.on_ground && (self.achieved.y - requested.y).abs() > SURFACE_FOLLOW_EPSILON
    }

    pub fn blocked_x(&self, requested: &DVec3) -> bool {
        self.horizontal_blocked(requested, requested.x, self.achieved.x)
    }

    pub fn blocked_y(&self, requested: &DVec3) -> bool {
        axis_blocked(requested.y, self.achieved.y)
    }

    pub fn blocked_z(&self, requested: &DVec3) -> bool {
        self.horizontal_blocked(requested, requested.z, self.achieved.z)
    }

    pub fn blocked_horizontally(&self, requested: &DVec3) -> bool {
        self.blocked_x(requested) || self.blocked_z(requested)
    }

    fn horizontal_blocked(&self, requested: &DVec3, wanted: f64, got: f64) -> bool {
        if self.followed_surface(requested) {
            slope_axis_blocked(wanted, got)
        } else {
            axis_blocked(wanted, got)
        }
    }
}

/// Short downward probe under an airborne player
#[derive(Debug, Clone, Copy)]
pub struct GroundProbe {
    pub feet: DVec3,
    pub dt: f32,
    pub height: f32,
    pub step_down: f32,
}

/// An axis is blocked when a non-negligible request was reversed or
/// shortened. Matching within epsilon is never blocked.
pub fn axis_blocked(requested: f64, achieved: f64) -> bool {
    if requested.abs() <= NEGLIGIBLE_REQUEST {
        return false;
    }
    if (achieved - requested).abs() <= AXIS_EPSILON {
        return false;
    }
    achieved * requested < -SIGN_EPSILON || achieved.abs() < requested.abs() - AXIS_EPSILON
}

/// Share of a horizontal request that survives sliding along the steepest
/// walkable slope.
pub fn slope_progress_ratio() -> f64 {
    let cos = (MAX_SLOPE_DEGREES as f64).to_radians().cos();
    cos * cos
}

/// Horizontal classification while following a slope or step. Sliding
/// along a walkable surface shortens the move; only a reversal or a loss
/// beyond what the steepest walkable slope costs counts as blocked.
pub fn slope_axis_blocked(requested: f64, achieved: f64) -> bool {
    if requested.abs() <= NEGLIGIBLE_REQUEST {
        return false;
    }
    achieved * requested < -SIGN_EPSILON || achieved.abs() < requested.abs() * slope_progress_ratio()
}
