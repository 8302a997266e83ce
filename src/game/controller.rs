//! Block-grid movement controllers
//!
//! A controller is a pure step function: previous state, one input, tuning
//! and the block collision view in, next state out. It only sees
//! axis-aligned boxes; mesh geometry is handled afterwards by refinement.

use dashmap::DashMap;
use glam::DVec3;
use std::sync::Arc;
use tracing::warn;

use super::input::PlayerInput;
use super::state::{MovementConfig, PlayerState};
use crate::world::collision::CollisionQuery;
use crate::world::Aabb;

pub const DEFAULT_CONTROLLER_ID: &str = "default";

/// Longest step a controller will integrate at once
pub const MAX_STEP_DT: f32 = 0.25;
const CLIP_EPSILON: f64 = 1.0e-9;
const PENETRATION_EPSILON: f64 = 1.0e-6;
const MAX_PENETRATION_ITERATIONS: usize = 6;
const BROADPHASE_MARGIN: f64 = 0.25;
const SUPPORT_PROBE: f64 = 0.05;

/// Base movement step, shared across players
pub trait BaseController: Send + Sync {
    fn id(&self) -> &str;

    fn step(
        &self,
        prev: &PlayerState,
        input: &PlayerInput,
        config: &MovementConfig,
        world: &dyn CollisionQuery,
        dt: f32,
    ) -> PlayerState;
}

/// Walk/sprint/sneak/jump controller with step-up over low ledges
pub struct StandardController;

impl BaseController for StandardController {
    fn id(&self) -> &str {
        DEFAULT_CONTROLLER_ID
    }

    fn step(
        &self,
        prev: &PlayerState,
        input: &PlayerInput,
        config: &MovementConfig,
        world: &dyn CollisionQuery,
        dt: f32,
    ) -> PlayerState {
        let dt = dt.clamp(0.0, MAX_STEP_DT);
        if dt <= 0.0 {
            return *prev;
        }

        let mut vel = prev.velocity;
        let was_on_ground = prev.on_ground;

        let mut target_speed = config.speed;
        if input.sprint() {
            target_speed *= config.sprint_multiplier;
        }
        if input.sneak() {
            target_speed *= config.sneak_multiplier;
        }

        let (dir_x, dir_z) = move_direction(input, normalize_yaw(input.yaw));
        let accel = if was_on_ground { config.accel } else { config.air_resistance };
        vel.x = move_towards(vel.x, (dir_x * target_speed as f64) as f32, accel * dt);
        vel.z = move_towards(vel.z, (dir_z * target_speed as f64) as f32, accel * dt);

        if was_on_ground && !input.has_movement_input() {
            vel.x = move_towards(vel.x, 0.0, config.friction * dt);
            vel.z = move_towards(vel.z, 0.0, config.friction * dt);
        }

        let dx = (vel.x * dt) as f64;
        let dz = (vel.z * dt) as f64;
        let start = prev.bounds(config);

        let broad_vel_y = if was_on_ground && input.jump() {
            config.jump_force
        } else {
            vel.y + config.gravity * dt
        };
        let broad_dy = (broad_vel_y * dt) as f64;
        let broadphase = start
            .union(&start.moved(DVec3::new(dx, broad_dy, dz)))
            .expanded(DVec3::splat(BROADPHASE_MARGIN));
        let colliders = world.collisions(&broadphase);

        let start = resolve_penetration(start, &colliders);

        let horizontal = sweep(start, DVec3::new(dx, 0.0, dz), &colliders);
        let mut best = horizontal;
        if config.step_height > 0.0 && horizontal.hit_horizontal() && was_on_ground {
            let stepped = step_up(start, dx, dz, &colliders, config.step_height as f64);
            if stepped.horizontal_sq() > best.horizontal_sq() + 1.0e-8 {
                best = stepped;
            }
        }

        let supported = was_on_ground && vel.y <= 0.0 && is_supported(&best.bounds, &colliders);
        let mut on_ground_now = best.hit_down || supported;
        let mut jumped = false;
        if on_ground_now {
            if input.jump() {
                vel.y = config.jump_force;
                on_ground_now = false;
                jumped = true;
            } else if vel.y < 0.0 {
                vel.y = 0.0;
            }
        }
        if !on_ground_now && !jumped {
            vel.y += config.gravity * dt;
        }

        let vertical = sweep(best.bounds, DVec3::new(0.0, (vel.y * dt) as f64, 0.0), &colliders);

        if best.hit_x {
            vel.x = 0.0;
        }
        if vertical.hit_y {
            vel.y = 0.0;
        }
        if best.hit_z {
            vel.z = 0.0;
        }

        let grounded = vertical.hit_down
            || (prev.on_ground && vel.y <= 0.0 && is_supported(&vertical.bounds, &colliders));
        let b = vertical.bounds;

        PlayerState {
            position: DVec3::new(b.center().x, b.min.y, b.center().z),
            velocity: vel,
            on_ground: grounded,
            colliding_horizontally: best.hit_horizontal(),
        }
    }
}

/// Outcome of sweeping a box through the collider set
#[derive(Debug, Clone, Copy)]
struct Sweep {
    bounds: Aabb,
    moved: DVec3,
    hit_x: bool,
    hit_y: bool,
    hit_z: bool,
    hit_down: bool,
}

impl Sweep {
    fn hit_horizontal(&self) -> bool {
        self.hit_x || self.hit_z
    }

    fn horizontal_sq(&self) -> f64 {
        self.moved.x * self.moved.x + self.moved.z * self.moved.z
    }
}

/// Move one axis at a time in Y, X, Z order, clipping against colliders.
fn sweep(bounds: Aabb, delta: DVec3, colliders: &[Aabb]) -> Sweep {
    let mut out = Sweep {
        bounds,
        moved: delta,
        hit_x: false,
        hit_y: false,
        hit_z: false,
        hit_down: false,
    };

    if delta.y != 0.0 {
        out.moved.y = clip_y(&out.bounds, delta.y, colliders);
        if out.moved.y != delta.y {
            out.hit_y = true;
            out.hit_down = delta.y < 0.0;
        }
        out.bounds = out.bounds.moved(DVec3::new(0.0, out.moved.y, 0.0));
    }
    if delta.x != 0.0 {
        out.moved.x = clip_x(&out.bounds, delta.x, colliders);
        out.hit_x = out.moved.x != delta.x;
        out.bounds = out.bounds.moved(DVec3::new(out.moved.x, 0.0, 0.0));
    }
    if delta.z != 0.0 {
        out.moved.z = clip_z(&out.bounds, delta.z, colliders);
        out.hit_z = out.moved.z != delta.z;
        out.bounds = out.bounds.moved(DVec3::new(0.0, 0.0, out.moved.z));
    }
    out
}

fn step_up(bounds: Aabb, dx: f64, dz: f64, colliders: &[Aabb], step: f64) -> Sweep {
    let up = sweep(bounds, DVec3::new(0.0, step, 0.0), colliders);
    let across = sweep(up.bounds, DVec3::new(dx, 0.0, dz), colliders);
    let down = sweep(across.bounds, DVec3::new(0.0, -step, 0.0), colliders);

    Sweep {
        bounds: down.bounds,
        moved: DVec3::new(across.moved.x, up.moved.y + down.moved.y, across.moved.z),
        hit_x: across.hit_x,
        hit_y: up.hit_y || down.hit_y,
        hit_z: across.hit_z,
        hit_down: down.hit_down,
    }
}

/// Clip `delta` along one axis. `lo`/`hi` pick that axis' bounds and
/// `overlaps` tests the other two.
fn clip_axis(
    bounds: &Aabb,
    delta: f64,
    colliders: &[Aabb],
    lo: impl Fn(&Aabb) -> f64,
    hi: impl Fn(&Aabb) -> f64,
    overlaps: impl Fn(&Aabb, &Aabb) -> bool,
) -> f64 {
    if delta == 0.0 {
        return 0.0;
    }
    let mut clipped = delta;
    for c in colliders.iter().filter(|c| overlaps(bounds, c)) {
        if delta > 0.0 {
            let gap = lo(c) - hi(bounds);
            if gap >= -CLIP_EPSILON && gap < clipped {
                clipped = gap;
            }
            if gap < -CLIP_EPSILON && lo(bounds) < hi(c) - CLIP_EPSILON {
                clipped = clipped.min(0.0);
            }
        } else {
            let gap = hi(c) - lo(bounds);
            if gap <= CLIP_EPSILON && gap > clipped {
                clipped = gap;
            }
            if gap > CLIP_EPSILON && hi(bounds) > lo(c) + CLIP_EPSILON {
                clipped = clipped.max(0.0);
            }
        }
    }
    clipped
}

fn clip_x(bounds: &Aabb, dx: f64, colliders: &[Aabb]) -> f64 {
    clip_axis(bounds, dx, colliders, |b| b.min.x, |b| b.max.x, Aabb::intersects_yz)
}

fn clip_y(bounds: &Aabb, dy: f64, colliders: &[Aabb]) -> f64 {
    clip_axis(bounds, dy, colliders, |b| b.min.y, |b| b.max.y, Aabb::intersects_xz)
}

fn clip_z(bounds: &Aabb, dz: f64, colliders: &[Aabb]) -> f64 {
    clip_axis(bounds, dz, colliders, |b| b.min.z, |b| b.max.z, Aabb::intersects_xy)
}

fn is_supported(bounds: &Aabb, colliders: &[Aabb]) -> bool {
    let probe = bounds.moved(DVec3::new(0.0, -SUPPORT_PROBE, 0.0));
    colliders
        .iter()
        .any(|c| probe.intersects(c) && c.max.y <= bounds.min.y + SUPPORT_PROBE + 0.001)
}

/// Push the box out of overlapping colliders along the axis of least
/// overlap, largest push first.
fn resolve_penetration(bounds: Aabb, colliders: &[Aabb]) -> Aabb {
    let mut current = bounds;
    for _ in 0..MAX_PENETRATION_ITERATIONS {
        let best = colliders
            .iter()
            .filter(|c| current.intersects(c))
            .filter_map(|c| {
                let overlap = current.max.min(c.max) - current.min.max(c.min);
                if overlap.min_element() <= 0.0 {
                    return None;
                }
                let axis = if overlap.x <= overlap.y && overlap.x <= overlap.z {
                    0
                } else if overlap.y <= overlap.z {
                    1
                } else {
                    2
                };
                let away = if current.center()[axis] < c.center()[axis] { -1.0 } else { 1.0 };
                let mut push = DVec3::ZERO;
                push[axis] = away * (overlap[axis] + PENETRATION_EPSILON);
                Some(push)
            })
            .max_by(|a, b| a.length_squared().total_cmp(&b.length_squared()));

        match best {
            Some(push) if push.length_squared() > 0.0 => current = current.moved(push),
            _ => break,
        }
    }
    current
}

fn normalize_yaw(yaw: f32) -> f32 {
    let mut y = yaw % 360.0;
    if y <= -180.0 {
        y += 360.0;
    } else if y > 180.0 {
        y -= 360.0;
    }
    y
}

/// Unit horizontal direction for the held keys; yaw 0 faces +Z.
fn move_direction(input: &PlayerInput, yaw_degrees: f32) -> (f64, f64) {
    let forward = input.forward() as i32 - input.backward() as i32;
    let strafe = input.left() as i32 - input.right() as i32;
    if forward == 0 && strafe == 0 {
        return (0.0, 0.0);
    }

    let (sin, cos) = (yaw_degrees as f64).to_radians().sin_cos();
    let (f, s) = (forward as f64, strafe as f64);
    let x = -sin * f + cos * s;
    let z = cos * f + sin * s;
    let len = (x * x + z * z).sqrt();
    if len > 1.0e-6 {
        (x / len, z / len)
    } else {
        (x, z)
    }
}

fn move_towards(current: f32, target: f32, max_delta: f32) -> f32 {
    if max_delta <= 0.0 {
        return current;
    }
    let delta = target - current;
    if delta.abs() <= max_delta {
        target
    } else {
        current + max_delta.copysign(delta)
    }
}

/// Controllers selectable by id
pub struct ControllerRegistry {
    controllers: DashMap<String, Arc<dyn BaseController>>,
}

impl ControllerRegistry {
    pub fn new() -> Self {
        let registry = Self {
            controllers: DashMap::new(),
        };
        registry.register(Arc::new(StandardController));
        registry
    }

    pub fn register(&self, controller: Arc<dyn BaseController>) {
        self.controllers.insert(controller.id().to_string(), controller);
    }

    /// Look up a controller, falling back to the default for unknown ids.
    pub fn resolve(&self, id: &str) -> Arc<dyn BaseController> {
        if let Some(controller) = self.controllers.get(id) {
            return controller.value().clone();
        }
        warn!(controller_id = %id, "Unknown movement controller, using default");
        self.default_controller()
    }

    pub fn default_controller(&self) -> Arc<dyn BaseController> {
        self.controllers
            .get(DEFAULT_CONTROLLER_ID)
            .map(|c| c.value().clone())
            .unwrap_or_else(|| Arc::new(StandardController))
    }

    pub fn ids(&self) -> Vec<String> {
        self.controllers.iter().map(|c| c.key().clone()).collect()
    }
}

impl Default for ControllerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::input::InputBits;
    use crate::world::collision::EmptyCollision;

    const DT: f32 = 0.05;

    /// Infinite-ish floor with its top at `y`, plus extra boxes.
    struct Boxes(Vec<Aabb>);

    impl Boxes {
        fn floor(y: f64) -> Self {
            Self(vec![Aabb::new(
                DVec3::new(-100.0, y - 1.0, -100.0),
                DVec3::new(100.0, y, 100.0),
            )])
        }

        fn with(mut self, b: Aabb) -> Self {
            self.0.push(b);
            self
        }
    }

    impl CollisionQuery for Boxes {
        fn collisions(&self, query: &Aabb) -> Vec<Aabb> {
            self.0.iter().filter(|b| b.intersects(query)).copied().collect()
        }
    }

    fn grounded_at(y: f64) -> PlayerState {
        PlayerState {
            on_ground: true,
            ..PlayerState::at(DVec3::new(0.0, y, 0.0))
        }
    }

    fn held(bits: InputBits) -> PlayerInput {
        PlayerInput::new(1, bits, 0.0, 0.0)
    }

    #[test]
    fn standing_still_stays_grounded() {
        let cfg = MovementConfig::default();
        let next = StandardController.step(&grounded_at(64.0), &PlayerInput::neutral(), &cfg, &Boxes::floor(64.0), DT);

        assert!(next.on_ground);
        assert!((next.position.y - 64.0).abs() < 1e-9);
        assert_eq!(next.velocity.y, 0.0);
    }

    #[test]
    fn jump_rises_then_lands_at_same_height() {
        let cfg = MovementConfig::default();
        let world = Boxes::floor(64.0);
        let mut state = StandardController.step(&grounded_at(64.0), &held(InputBits::JUMP), &cfg, &world, DT);

        assert!(!state.on_ground);
        assert!((state.velocity.y - cfg.jump_force).abs() < 1e-6);
        assert!(state.position.y > 64.0);

        let mut peak = state.position.y;
        for _ in 0..40 {
            state = StandardController.step(&state, &PlayerInput::neutral(), &cfg, &world, DT);
            peak = peak.max(state.position.y);
            if state.on_ground {
                break;
            }
        }
        assert!(state.on_ground);
        assert!(peak > 64.5);
        assert!((state.position.y - 64.0).abs() < 1e-6);
    }

    #[test]
    fn forward_at_yaw_zero_moves_along_positive_z() {
        let cfg = MovementConfig::default();
        let next = StandardController.step(&grounded_at(64.0), &held(InputBits::FORWARD), &cfg, &Boxes::floor(64.0), DT);
        assert!(next.position.z > 0.0);
        assert!(next.position.x.abs() < 1e-9);
    }

    #[test]
    fn wall_blocks_and_zeroes_velocity() {
        let cfg = MovementConfig::default();
        let wall = Aabb::new(DVec3::new(-5.0, 64.0, 0.35), DVec3::new(5.0, 70.0, 1.35));
        let world = Boxes::floor(64.0).with(wall);
        let mut state = grounded_at(64.0);
        state.velocity.z = 4.0;

        let next = StandardController.step(&state, &held(InputBits::FORWARD), &cfg, &world, DT);
        assert!(next.colliding_horizontally);
        assert_eq!(next.velocity.z, 0.0);
        assert!(next.position.z + 0.3 <= 0.35 + 1e-9);
    }

    #[test]
    fn steps_onto_low_ledge() {
        let cfg = MovementConfig::default();
        let ledge = Aabb::new(DVec3::new(-5.0, 64.0, 0.35), DVec3::new(5.0, 64.5, 5.0));
        let world = Boxes::floor(64.0).with(ledge);
        let mut state = grounded_at(64.0);
        state.velocity.z = 4.0;

        let next = StandardController.step(&state, &held(InputBits::FORWARD), &cfg, &world, DT);
        assert!((next.position.y - 64.5).abs() < 1e-6);
        assert!(next.position.z > 0.0);
    }

    #[test]
    fn free_fall_without_geometry() {
        let cfg = MovementConfig::default();
        let next = StandardController.step(&PlayerState::at(DVec3::new(0.0, 80.0, 0.0)), &PlayerInput::neutral(), &cfg, &EmptyCollision, DT);
        assert!(next.velocity.y < 0.0);
        assert!(next.position.y < 80.0);
        assert!(!next.on_ground);
    }

    #[test]
    fn embedded_player_is_pushed_out() {
        let cfg = MovementConfig::default();
        let world = Boxes::floor(64.0);
        let sunk = grounded_at(63.9);

        let next = StandardController.step(&sunk, &PlayerInput::neutral(), &cfg, &world, DT);
        assert!(next.position.y >= 64.0 - 1e-9);
    }

    #[test]
    fn yaw_normalization_wraps() {
        assert_eq!(normalize_yaw(270.0), -90.0);
        assert_eq!(normalize_yaw(-180.0), 180.0);
        assert_eq!(normalize_yaw(540.0), 180.0);
    }

    #[test]
    fn unknown_controller_falls_back() {
        let registry = ControllerRegistry::new();
        assert_eq!(registry.resolve("hover").id(), DEFAULT_CONTROLLER_ID);
        assert_eq!(registry.ids(), vec![DEFAULT_CONTROLLER_ID.to_string()]);
    }
}
