//! Authoritative movement simulation loop
//!
//! One fixed-rate task steps every predicted player: pull the next input,
//! run the block-only base controller, refine through the mesh mirror,
//! commit, write the transform back and send a correction snapshot.

use dashmap::DashMap;
use glam::{DVec3, Vec3};
use serde::Serialize;
use std::collections::HashSet;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::controller::ControllerRegistry;
use super::input::PlayerInput;
use super::player::{SimPlayer, SimSlot};
use super::refine::MeshPass;
use super::snapshot::{self, SnapshotStats};
use super::state::{MovementConfig, PlayerState, Transform};
use crate::config::Config;
use crate::mirror::{guarded, MirrorStats, SharedMirror};
use crate::util::time::TickBudget;
use crate::world::{Aabb, BlockCollisionView, SharedWorld, WorldId, WorldRegistry, WorldView};
use crate::ws::protocol::{GameMode, ServerMsg};

/// How far an engine move may sit from the written position and still count
/// as its echo
const ECHO_TOLERANCE: f64 = 1.0e-3;

/// Connectivity and engine surface the loop needs for each player
pub trait PlayerDirectory: Send + Sync {
    fn world_of(&self, player: Uuid) -> Option<WorldId>;

    fn is_online(&self, player: Uuid) -> bool;

    /// Client runs prediction and consumes snapshots and mode messages
    fn expects_snapshots(&self, player: Uuid) -> bool;

    fn transform(&self, player: Uuid) -> Option<Transform>;

    /// Out-of-band position write that bypasses engine movement checks
    fn apply_transform(&self, player: Uuid, transform: Transform);

    /// Best-effort send; false when the message was not queued
    fn send(&self, player: Uuid, msg: ServerMsg) -> bool;
}

/// Loop tuning
#[derive(Debug, Clone, Copy)]
pub struct SimSettings {
    pub tick_rate: u32,
    pub input_decay_ticks: u32,
    pub push_strength: f32,
}

impl Default for SimSettings {
    fn default() -> Self {
        Self {
            tick_rate: 20,
            input_decay_ticks: 6,
            push_strength: 0.35,
        }
    }
}

impl SimSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            tick_rate: config.tick_rate,
            input_decay_ticks: config.input_decay_ticks,
            push_strength: config.player_push_strength,
        }
    }

    /// Fixed step in seconds
    pub fn dt(&self) -> f32 {
        1.0 / self.tick_rate.max(1) as f32
    }

    pub fn tick_duration(&self) -> Duration {
        Duration::from_micros(1_000_000 / self.tick_rate.max(1) as u64)
    }
}

/// Counters reported by `/stats`
#[derive(Debug, Clone, Serialize)]
pub struct SimStats {
    pub predicted_players: usize,
    pub ticks: u64,
    pub snapshots_sent: u64,
    pub snapshots_dropped: u64,
    pub mesh_refinement: bool,
    pub mirror: Option<MirrorStats>,
}

/// What a tick did, for tests and debug logs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub stepped: usize,
    pub skipped: usize,
    pub failed: usize,
    pub pruned: usize,
}

struct Push {
    world: WorldId,
    bounds: Aabb,
    velocity: Vec3,
}

/// Owns every predicted player and drives them at a fixed rate
pub struct SimService {
    players: DashMap<Uuid, Arc<SimSlot>>,
    controllers: ControllerRegistry,
    worlds: Arc<WorldRegistry>,
    mirror: Option<SharedMirror>,
    directory: Arc<dyn PlayerDirectory>,
    settings: SimSettings,
    ticks: AtomicU64,
    snapshots: SnapshotStats,
}

impl SimService {
    pub fn new(
        worlds: Arc<WorldRegistry>,
        mirror: Option<SharedMirror>,
        directory: Arc<dyn PlayerDirectory>,
        settings: SimSettings,
    ) -> Self {
        Self {
            players: DashMap::new(),
            controllers: ControllerRegistry::new(),
            worlds,
            mirror,
            directory,
            settings,
            ticks: AtomicU64::new(0),
            snapshots: SnapshotStats::default(),
        }
    }

    pub fn settings(&self) -> SimSettings {
        self.settings
    }

    /// Run the fixed-rate loop forever
    pub async fn run(self: Arc<Self>) {
        info!(
            tick_rate = self.settings.tick_rate,
            mesh_refinement = self.mirror.is_some(),
            "Movement simulation started"
        );

        let tick_duration = self.settings.tick_duration();
        let mut tick_interval = interval(tick_duration);
        tick_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tick_interval.tick().await;

            let budget = TickBudget::start(tick_duration);
            let report = self.tick();

            if report.failed > 0 {
                warn!(failed = report.failed, "Players skipped after a failed step");
            }
            if let Some(spent) = budget.overrun() {
                warn!(
                    elapsed_micros = spent.as_micros() as u64,
                    budget_micros = budget.budget().as_micros() as u64,
                    stepped = report.stepped,
                    "Simulation tick overran its budget"
                );
            }
        }
    }

    /// Step every predicted player once
    pub fn tick(&self) -> TickReport {
        let mut report = TickReport::default();
        if self.players.is_empty() {
            return report;
        }

        let dt = self.settings.dt();
        let slots: Vec<(Uuid, Arc<SimSlot>)> = self
            .players
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect();

        let mut synced = HashSet::new();
        let mut offline = Vec::new();

        for (player_id, slot) in slots {
            if !self.directory.is_online(player_id) {
                offline.push(player_id);
                continue;
            }
            let Some(world) = self
                .directory
                .world_of(player_id)
                .and_then(|id| self.worlds.get(id))
            else {
                report.skipped += 1;
                continue;
            };

            let stepped = catch_unwind(AssertUnwindSafe(|| {
                self.step_player(player_id, &slot, &world, &mut synced, dt)
            }));
            match stepped {
                Ok(Some(push)) => {
                    report.stepped += 1;
                    self.worlds.apply_player_push(
                        push.world,
                        &push.bounds,
                        push.velocity,
                        self.settings.push_strength,
                    );
                }
                Ok(None) => report.skipped += 1,
                Err(_) => {
                    error!(player_id = %player_id, "Movement step panicked");
                    report.failed += 1;
                }
            }
        }

        for player_id in offline {
            if self.players.remove(&player_id).is_some() {
                debug!(player_id = %player_id, "Pruned offline predicted player");
                report.pruned += 1;
            }
        }

        self.ticks.fetch_add(1, Ordering::Relaxed);
        report
    }

    fn step_player(
        &self,
        player_id: Uuid,
        slot: &SimSlot,
        world: &SharedWorld,
        synced: &mut HashSet<WorldId>,
        dt: f32,
    ) -> Option<Push> {
        let mut sim = slot.sim.lock();
        let world = world.read();
        let world_id = world.id();

        let mut mirror = self.mirror.as_ref().map(|m| m.lock());
        if let Some(mirror) = mirror.as_deref_mut() {
            if synced.insert(world_id) {
                if let Err(e) = guarded("mesh sync", || mirror.sync_meshes_for_world(&*world)) {
                    warn!(world_id = %world_id, error = %e, "Mesh sync failed");
                }
            }
        }

        let input = sim.next_input(&slot.backlog, self.settings.input_decay_ticks);
        let config = sim.config;
        let prev = sim.state;
        let collision = BlockCollisionView::new(&*world);
        let probe = mirror
            .as_deref_mut()
            .and_then(|m| sim.ensure_probe(m).cloned());

        let next = match (mirror.as_deref_mut(), probe.as_ref()) {
            (Some(mirror), Some(probe)) => {
                let mut pass = MeshPass {
                    mirror,
                    world: world_id,
                    probe,
                    config: &config,
                    dt,
                    player_id,
                };
                let start = pass.settle_on_mesh_ground(prev);
                let base = sim.controller.step(&start, &input, &config, &collision, dt);
                pass.refine(&start, base)
            }
            _ => sim.controller.step(&prev, &input, &config, &collision, dt),
        };
        drop(mirror);

        if !next.position.is_finite() || !next.velocity.is_finite() {
            warn!(player_id = %player_id, "Non-finite movement result discarded");
            return None;
        }

        sim.state = next;
        let ack = sim.last_applied_seq;
        drop(sim);

        slot.arm_move_suppression();
        self.directory.apply_transform(
            player_id,
            Transform::new(next.position, input.yaw, input.pitch),
        );

        if self.directory.expects_snapshots(player_id) {
            let delivered = self.directory.send(player_id, snapshot::correction(ack, &next));
            self.snapshots.record(delivered);
        }

        Some(Push {
            world: world_id,
            bounds: next.bounds(&config),
            velocity: next.velocity,
        })
    }

    /// Queue a client input. Ignored for players without prediction and for
    /// sequence zero.
    pub fn handle_input(&self, player_id: Uuid, input: PlayerInput) -> bool {
        if input.sequence == 0 {
            return false;
        }
        match self.players.get(&player_id) {
            Some(slot) => slot.backlog.push(input),
            None => false,
        }
    }

    /// Gate an engine-originated move. Predicted players keep their
    /// authoritative position and only take the look direction. The one
    /// move echoing a simulation write passes through untouched, and only
    /// when it lands where that write put the player.
    pub fn filter_engine_move(&self, player_id: Uuid, incoming: Transform) -> Transform {
        let Some(slot) = self.slot(player_id) else {
            return incoming;
        };
        let position = slot.sim.lock().state.position;
        let is_echo =
            incoming.position.distance_squared(position) <= ECHO_TOLERANCE * ECHO_TOLERANCE;
        if is_echo && slot.take_move_suppression() {
            return incoming;
        }
        if !is_echo {
            debug!(player_id = %player_id, "Engine move replaced by authoritative position");
        }
        Transform::new(position, incoming.yaw, incoming.pitch)
    }

    /// Enable, reconfigure or disable prediction for a player, then tell a
    /// prediction-capable client about the new mode.
    pub fn set_prediction_mode(
        &self,
        player_id: Uuid,
        enabled: bool,
        controller_id: Option<&str>,
        config: Option<MovementConfig>,
    ) {
        if enabled {
            let controller = match controller_id {
                Some(id) => self.controllers.resolve(id),
                None => self.controllers.default_controller(),
            };

            if let Some(slot) = self.slot(player_id) {
                let mut sim = slot.sim.lock();
                sim.set_controller(controller);
                if let Some(config) = config {
                    sim.set_config(config);
                }
                debug!(player_id = %player_id, controller_id = %sim.controller_id, "Prediction reconfigured");
            } else {
                let position = self
                    .directory
                    .transform(player_id)
                    .map(|t| t.position)
                    .unwrap_or(DVec3::ZERO);
                let sim = SimPlayer::new(
                    player_id,
                    PlayerState::at(position),
                    config.unwrap_or_default(),
                    controller,
                );
                self.players.insert(player_id, Arc::new(SimSlot::new(sim)));
                info!(player_id = %player_id, "Prediction enabled");
            }
        } else if self.players.remove(&player_id).is_some() {
            info!(player_id = %player_id, "Prediction disabled");
        }

        self.flush_client_mode(player_id);
    }

    /// Resend the current mode to a prediction-capable client
    pub fn flush_client_mode(&self, player_id: Uuid) {
        if !self.directory.expects_snapshots(player_id) {
            return;
        }
        let msg = match self.slot(player_id) {
            Some(slot) => snapshot::physics_mode(Some(&*slot.sim.lock())),
            None => snapshot::physics_mode(None),
        };
        self.directory.send(player_id, msg);
    }

    pub fn is_prediction_enabled(&self, player_id: Uuid) -> bool {
        self.players.contains_key(&player_id)
    }

    /// Authoritative state of a predicted player
    #[cfg(test)]
    pub fn state_of(&self, player_id: Uuid) -> Option<PlayerState> {
        self.slot(player_id).map(|slot| slot.sim.lock().state)
    }

    pub fn on_disconnect(&self, player_id: Uuid) {
        if self.players.remove(&player_id).is_some() {
            debug!(player_id = %player_id, "Predicted player disconnected");
        }
    }

    /// Flight and spectator modes are engine-native; any mode change drops
    /// prediction.
    pub fn on_game_mode_change(&self, player_id: Uuid, mode: GameMode) {
        if self.is_prediction_enabled(player_id) {
            info!(player_id = %player_id, mode = ?mode, "Game mode changed, disabling prediction");
            self.set_prediction_mode(player_id, false, None, None);
        }
    }

    pub fn predicted_players(&self) -> usize {
        self.players.len()
    }

    pub fn stats(&self) -> SimStats {
        SimStats {
            predicted_players: self.players.len(),
            ticks: self.ticks.load(Ordering::Relaxed),
            snapshots_sent: self.snapshots.sent(),
            snapshots_dropped: self.snapshots.dropped(),
            mesh_refinement: self.mirror.is_some(),
            mirror: self.mirror.as_ref().map(|m| m.lock().stats()),
        }
    }

    fn slot(&self, player_id: Uuid) -> Option<Arc<SimSlot>> {
        self.players.get(&player_id).map(|s| s.value().clone())
    }
}
