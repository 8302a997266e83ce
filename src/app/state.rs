//! Application state shared across routes

use glam::DVec3;
use std::panic::catch_unwind;
use std::sync::Arc;
use tracing::{error, info};

use crate::config::Config;
use crate::game::{SimService, SimSettings, Transform};
use crate::mirror::{self, MirrorWorld, SharedMirror};
use crate::world::{InstanceWorld, ModelLibrary, WorldId, WorldRegistry, WorldView};
use crate::ws::SessionRegistry;

/// Block layer forming the default world's floor
pub const DEFAULT_FLOOR_Y: i32 = 63;
/// Half extent of the default world's floor, in blocks
pub const DEFAULT_FLOOR_RADIUS: i32 = 64;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub worlds: Arc<WorldRegistry>,
    pub sessions: Arc<SessionRegistry>,
    pub sim: Arc<SimService>,
    pub default_world: WorldId,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let config = Arc::new(config);

        // Initialize mesh mirror
        let mirror = if config.mesh_refinement {
            build_mirror()
        } else {
            info!("Mesh refinement disabled by configuration");
            None
        };

        // Initialize worlds
        let library = Arc::new(ModelLibrary::new());
        let worlds = Arc::new(WorldRegistry::new(library.clone(), mirror.clone()));
        let default_world = worlds
            .insert(InstanceWorld::flat(
                WorldId::new(),
                library,
                DEFAULT_FLOOR_Y,
                DEFAULT_FLOOR_RADIUS,
            ))
            .read()
            .id();

        // Initialize sessions and simulation
        let sessions = Arc::new(SessionRegistry::new());
        let sim = Arc::new(SimService::new(
            worlds.clone(),
            mirror,
            sessions.clone(),
            SimSettings::from_config(&config),
        ));

        Self {
            config,
            worlds,
            sessions,
            sim,
            default_world,
        }
    }

    /// Where new connections appear
    pub fn spawn_point(&self) -> Transform {
        Transform::new(DVec3::new(0.5, (DEFAULT_FLOOR_Y + 1) as f64, 0.5), 0.0, 0.0)
    }
}

/// Mirror construction failure leaves the server running block-only.
fn build_mirror() -> Option<SharedMirror> {
    match catch_unwind(MirrorWorld::new) {
        Ok(world) => Some(mirror::shared(world)),
        Err(_) => {
            error!("Mesh mirror failed to initialize, running with block collision only");
            None
        }
    }
}
