//! Connected player sessions

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::game::{PlayerDirectory, Transform};
use crate::world::WorldId;
use crate::ws::protocol::{GameMode, ServerMsg};

/// Outbound queue depth per connection
pub const OUTBOUND_BUFFER: usize = 128;

/// Engine-side view of one connected player
#[derive(Debug, Clone)]
pub struct Session {
    pub world: WorldId,
    pub game_mode: GameMode,
    pub supports_prediction: bool,
    pub online: bool,
    pub transform: Transform,
    tx: mpsc::Sender<ServerMsg>,
}

/// Registry of connected players
pub struct SessionRegistry {
    sessions: DashMap<Uuid, Session>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
        }
    }

    pub fn register(
        &self,
        player_id: Uuid,
        world: WorldId,
        spawn: Transform,
        tx: mpsc::Sender<ServerMsg>,
    ) {
        let session = Session {
            world,
            game_mode: GameMode::default(),
            supports_prediction: false,
            online: true,
            transform: spawn,
            tx,
        };
        if self.sessions.insert(player_id, session).is_some() {
            warn!(player_id = %player_id, "Session replaced by a new connection");
        }
    }

    /// Drop the session only while it still belongs to the connection
    /// owning `tx`. A newer connection for the same player is left alone.
    pub fn unregister(&self, player_id: Uuid, tx: &mpsc::Sender<ServerMsg>) -> bool {
        self.sessions
            .remove_if(&player_id, |_, session| session.tx.same_channel(tx))
            .is_some()
    }

    pub fn set_supports_prediction(&self, player_id: Uuid, supported: bool) {
        if let Some(mut session) = self.sessions.get_mut(&player_id) {
            session.supports_prediction = supported;
        }
    }

    /// Returns the previous mode when it actually changed.
    pub fn set_game_mode(&self, player_id: Uuid, mode: GameMode) -> Option<GameMode> {
        let mut session = self.sessions.get_mut(&player_id)?;
        let previous = std::mem::replace(&mut session.game_mode, mode);
        (previous != mode).then_some(previous)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl PlayerDirectory for SessionRegistry {
    fn world_of(&self, player: Uuid) -> Option<WorldId> {
        self.sessions.get(&player).map(|s| s.world)
    }

    fn is_online(&self, player: Uuid) -> bool {
        self.sessions
            .get(&player)
            .map(|s| s.online && !s.tx.is_closed())
            .unwrap_or(false)
    }

    fn expects_snapshots(&self, player: Uuid) -> bool {
        self.sessions
            .get(&player)
            .map(|s| s.supports_prediction)
            .unwrap_or(false)
    }

    fn transform(&self, player: Uuid) -> Option<Transform> {
        self.sessions.get(&player).map(|s| s.transform)
    }

    fn apply_transform(&self, player: Uuid, transform: Transform) {
        if let Some(mut session) = self.sessions.get_mut(&player) {
            session.transform = transform;
        }
    }

    fn send(&self, player: Uuid, msg: ServerMsg) -> bool {
        let Some(tx) = self.sessions.get(&player).map(|s| s.tx.clone()) else {
            return false;
        };
        match tx.try_send(msg) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                debug!(player_id = %player, "Outbound queue full, dropping message");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }
}
