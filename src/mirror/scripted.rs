//! Scripted mirror for simulation tests

use super::{
    GroundProbe, MeshMirror, MirrorError, MirrorStats, MoveRequest, MoveResult, ProbeCharacter,
    SyncReport,
};
use crate::world::{Primitive, PrimitiveId, WorldId, WorldView};

type MoveScript = Box<dyn FnMut(&MoveRequest) -> MoveResult + Send>;

/// Mirror whose answers are decided by the test.
/// Without a script every move is unobstructed and no ground is found.
pub struct ScriptedMirror {
    pub moves: Vec<MoveRequest>,
    pub ground_probes: Vec<GroundProbe>,
    pub syncs: usize,
    pub probes_created: usize,
    pub ground: bool,
    pub fail: bool,
    /// Panic inside sync, move and probe calls
    pub panic: bool,
    script: Option<MoveScript>,
}

impl ScriptedMirror {
    pub fn new() -> Self {
        Self {
            moves: Vec::new(),
            ground_probes: Vec::new(),
            syncs: 0,
            probes_created: 0,
            ground: false,
            fail: false,
            panic: false,
            script: None,
        }
    }

    pub fn with_script(
        script: impl FnMut(&MoveRequest) -> MoveResult + Send + 'static,
    ) -> Self {
        Self {
            script: Some(Box::new(script)),
            ..Self::new()
        }
    }

    fn failure() -> MirrorError {
        MirrorError::MeshBuild {
            target: "scripted".into(),
            reason: "forced failure".into(),
        }
    }
}

impl MeshMirror for ScriptedMirror {
    fn sync_meshes_for_world(&mut self, _world: &dyn WorldView) -> Result<SyncReport, MirrorError> {
        self.syncs += 1;
        if self.panic {
            panic!("scripted sync panic");
        }
        Ok(SyncReport::default())
    }

    fn upsert_chunk_mesh(
        &mut self,
        _world: WorldId,
        _chunk_x: i32,
        _chunk_z: i32,
        _vertices: &[f32],
        _indices: &[u32],
    ) -> Result<(), MirrorError> {
        Ok(())
    }

    fn remove_chunk_mesh(&mut self, _world: WorldId, _chunk_x: i32, _chunk_z: i32) -> bool {
        false
    }

    fn upsert_primitive(&mut self, _world: WorldId, _primitive: &Primitive) -> Result<(), MirrorError> {
        Ok(())
    }

    fn remove_primitive(&mut self, _world: WorldId, _id: PrimitiveId) -> bool {
        false
    }

    fn remove_world(&mut self, _world: WorldId) -> usize {
        0
    }

    fn create_probe(&mut self, width: f32, height: f32) -> Result<ProbeCharacter, MirrorError> {
        self.probes_created += 1;
        ProbeCharacter::new(width, height)
    }

    fn move_character(
        &mut self,
        _world: WorldId,
        _probe: &ProbeCharacter,
        request: &MoveRequest,
    ) -> Result<MoveResult, MirrorError> {
        self.moves.push(*request);
        if self.panic {
            panic!("scripted move panic");
        }
        if self.fail {
            return Err(Self::failure());
        }
        Ok(match self.script.as_mut() {
            Some(script) => script(request),
            None => MoveResult::unobstructed(request.displacement),
        })
    }

    fn probe_ground(
        &mut self,
        _world: WorldId,
        _probe: &ProbeCharacter,
        request: &GroundProbe,
    ) -> Result<bool, MirrorError> {
        self.ground_probes.push(*request);
        if self.panic {
            panic!("scripted probe panic");
        }
        if self.fail {
            return Err(Self::failure());
        }
        Ok(self.ground)
    }

    fn stats(&self) -> MirrorStats {
        MirrorStats::default()
    }
}
