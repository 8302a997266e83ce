//! Authoritative movement simulation modules

pub mod controller;
pub mod input;
pub mod player;
pub mod refine;
pub mod sim;
pub mod snapshot;
pub mod state;

pub use input::PlayerInput;
pub use sim::{PlayerDirectory, SimService, SimSettings, SimStats};
pub use state::{MovementConfig, Transform};
