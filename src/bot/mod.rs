pub mod alerts;
pub mod consensus;
pub mod engine;
pub mod poller;
pub mod selector;
pub mod staking;

pub use engine::EvEngine;
pub use poller::{run_poll_loop, PollSettings};
