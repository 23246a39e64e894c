//! # flotilla-types
//!
//! Data model for the flotilla cluster orchestrator.
//!
//! ## Design Principles
//!
//! - Jobs and machines are plain records; behavior lives in the engine
//! - Unit files are content-addressed by a digest of their canonical text
//! - Every type that crosses the registry boundary has a stable JSON form
//! - Requirement predicates are derived from unit file options, never stored
//!   separately

mod job;
mod machine;
mod resources;
mod unit;
mod unit_state;

pub use job::{Job, TargetState, TargetStateParseError};
pub use machine::{version_at_least, MachineState};
pub use resources::Resources;
pub use unit::{UnitFile, UnitHash, UnitOption, FLOTILLA_SECTION};
pub use unit_state::UnitState;
