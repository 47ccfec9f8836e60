//! Child process primitives.
//!
//! Covers the immutable spawn description, the handle over a running
//! child, and the escalating kill sequence.

pub mod child;
pub mod spawn_spec;
pub mod termination;

pub use child::{ChildHandle, StdioModes, Stream, StreamMode};
pub use spawn_spec::{ChildEnv, SpawnSpec};
pub use termination::{KillEscalation, TerminationState};
