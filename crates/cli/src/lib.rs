//! The garble binary's internals: driver commands, tool hooks, and their
//! supporting plumbing. Exposed as a library so integration tests can
//! drive the transforms without spawning processes.

pub mod buildinfo;
pub mod compile;
pub mod driver;
pub mod flags;
pub mod gotool;
pub mod link;
pub mod reverse;
pub mod version;
