pub mod fixtures;
pub mod mocks;

#[allow(unused_imports)]
pub use fixtures::{fixed_time, job, profile, registry};
#[allow(unused_imports)]
pub use mocks::{CountingConnector, MemoryStore, ScriptedDumper};
