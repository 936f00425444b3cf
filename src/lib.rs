//! Decision core of an autonomous colony manager: per-colony state cache,
//! resource-site assignment, construction tracking, workforce scheduling and
//! threat scanning, rebuilt every process start from a persisted store and
//! live world queries.

pub mod colony;
pub mod config;
pub mod constants;
pub mod construction;
pub mod error;
pub mod layout;
pub mod location;
pub mod memory;
pub mod mining;
pub mod overseer;
pub mod store;
pub mod terrain;
pub mod threat;
pub mod workforce;
pub mod world;

pub use config::OverseerConfig;
pub use error::*;
pub use overseer::{Directive, LifecycleSignal, Overseer, TickReport};
pub use store::{MemoryStore, PersistentStore};
pub use world::{SimWorld, WorldQuery};
