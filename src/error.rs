use crate::workforce::{MemoryKey, Role};
use thiserror::Error;

/// Malformed static configuration. Fatal at boot.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("tier {tier} has no workforce list")]
    MissingTier { tier: u8 },

    #[error("descriptor for {role} has an empty body")]
    EmptyBody { role: Role },

    #[error("descriptor for {role} has {parts} body parts (max {max})")]
    BodyTooLong { role: Role, parts: usize, max: usize },

    #[error("role {role} appears more than once in the tier {tier} list")]
    DuplicateRole { role: Role, tier: u8 },

    #[error("descriptor for {role} requires memory key {key:?} which is never supplied")]
    MissingMemory { role: Role, key: MemoryKey },

    #[error("override for colony {colony} names {role}, which has no standard descriptor")]
    UnknownOverrideRole { colony: String, role: Role },

    #[error("config record could not be decoded: {0}")]
    Undecodable(#[from] StoreError),
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("failed to decode {key}: {source}")]
    Decode {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to encode {key}: {source}")]
    Encode {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Host-side refusal to instantiate a worker.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SpawnError {
    #[error("spawn is busy")]
    Busy,

    #[error("not enough energy")]
    NotEnoughEnergy,

    #[error("a worker named {0} already exists")]
    NameExists(String),

    #[error("spawn point no longer exists")]
    InvalidTarget,

    #[error("host returned code {0}")]
    Other(i32),
}

#[derive(Error, Debug)]
pub enum OverseerError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
}
