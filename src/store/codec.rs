//! Version-tagged JSON records
//!
//! Every durable value is written as `{"version": N, ...fields}` so the
//! schema can evolve without silently mis-decoding older data.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::error::{Result, StoreError};

/// Current schema version for all records
pub const RECORD_VERSION: u32 = 1;

#[derive(Serialize)]
struct Tagged<'a, T> {
    version: u32,
    #[serde(flatten)]
    body: &'a T,
}

#[derive(Deserialize)]
struct VersionProbe {
    version: u32,
}

#[derive(Deserialize)]
struct Untagged<T> {
    #[serde(flatten)]
    body: T,
}

pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    let tagged = Tagged {
        version: RECORD_VERSION,
        body: value,
    };
    Ok(serde_json::to_vec(&tagged)?)
}

pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    let probe: VersionProbe = serde_json::from_slice(bytes)?;
    if probe.version != RECORD_VERSION {
        return Err(StoreError::UnsupportedVersion {
            found: probe.version,
            expected: RECORD_VERSION,
        });
    }

    let record: Untagged<T> = serde_json::from_slice(bytes)?;
    Ok(record.body)
}
