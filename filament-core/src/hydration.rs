//! Hydration Payloads
//!
//! State that crosses from a server render to the client. The server
//! snapshots every keyed signal of its runtime into a [`HydrationPayload`];
//! the client stages those values on its own runtime before the view runs,
//! so [`Runtime::use_keyed`] picks them up instead of its initial value.
//!
//! # How Seeding Works
//!
//! A seed only applies to a keyed signal that does not exist yet. Signals
//! created before hydration keep their value, and a seed whose JSON does
//! not deserialize into the signal's type is dropped with a warning.
//!
//! Payloads travel as JSON or, more compactly, as MessagePack with named
//! fields.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::config::HYDRATION_VERSION;
use crate::error::HydrationError;
use crate::reactive::Runtime;

/// Serialized keyed-signal state, tagged with a format version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HydrationPayload {
    pub version: u32,
    pub signals: BTreeMap<String, serde_json::Value>,
}

impl Default for HydrationPayload {
    fn default() -> Self {
        Self::new(HYDRATION_VERSION)
    }
}

impl HydrationPayload {
    pub fn new(version: u32) -> Self {
        Self {
            version,
            signals: BTreeMap::new(),
        }
    }

    /// Snapshot every keyed signal of `runtime`, stamped with its configured
    /// version.
    pub fn collect(runtime: &Runtime) -> Self {
        Self {
            version: runtime.config().hydration_version,
            signals: runtime.snapshot_keyed().into_iter().collect(),
        }
    }

    pub fn insert<T: Serialize>(&mut self, key: impl Into<String>, value: &T) -> Result<(), HydrationError> {
        let value = serde_json::to_value(value).map_err(|err| HydrationError::Encode(err.to_string()))?;
        self.signals.insert(key.into(), value);
        Ok(())
    }

    pub fn get<T: for<'de> Deserialize<'de>>(&self, key: &str) -> Result<Option<T>, HydrationError> {
        self.signals
            .get(key)
            .map(|value| serde_json::from_value(value.clone()).map_err(HydrationError::from))
            .transpose()
    }

    pub fn len(&self) -> usize {
        self.signals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.signals.is_empty()
    }

    pub fn to_json(&self) -> Result<String, HydrationError> {
        serde_json::to_string(self).map_err(|err| HydrationError::Encode(err.to_string()))
    }

    pub fn from_json(json: &str) -> Result<Self, HydrationError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_msgpack(&self) -> Result<Vec<u8>, HydrationError> {
        Ok(rmp_serde::to_vec_named(self)?)
    }

    pub fn from_msgpack(bytes: &[u8]) -> Result<Self, HydrationError> {
        Ok(rmp_serde::from_slice(bytes)?)
    }
}

impl Runtime {
    /// Stage `payload` as seeds for keyed signals not created yet.
    ///
    /// Returns how many seeds were staged.
    pub fn try_hydrate(&self, payload: &HydrationPayload) -> Result<usize, HydrationError> {
        let expected = self.config().hydration_version;
        if payload.version != expected {
            return Err(HydrationError::VersionMismatch {
                expected,
                found: payload.version,
            });
        }

        let before = self.pending_seed_count();
        self.stage_seeds(payload.signals.iter().map(|(k, v)| (k.clone(), v.clone())));
        let staged = self.pending_seed_count().saturating_sub(before);
        tracing::debug!(staged, offered = payload.len(), "hydration seeds staged");
        Ok(staged)
    }

    /// Like [`Runtime::try_hydrate`], but a payload from another version is
    /// ignored with a warning and the client renders from initial values.
    pub fn hydrate(&self, payload: &HydrationPayload) -> usize {
        match self.try_hydrate(payload) {
            Ok(staged) => staged,
            Err(err) => {
                tracing::warn!(error = %err, "ignoring hydration payload");
                0
            }
        }
    }
}
