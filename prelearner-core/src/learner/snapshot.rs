//! Serialized module state

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::batch::ModuleId;

/// Component name under which learners expose their module state
pub const COMPONENT_RL_MODULE: &str = "rl_module";

/// Opaque parameters of every module in a multi-module, keyed by module id
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSnapshot {
    modules: BTreeMap<ModuleId, Bytes>,
}

impl ModelSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_module(mut self, module_id: impl Into<ModuleId>, state: impl Into<Bytes>) -> Self {
        self.modules.insert(module_id.into(), state.into());
        self
    }

    pub fn module(&self, module_id: &str) -> Option<&Bytes> {
        self.modules.get(module_id)
    }

    pub fn module_ids(&self) -> Vec<ModuleId> {
        self.modules.keys().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// Total parameter bytes
    pub fn size(&self) -> usize {
        self.modules.values().map(Bytes::len).sum()
    }

    /// CRC32C over length-prefixed module ids and states, in id order
    ///
    /// A fingerprint for logs. Equal checksums do not imply equal states.
    pub fn checksum(&self) -> u32 {
        self.modules.iter().fold(0u32, |crc, (id, state)| {
            let crc = crc32c::crc32c_append(crc, &(id.len() as u64).to_le_bytes());
            let crc = crc32c::crc32c_append(crc, id.as_bytes());
            let crc = crc32c::crc32c_append(crc, &(state.len() as u64).to_le_bytes());
            crc32c::crc32c_append(crc, state)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum_tracks_content() {
        let a = ModelSnapshot::new().with_module("p0", Bytes::from_static(b"weights-v1"));
        let b = ModelSnapshot::new().with_module("p0", Bytes::from_static(b"weights-v1"));
        let c = ModelSnapshot::new().with_module("p0", Bytes::from_static(b"weights-v2"));
        assert_eq!(a.checksum(), b.checksum());
        assert_ne!(a.checksum(), c.checksum());
        assert_eq!(a.size(), 10);
    }

    #[test]
    fn test_checksum_separates_id_from_state() {
        let a = ModelSnapshot::new().with_module("p0", Bytes::from_static(b"ab"));
        let b = ModelSnapshot::new().with_module("p0a", Bytes::from_static(b"b"));
        assert_ne!(a, b);
        assert_ne!(a.checksum(), b.checksum());
    }
}
