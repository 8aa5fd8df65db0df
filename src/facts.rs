// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Resolved OpenAMP facts handed to downstream header generators.
// Author: Lukas Bower

//! Result surface of a resolution run.
//!
//! Keys are `{resource_group_name}{suffix}` or `channel{N}_to_group`; values
//! are hex addresses, sentinel tokens or labels.

use std::collections::BTreeMap;

use serde::Serialize;

/// Ring address sentinel meaning "let the remote pick".
pub const RING_ADDR_ANY: &str = "FW_RSC_U32_ADDR_ANY";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct AppInputs {
    entries: BTreeMap<String, String>,
}

impl AppInputs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn record_carveout(&mut self, group: &str, region: &str, base: u64, size: u64) {
        self.insert(format!("{group}{region}_base"), hex(base));
        self.insert(format!("{group}{region}_size"), hex(size));
    }

    pub fn record_bitmasks(&mut self, group: &str, host: u32, remote: u32) {
        self.insert(format!("{group}-host-bitmask"), hex(host.into()));
        self.insert(format!("{group}-remote-bitmask"), hex(remote.into()));
    }

    /// Kernel-mediated channels let the remote place its vrings.
    pub fn record_any_ring_addresses(&mut self) {
        self.insert("ring_tx", RING_ADDR_ANY);
        self.insert("ring_rx", RING_ADDR_ANY);
    }

    pub fn record_remote_ipi(&mut self, group: &str, base: u32, vect_id: u32) {
        self.insert(format!("{group}-remote-ipi"), hex(base.into()));
        self.insert(format!("{group}-remote-ipi-irq-vect-id"), vect_id.to_string());
    }

    pub fn record_channel(&mut self, index: usize, group: &str) {
        self.insert(format!("channel{index}_to_group"), format!("{index}-to-{group}"));
    }

    /// Merge facts from another run; later values win.
    pub fn extend(&mut self, other: AppInputs) {
        self.entries.extend(other.entries);
    }
}

/// Lowercase `0x`-prefixed hex, `0x0` for zero.
pub fn hex(value: u64) -> String {
    format!("{value:#x}")
}
