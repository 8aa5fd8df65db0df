// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Decode RPU cpus words and IPI mailbox register layouts.
// Author: Lukas Bower

//! Bitfield decoding for cluster `cpus` properties and mailbox registers.
//!
//! `cpus` on an RPU cluster reads `<&cluster core-mask execution-mode>`.
//! Execution mode bit 31 selects secure mode, bit 30 lockstep.

use bitflags::bitflags;

use crate::error::{AmpError, AmpResult};
use crate::platform::AGENT_MASK;
use crate::tree::{Node, Phandle};

bitflags! {
    /// Execution-mode word of an ARM-R `cpus` property.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ExecMode: u32 {
        const LOCKSTEP = 1 << 30;
        const SECURE = 1 << 31;
    }
}

bitflags! {
    /// Core selection mask of a `cpus` property.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CoreMask: u32 {
        const R5_0 = 0b01;
        const R5_1 = 0b10;
    }
}

/// Decoded `cpus` property.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CpusProp {
    pub cluster: Phandle,
    pub core_mask: CoreMask,
    pub mode: ExecMode,
}

impl CpusProp {
    pub fn decode(node: &Node) -> AmpResult<Self> {
        let cells = node.cells("cpus");
        if cells.is_empty() {
            return Err(AmpError::MissingProperty {
                node: node.path().to_owned(),
                prop: "cpus",
            });
        }
        let [cluster, mask, mode] = cells else {
            return Err(AmpError::MalformedProperty {
                node: node.path().to_owned(),
                prop: "cpus",
                reason: format!("expected 3 cells, found {}", cells.len()),
            });
        };
        Ok(Self {
            cluster: *cluster,
            core_mask: CoreMask::from_bits_retain(*mask),
            mode: ExecMode::from_bits_retain(*mode),
        })
    }

    pub fn lockstep(&self) -> bool {
        self.mode.contains(ExecMode::LOCKSTEP)
    }
}

/// Local and remote request-region addresses of a mailbox controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestRegions {
    pub local: u32,
    pub remote: u32,
}

impl RequestRegions {
    /// Locate both regions by name in `reg-names` and read their `reg` address.
    ///
    /// `reg` holds one `<address size>` pair per name.
    pub fn decode(mbox: &Node) -> AmpResult<Self> {
        Ok(Self {
            local: region_address(mbox, "local_request_region")?,
            remote: region_address(mbox, "remote_request_region")?,
        })
    }

    pub fn local_agent(&self) -> u32 {
        agent_of(self.local)
    }

    pub fn remote_agent(&self) -> u32 {
        agent_of(self.remote)
    }
}

fn region_address(mbox: &Node, region: &'static str) -> AmpResult<u32> {
    let idx = mbox
        .strings("reg-names")
        .iter()
        .position(|name| name == region)
        .ok_or_else(|| AmpError::MalformedProperty {
            node: mbox.path().to_owned(),
            prop: "reg-names",
            reason: format!("no {region}"),
        })?;
    mbox.cells("reg")
        .get(idx * 2)
        .copied()
        .ok_or_else(|| AmpError::MalformedProperty {
            node: mbox.path().to_owned(),
            prop: "reg",
            reason: format!("no address for {region} at cell {}", idx * 2),
        })
}

/// Agent selector bits of a request-region address.
pub fn agent_of(address: u32) -> u32 {
    address & AGENT_MASK
}

/// Base address of an IPI block with a `<0 base 0 size>` reg property.
pub fn ipi_base(ipi: &Node) -> Option<u32> {
    match ipi.cells("reg") {
        [_, base, _, _] => Some(*base),
        _ => None,
    }
}
