// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: SoC family detection and fixed Xilinx IPI, RPU and TCM tables.
// Author: Lukas Bower

//! Platform tables.
//!
//! Values here are fixed by the silicon and must match the hardware
//! reference exactly. Every lookup is fallible; a miss is reported as
//! [`AmpError::UnknownAddress`] rather than a panic.

use std::fmt;

use crate::error::{AmpError, AmpResult};
use crate::tree::DeviceTree;

/// Path of the remote-processor container node.
pub const RPU_PATH: &str = "/rpu@ff9a0000";
/// Register window of the RPU container.
pub const RPU_REG: [u32; 4] = [0x0, 0xff9a_0000, 0x0, 0x1_0000];
pub const REMOTEPROC_COMPATIBLE: &str = "xlnx,zynqmp-r5-remoteproc-1.0";
/// Size of each TCM bank window.
pub const TCM_BANK_SIZE: u32 = 0x1_0000;

/// Primary APU interrupt controller.
pub const APU_GIC_PATH: &str = "/amba_apu/interrupt-controller@f9000000";
/// Mailbox controller whose interrupt parent is rewired after resolution.
pub const DEFAULT_MBOX_CNTR_PATH: &str = "/zynqmp_ipi1";
/// Bus holding the IPI hardware blocks.
pub const AMBA_PATH: &str = "/amba";
pub const IPI_MAILBOX_COMPATIBLE: &str = "xlnx,zynqmp-ipi-mailbox";

/// Request-region bits selecting the agent.
pub const AGENT_MASK: u32 = 0xf00;

/// Supported SoC families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SocType {
    Versal,
    ZynqMp,
}

impl fmt::Display for SocType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Versal => write!(f, "versal"),
            Self::ZynqMp => write!(f, "zynqmp"),
        }
    }
}

impl SocType {
    /// Detect the family from the root node's `compatible` strings.
    ///
    /// Versal wins when both family names appear.
    pub fn detect(tree: &DeviceTree) -> AmpResult<Self> {
        let root = tree.node(tree.root());
        if root.string_contains("compatible", "versal") {
            Ok(Self::Versal)
        } else if root.string_contains("compatible", "zynqmp") {
            Ok(Self::ZynqMp)
        } else {
            Err(AmpError::UnsupportedPlatform(
                root.strings("compatible").join(","),
            ))
        }
    }
}

const IPI_TO_AGENT: &[(u32, u32)] = &[
    (0xff33_0000, 0x400),
    (0xff34_0000, 0x600),
    (0xff35_0000, 0x800),
    (0xff36_0000, 0xa00),
    (0xff37_0000, 0xc00),
    (0xff38_0000, 0xe00),
];

const AGENT_TO_IPI: &[(u32, &str)] = &[
    (0x000, "psm"),
    (0x100, "psm"),
    (0x200, "pmc"),
    (0x300, "pmc"),
    (0x400, "ipi0"),
    (0x500, "ipi0"),
    (0x600, "ipi1"),
    (0x700, "ipi1"),
    (0x800, "ipi2"),
    (0x900, "ipi2"),
    (0xa00, "ipi3"),
    (0xb00, "ipi3"),
    (0xc00, "ipi4"),
    (0xd00, "ipi4"),
    (0xe00, "ipi5"),
    (0xf00, "ipi5"),
];

const AGENT_TO_IPI_BITMASK: &[(u32, u32)] = &[
    (0x000, 0x1),
    (0x200, 0x2),
    (0x400, 0x4),
    (0x600, 0x8),
    (0x800, 0x10),
    (0xa00, 0x20),
    (0xc00, 0x40),
    (0xe00, 0x80),
    (0x100, 0x1),
    (0x300, 0x2),
    (0x500, 0x4),
    (0x700, 0x8),
    (0x900, 0x10),
    (0xb00, 0x20),
    (0xd00, 0x40),
    (0xf00, 0x80),
];

const REMOTE_IPI_TO_IRQ_VECT_ID: &[(u32, u32)] = &[
    (0xff34_0000, 63),
    (0xff35_0000, 64),
    (0xff36_0000, 65),
];

const VERSAL_RPU_PNODES: [u32; 2] = [0x1811_0005, 0x1811_0006];

/// A TCM bank known to the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TcmBank {
    pub unit_address: &'static str,
    pub pnode_id: u32,
    pub base: u32,
}

const VERSAL_TCM_BANKS: &[TcmBank] = &[
    TcmBank {
        unit_address: "ffe00000",
        pnode_id: 0x1831_800b,
        base: 0xffe0_0000,
    },
    TcmBank {
        unit_address: "ffe20000",
        pnode_id: 0x1831_800c,
        base: 0xffe2_0000,
    },
    TcmBank {
        unit_address: "ffe90000",
        pnode_id: 0x1831_800d,
        base: 0xffe9_0000,
    },
    TcmBank {
        unit_address: "ffeb0000",
        pnode_id: 0x1831_800e,
        base: 0xffeb_0000,
    },
];

fn lookup(table: &'static str, entries: &[(u32, u32)], key: u32) -> AmpResult<u32> {
    entries
        .iter()
        .find(|(k, _)| *k == key)
        .map(|(_, v)| *v)
        .ok_or(AmpError::UnknownAddress {
            table,
            address: key,
        })
}

/// Agent selector for an IPI block base address.
pub fn ipi_agent(base: u32) -> AmpResult<u32> {
    lookup("ipi-to-agent", IPI_TO_AGENT, base)
}

/// One-hot interrupt bitmask for an agent.
pub fn agent_bitmask(agent: u32) -> AmpResult<u32> {
    lookup("agent-to-bitmask", AGENT_TO_IPI_BITMASK, agent)
}

/// Short IPI name of an agent, used in diagnostics.
pub fn agent_ipi_name(agent: u32) -> AmpResult<&'static str> {
    AGENT_TO_IPI
        .iter()
        .find(|(k, _)| *k == agent)
        .map(|(_, name)| *name)
        .ok_or(AmpError::UnknownAddress {
            table: "agent-to-ipi",
            address: agent,
        })
}

/// Interrupt vector id raised on the remote side for an IPI base address.
pub fn remote_irq_vect_id(base: u32) -> AmpResult<u32> {
    lookup("remote-ipi-to-irq-vect-id", REMOTE_IPI_TO_IRQ_VECT_ID, base)
}

/// Physical node identifiers for the RPU cores, indexed by core.
pub fn rpu_pnodes(platform: SocType) -> AmpResult<&'static [u32; 2]> {
    match platform {
        SocType::Versal => Ok(&VERSAL_RPU_PNODES),
        SocType::ZynqMp => Err(AmpError::UnsupportedPlatform(format!(
            "{platform}: no RPU pnode table"
        ))),
    }
}

/// TCM banks of the platform.
pub fn tcm_banks(platform: SocType) -> AmpResult<&'static [TcmBank]> {
    match platform {
        SocType::Versal => Ok(VERSAL_TCM_BANKS),
        SocType::ZynqMp => Err(AmpError::UnsupportedPlatform(format!(
            "{platform}: no TCM bank table"
        ))),
    }
}

/// Find a TCM bank by the unit address of its node name.
pub fn tcm_bank(banks: &[TcmBank], unit_address: &str) -> Option<TcmBank> {
    banks
        .iter()
        .find(|bank| bank.unit_address == unit_address)
        .copied()
}
