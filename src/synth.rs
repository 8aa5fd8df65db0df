// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Synthesize the remoteproc container, R5 core and TCM nodes.
// Author: Lukas Bower

//! Node synthesis for one OpenAMP channel.
//!
//! Layout produced under the container:
//!
//! ```text
//! /rpu@ff9a0000
//!     r5_{core}                 pnode-id, mboxes, mbox-names, memory-region
//!         tcm_remoteproc{n}@{unit}
//! ```
//!
//! Shared nodes are looked up by path before creation. Nothing is rolled
//! back when a later step fails.

use log::{debug, error, info};

use crate::carveout::{record_region_facts, CarveoutAllocator};
use crate::core_config::{derive_core_config, ClusterMode, CoreConfig};
use crate::error::{AmpError, AmpResult};
use crate::facts::AppInputs;
use crate::platform::{
    rpu_pnodes, tcm_bank, tcm_banks, SocType, REMOTEPROC_COMPATIBLE, RPU_PATH, RPU_REG,
    TCM_BANK_SIZE,
};
use crate::tree::{DeviceTree, NodeId, NodeMarker, PropValue, Property};

/// One resolved OpenAMP channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Channel {
    pub index: usize,
    pub platform: SocType,
    /// Host domain.
    pub domain: NodeId,
    pub remote: NodeId,
    pub group: NodeId,
    /// Kernel-side mailbox controller; `None` for user-space channels.
    pub mbox: Option<NodeId>,
}

/// How synthesis for a channel ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SynthStatus {
    /// Nodes were created or completed by this call.
    Configured,
    /// The core node was already configured by an earlier run; nothing changed.
    AlreadyConfigured,
    /// No kernel mailbox, so no remoteproc subtree is built.
    Skipped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Synthesis {
    pub config: CoreConfig,
    pub status: SynthStatus,
}

/// Return the remoteproc container, creating it on first use.
pub fn set_remoteproc_node(tree: &mut DeviceTree, mode: ClusterMode) -> AmpResult<NodeId> {
    if let Some(existing) = tree.lookup(RPU_PATH) {
        return Ok(existing);
    }
    info!("remoteproc node not present, adding {RPU_PATH}");
    let id = tree.add_node(
        RPU_PATH,
        vec![
            Property::cells("reg", &RPU_REG),
            Property::cells("#address-cells", &[2]),
            Property::empty("ranges"),
            Property::cells("#size-cells", &[2]),
            Property::strings("core_conf", &[mode.as_str()]),
            Property::strings("compatible", &[REMOTEPROC_COMPATIBLE]),
        ],
    )?;
    tree.set_marker(id, NodeMarker::RemoteprocContainer);
    Ok(id)
}

/// Assign the platform pnode id of the core.
///
/// An existing `pnode-id` is never overwritten and reports
/// [`AmpError::AlreadyConfigured`].
pub fn set_rpu_pnode(
    tree: &mut DeviceTree,
    r5: NodeId,
    config: CoreConfig,
    platform: SocType,
) -> AmpResult<()> {
    let node = tree.node(r5);
    if node.has_prop("pnode-id") {
        debug!("pnode id already exists for node {node}");
        return Err(AmpError::AlreadyConfigured {
            node: node.path().to_owned(),
            prop: "pnode-id",
        });
    }
    let pnodes = rpu_pnodes(platform).inspect_err(|_| {
        error!("only versal supported for openamp domains");
    })?;
    let slot = match config.mode {
        ClusterMode::Lockstep => 0,
        ClusterMode::Split => config.core,
    };
    let pnode = *pnodes.get(slot).ok_or_else(|| AmpError::InvalidCoreMask {
        node: tree.node(r5).path().to_owned(),
        mask: 1 << slot,
    })?;
    tree.set_prop(r5, "pnode-id", PropValue::Cells(vec![pnode]))?;
    Ok(())
}

/// Attach `mboxes` and `mbox-names` referencing the controller's tx/rx channels.
pub fn setup_mbox_info(tree: &mut DeviceTree, r5: NodeId, mbox: NodeId) -> AmpResult<()> {
    for prop in ["reg-names", "xlnx,ipi-id"] {
        if !tree.node(mbox).has_prop(prop) {
            error!("invalid mbox ctr {}", tree.node(mbox));
            return Err(AmpError::MissingProperty {
                node: tree.node(mbox).path().to_owned(),
                prop,
            });
        }
    }
    let phandle = tree.ensure_phandle(mbox)?;
    tree.set_prop(r5, "mboxes", PropValue::Cells(vec![phandle, 0, phandle, 1]))?;
    tree.set_prop(
        r5,
        "mbox-names",
        PropValue::Strings(vec!["tx".to_owned(), "rx".to_owned()]),
    )?;
    Ok(())
}

/// Add a TCM child for every known bank in the group's `access` list.
///
/// Banks are numbered in discovery order from 0; references that are not
/// TCM banks are skipped. Returns the number of banks added.
pub fn setup_tcm_nodes(
    tree: &mut DeviceTree,
    r5: NodeId,
    platform: SocType,
    group: NodeId,
) -> AmpResult<usize> {
    let banks = tcm_banks(platform)?;
    let found: Vec<_> = tree
        .node(group)
        .cells("access")
        .iter()
        .filter_map(|phandle| tree.pnode(*phandle))
        .filter_map(|target| {
            let node = tree.node(target);
            let bank = node.unit_address().and_then(|unit| tcm_bank(banks, unit));
            if bank.is_none() {
                debug!("{node} is not a TCM bank, skipping");
            }
            bank
        })
        .collect();

    let r5_path = tree.node(r5).path().to_owned();
    for (idx, bank) in found.iter().enumerate() {
        let path = format!("{r5_path}/tcm_remoteproc{idx}@{}", bank.unit_address);
        let id = tree.add_node(
            &path,
            vec![
                Property::cells("pnode-id", &[bank.pnode_id]),
                Property::cells("reg", &[0, bank.base, 0, TCM_BANK_SIZE]),
            ],
        )?;
        tree.set_marker(id, NodeMarker::TcmBank);
        debug!("added {path}");
    }
    Ok(found.len())
}

fn r5_node(tree: &mut DeviceTree, core: usize) -> AmpResult<NodeId> {
    let path = format!("{RPU_PATH}/r5_{core}");
    if let Some(existing) = tree.lookup(&path) {
        debug!("node already exists: {path}");
        return Ok(existing);
    }
    let id = tree.add_node(
        &path,
        vec![
            Property::cells("#address-cells", &[2]),
            Property::cells("#size-cells", &[2]),
            Property::empty("ranges"),
        ],
    )?;
    tree.set_marker(id, NodeMarker::R5Core);
    debug!("added r5 node {path}");
    Ok(id)
}

/// Create or complete the per-core node of a kernel-mediated channel.
pub fn setup_r5_core_node(
    tree: &mut DeviceTree,
    carveouts: &mut CarveoutAllocator,
    channel: &Channel,
    mbox: NodeId,
    config: CoreConfig,
    facts: &mut AppInputs,
) -> AmpResult<SynthStatus> {
    let r5 = r5_node(tree, config.core)?;

    match set_rpu_pnode(tree, r5, config, channel.platform) {
        Ok(()) => {}
        Err(AmpError::AlreadyConfigured { .. }) => {
            info!("{} already configured, leaving it untouched", tree.node(r5));
            record_region_facts(tree, channel.group, facts)?;
            return Ok(SynthStatus::AlreadyConfigured);
        }
        Err(err) => {
            error!("set_rpu_pnode failed: {err}");
            return Err(err);
        }
    }
    setup_mbox_info(tree, r5, mbox).inspect_err(|err| error!("setup_mbox_info failed: {err}"))?;

    let phandles = carveouts
        .construct_mem_region(tree, channel.group, config.core, facts)
        .inspect_err(|err| error!("construct_mem_region failed: {err}"))?;
    debug!("adding prop memory-region to {}", tree.node(r5));
    tree.set_prop(r5, "memory-region", PropValue::Cells(phandles))?;

    if has_tcm_child(tree, r5, channel.platform)? {
        info!("{} already has TCM banks", tree.node(r5));
        return Ok(SynthStatus::AlreadyConfigured);
    }
    setup_tcm_nodes(tree, r5, channel.platform, channel.group)?;
    Ok(SynthStatus::Configured)
}

/// True when the domain's `access` list references a node with `reg-names`.
/// True when `r5` already has a TCM child, synthesized or from the input.
///
/// Unmarked children count when their unit address is a known TCM bank.
fn has_tcm_child(tree: &DeviceTree, r5: NodeId, platform: SocType) -> AmpResult<bool> {
    if tree.has_child_marked(r5, NodeMarker::TcmBank) {
        return Ok(true);
    }
    let banks = tcm_banks(platform)?;
    Ok(tree.subnodes(r5).iter().any(|child| {
        tree.node(*child)
            .unit_address()
            .is_some_and(|unit| tcm_bank(banks, unit).is_some())
    }))
}

fn has_corresponding_mbox(tree: &DeviceTree, domain: NodeId) -> bool {
    tree.node(domain)
        .cells("access")
        .iter()
        .filter_map(|phandle| tree.pnode(*phandle))
        .any(|target| tree.node(target).has_prop("reg-names"))
}

/// Synthesis entry for one channel.
///
/// The core configuration is always derived; the remoteproc subtree is only
/// built for kernel-mediated channels.
pub fn construct_remoteproc_node(
    tree: &mut DeviceTree,
    carveouts: &mut CarveoutAllocator,
    channel: &Channel,
    facts: &mut AppInputs,
) -> AmpResult<Synthesis> {
    let config = derive_core_config(tree, channel.remote)?;

    let mbox = match channel.mbox {
        Some(mbox) if has_corresponding_mbox(tree, channel.domain) => mbox,
        _ => {
            debug!(
                "{}: no kernel mailbox for channel {}, no remoteproc subtree",
                tree.node(channel.domain),
                channel.index
            );
            return Ok(Synthesis {
                config,
                status: SynthStatus::Skipped,
            });
        }
    };

    set_remoteproc_node(tree, config.mode)?;
    let status = setup_r5_core_node(tree, carveouts, channel, mbox, config, facts)?;
    Ok(Synthesis { config, status })
}
