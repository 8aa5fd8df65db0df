// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Drive OpenAMP channel resolution for a host domain and clean up the tree.
// Author: Lukas Bower

//! Orchestration of a resolution run.
//!
//! For every resource group the host domain controls, the remote peer and
//! mailbox wiring are resolved, facts are recorded and the remoteproc
//! subtree is synthesized. Kernel-mediated channels have a mailbox
//! controller paired with the group; user-space channels do not and are
//! described only by each side's own IPI block. The first failing channel
//! stops the run.

use std::collections::BTreeSet;

use log::{debug, error, info};

use crate::carveout::CarveoutAllocator;
use crate::config::AssistOptions;
use crate::decode::{ipi_base, RequestRegions};
use crate::error::{AmpError, AmpResult};
use crate::facts::AppInputs;
use crate::platform::{
    agent_bitmask, agent_ipi_name, ipi_agent, remote_irq_vect_id, SocType, AMBA_PATH,
    APU_GIC_PATH, DEFAULT_MBOX_CNTR_PATH, IPI_MAILBOX_COMPATIBLE, RPU_PATH,
};
use crate::resolver::{determine_role, find_mbox_cntr, find_remote, DOMAINS_PATH};
use crate::synth::{construct_remoteproc_node, Channel, SynthStatus, Synthesis};
use crate::tree::{DeviceTree, NodeId, PropValue};

/// Compatible string marking an OpenAMP domain.
pub const OPENAMP_DOMAIN_COMPATIBLE: &str = "openamp,domain-v1";
/// Compatible strings matched by [`is_compat`] contain this.
pub const ASSIST_COMPATIBLE: &str = "openamp,xlnx-rpu";

/// Properties stripped from IPI mailboxes not used by the resolution.
pub const TRIMMED_IPI_PROPS: [&str; 10] = [
    "compatible",
    "xlnx,ipi-bitmask",
    "interrupts",
    "xlnx,ipi-id",
    "xlnx,ipi-target-count",
    "xlnx,cpu-name",
    "xlnx,buffer-base",
    "xlnx,buffer-index",
    "xlnx,int-id",
    "xlnx,bit-position",
];

/// Assist entry point signature handed back by [`is_compat`].
pub type AssistFn = fn(&str, &mut DeviceTree, &AssistOptions) -> AmpResult<AssistOutcome>;

/// How a channel's messaging is mediated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mediation {
    /// A kernel mailbox controller drives the vrings.
    Kernel { mbox: String },
    /// Each side drives its own IPI from user space.
    UserSpace { host_ipi: String, remote_ipi: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelReport {
    pub index: usize,
    pub group: String,
    pub remote: String,
    pub mediation: Mediation,
    pub synthesis: Synthesis,
}

/// Everything resolved for one host domain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub domain: String,
    pub platform: SocType,
    pub facts: AppInputs,
    pub channels: Vec<ChannelReport>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssistOutcome {
    Resolved(Resolution),
    /// The tree describes no OpenAMP host domain; nothing was changed.
    NoAmpDomains,
}

/// Run-scoped state of one resolution pass.
#[derive(Debug, Default)]
pub struct AmpRun {
    carveouts: CarveoutAllocator,
    /// R5 cores already claimed by a channel of this run.
    claimed_cores: BTreeSet<usize>,
}

impl AmpRun {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_allocator(carveouts: CarveoutAllocator) -> Self {
        Self {
            carveouts,
            claimed_cores: BTreeSet::new(),
        }
    }

    pub fn carveouts(&self) -> &CarveoutAllocator {
        &self.carveouts
    }

    /// Resolve every channel hosted by `domain`, then clean up the tree.
    pub fn parse_openamp_domain(
        &mut self,
        tree: &mut DeviceTree,
        domain: NodeId,
    ) -> AmpResult<Resolution> {
        debug!("parse_openamp_domain {}", tree.node(domain));
        let platform = SocType::detect(tree).inspect_err(|_| error!("invalid input system DT"))?;
        let groups =
            determine_role(tree, domain).inspect_err(|_| error!("failed to find rsc_groups"))?;

        let mut facts = AppInputs::new();
        let mut channels = Vec::with_capacity(groups.len());
        let mut used_ipis = BTreeSet::new();

        for (index, group) in groups.into_iter().enumerate() {
            let report = self
                .resolve_channel(tree, platform, index, domain, group, &mut facts, &mut used_ipis)
                .inspect_err(|err| {
                    error!("channel {index} of {} failed: {err}", tree.node(domain))
                })?;
            channels.push(report);
        }

        if log::log_enabled!(log::Level::Debug) {
            debug!("openamp_app_inputs:");
            for (key, value) in facts.iter() {
                debug!("  {key} {value}");
            }
        }

        update_mbox_cntr_intr_parent(tree)?;
        let trimmed = trim_ipis(tree, &used_ipis);
        debug!("trimmed {trimmed} unused IPI mailboxes");

        Ok(Resolution {
            domain: tree.node(domain).path().to_owned(),
            platform,
            facts,
            channels,
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn resolve_channel(
        &mut self,
        tree: &mut DeviceTree,
        platform: SocType,
        index: usize,
        domain: NodeId,
        group: NodeId,
        facts: &mut AppInputs,
        used_ipis: &mut BTreeSet<NodeId>,
    ) -> AmpResult<ChannelReport> {
        let remote = find_remote(tree, domain, group)?;
        let group_name = tree.node(group).name().to_owned();

        let (mbox, mediation) = match find_mbox_cntr(tree, remote, domain, group) {
            Ok(mbox) => {
                resolve_kernel_channel(tree, mbox, &group_name, facts)?;
                used_ipis.insert(mbox);
                let mediation = Mediation::Kernel {
                    mbox: tree.node(mbox).path().to_owned(),
                };
                (Some(mbox), mediation)
            }
            Err(AmpError::NoMailbox { .. }) => {
                let host = userspace_ipi(tree, domain, "host")?;
                let peer = userspace_ipi(tree, remote, "remote")?;
                facts.record_bitmasks(&group_name, host.bitmask, peer.bitmask);
                used_ipis.insert(host.node);
                used_ipis.insert(peer.node);
                let mediation = Mediation::UserSpace {
                    host_ipi: tree.node(host.node).path().to_owned(),
                    remote_ipi: tree.node(peer.node).path().to_owned(),
                };
                (None, mediation)
            }
            Err(err) => return Err(err),
        };

        record_remote_ipi(tree, remote, &group_name, facts)?;

        let channel = Channel {
            index,
            platform,
            domain,
            remote,
            group,
            mbox,
        };
        let synthesis = construct_remoteproc_node(tree, &mut self.carveouts, &channel, facts)
            .inspect_err(|err| error!("construct_remoteproc_node failed: {err}"))?;
        self.claim_core(&synthesis)?;
        facts.record_channel(index, &group_name);
        info!(
            "channel {index}: {group_name} -> {} ({:?})",
            tree.node(remote),
            synthesis.status
        );

        Ok(ChannelReport {
            index,
            group: group_name,
            remote: tree.node(remote).path().to_owned(),
            mediation,
            synthesis,
        })
    }

    /// A core configured before the run may be reported as already
    /// configured once; a second channel on the same core is a conflict.
    fn claim_core(&mut self, synthesis: &Synthesis) -> AmpResult<()> {
        if synthesis.status == SynthStatus::Skipped
            || self.claimed_cores.insert(synthesis.config.core)
        {
            return Ok(());
        }
        let node = format!("{RPU_PATH}/r5_{}", synthesis.config.core);
        error!("{node} is already claimed by an earlier channel");
        Err(AmpError::AlreadyConfigured {
            node,
            prop: "pnode-id",
        })
    }
}

/// Decode the controller's request regions into host and remote bitmasks.
fn resolve_kernel_channel(
    tree: &DeviceTree,
    mbox: NodeId,
    group: &str,
    facts: &mut AppInputs,
) -> AmpResult<()> {
    let regions = RequestRegions::decode(tree.node(mbox))?;

    let source_agent = regions.local_agent();
    let host_bitmask = agent_bitmask(source_agent)?;
    debug!(
        "source agent for mbox ctr: {source_agent:#x} {} {host_bitmask:#x}",
        agent_ipi_name(source_agent)?
    );

    let remote_agent = regions.remote_agent();
    let remote_bitmask = agent_bitmask(remote_agent)?;
    debug!(
        "remote agent for mbox ctr: {remote_agent:#x} {} {remote_bitmask:#x}",
        agent_ipi_name(remote_agent)?
    );

    facts.record_bitmasks(group, host_bitmask, remote_bitmask);
    facts.record_any_ring_addresses();
    Ok(())
}

struct UserspaceIpi {
    node: NodeId,
    bitmask: u32,
}

/// Validate the single IPI a domain references first in `access`.
fn userspace_ipi(tree: &DeviceTree, domain: NodeId, role: &'static str) -> AmpResult<UserspaceIpi> {
    let invalid = |node: &str, reason: &'static str| {
        error!("userspace case: invalid {role} IPI - {reason}");
        AmpError::InvalidIpi {
            role,
            node: node.to_owned(),
            reason,
        }
    };

    let domain_node = tree.node(domain);
    let first = domain_node
        .cells("access")
        .first()
        .copied()
        .ok_or_else(|| invalid(domain_node.path(), "no access property"))?;
    let ipi = tree
        .pnode(first)
        .ok_or_else(|| invalid(domain_node.path(), "invalid phandle from access property"))?;
    let ipi_node = tree.node(ipi);
    if !ipi_node.string_contains("compatible", IPI_MAILBOX_COMPATIBLE) {
        return Err(invalid(ipi_node.path(), "wrong compatible string"));
    }
    let base = ipi_base(ipi_node).ok_or_else(|| invalid(ipi_node.path(), "incorrect reg property"))?;
    let bitmask = agent_bitmask(ipi_agent(base)?)?;
    debug!("userspace case: {domain_node} {base:#x} {bitmask:#x} {role}");
    Ok(UserspaceIpi { node: ipi, bitmask })
}

/// Record the remote IPI base and the interrupt vector it raises.
fn record_remote_ipi(
    tree: &DeviceTree,
    remote: NodeId,
    group: &str,
    facts: &mut AppInputs,
) -> AmpResult<()> {
    let remote_node = tree.node(remote);
    let first = remote_node
        .cells("access")
        .first()
        .copied()
        .ok_or_else(|| AmpError::MissingProperty {
            node: remote_node.path().to_owned(),
            prop: "access",
        })?;
    let ipi = tree.pnode(first).ok_or_else(|| AmpError::DanglingReference {
        node: remote_node.path().to_owned(),
        prop: "access",
        phandle: first,
    })?;
    let base = ipi_base(tree.node(ipi)).ok_or_else(|| AmpError::MalformedProperty {
        node: tree.node(ipi).path().to_owned(),
        prop: "reg",
        reason: "expected <0 base 0 size>".to_owned(),
    })?;
    let vect_id = remote_irq_vect_id(base)?;
    debug!("{} ipi {base:#x} irq vect id {vect_id}", tree.node(ipi));
    facts.record_remote_ipi(group, base, vect_id);
    Ok(())
}

/// Point the default mailbox controller's `interrupt-parent` at the APU GIC.
///
/// Trees without the default controller are left unchanged.
pub fn update_mbox_cntr_intr_parent(tree: &mut DeviceTree) -> AmpResult<()> {
    let Some(mbox) = tree.lookup(DEFAULT_MBOX_CNTR_PATH) else {
        debug!("{DEFAULT_MBOX_CNTR_PATH} not present, interrupt-parent unchanged");
        return Ok(());
    };
    let gic = tree
        .lookup(APU_GIC_PATH)
        .ok_or_else(|| AmpError::MissingNode(APU_GIC_PATH.to_owned()))?;
    let phandle = tree.ensure_phandle(gic)?;
    tree.set_prop(mbox, "interrupt-parent", PropValue::Cells(vec![phandle]))?;
    Ok(())
}

/// Strip hardware description from IPI mailboxes under `/amba` that the
/// resolution did not use. Returns the number of nodes trimmed.
pub fn trim_ipis(tree: &mut DeviceTree, used: &BTreeSet<NodeId>) -> usize {
    let Some(amba) = tree.lookup(AMBA_PATH) else {
        return 0;
    };
    let targets: Vec<NodeId> = tree
        .subnodes(amba)
        .iter()
        .copied()
        .filter(|id| !used.contains(id))
        .filter(|id| tree.node(*id).string_contains("compatible", IPI_MAILBOX_COMPATIBLE))
        .collect();
    for id in &targets {
        for prop in TRIMMED_IPI_PROPS {
            tree.remove_prop(*id, prop);
        }
    }
    targets.len()
}

/// True for an OpenAMP domain that hosts its first included group.
pub fn is_host_domain(tree: &DeviceTree, id: NodeId) -> bool {
    let node = tree.node(id);
    let include = node.cells("include");
    node.string_contains("compatible", OPENAMP_DOMAIN_COMPATIBLE)
        && include.len() % 2 == 0
        && include.len() > 1
        && include[1] == 1
}

fn select_host_domain(tree: &DeviceTree, tgt_node: &str) -> Option<NodeId> {
    if let Some(target) = tree.lookup(tgt_node).filter(|id| is_host_domain(tree, *id)) {
        return Some(target);
    }
    let domains = tree.lookup(DOMAINS_PATH)?;
    tree.descendants(domains)
        .into_iter()
        .find(|id| is_host_domain(tree, *id))
}

/// Return the assist entry point for a matching compatible string.
pub fn is_compat(compat: &str) -> Option<AssistFn> {
    if compat.contains(ASSIST_COMPATIBLE) {
        Some(xlnx_openamp_rpu)
    } else {
        None
    }
}

/// Assist entry point.
///
/// `tgt_node` is used directly when it is an OpenAMP host domain; otherwise
/// the first host domain below `/domains`, in pre-order, is resolved.
pub fn xlnx_openamp_rpu(
    tgt_node: &str,
    tree: &mut DeviceTree,
    options: &AssistOptions,
) -> AmpResult<AssistOutcome> {
    if options.verbose > 0 {
        info!("cb: xlnx_openamp_rpu({tgt_node}, verbose={})", options.verbose);
    }
    SocType::detect(tree).inspect_err(|_| error!("invalid input system DT"))?;

    let Some(domain) = select_host_domain(tree, tgt_node) else {
        info!("openamp-xlnx rpu: no domains found");
        return Ok(AssistOutcome::NoAmpDomains);
    };

    let resolution = AmpRun::new().parse_openamp_domain(tree, domain)?;
    if options.verbose > 0 {
        for (key, value) in resolution.facts.iter() {
            info!("  {key} {value}");
        }
    }
    Ok(AssistOutcome::Resolved(resolution))
}
