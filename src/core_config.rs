// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Derive RPU cluster mode and the physical core of a remote domain.
// Author: Lukas Bower

use std::fmt;

use log::{debug, error};

use crate::decode::{CoreMask, CpusProp};
use crate::error::{AmpError, AmpResult};
use crate::tree::{DeviceTree, Node, NodeId};

/// RPU cluster execution mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClusterMode {
    Split,
    Lockstep,
}

impl ClusterMode {
    /// Value written to the container's `core_conf` property.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Split => "split",
            Self::Lockstep => "lockstep",
        }
    }
}

impl fmt::Display for ClusterMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoreConfig {
    pub mode: ClusterMode,
    /// Physical R5 core the remote domain runs on.
    pub core: usize,
}

impl CoreConfig {
    /// Derive the configuration from the cluster node and the remote domain.
    ///
    /// Split mode is only supported with both cores available on the
    /// cluster, in which case the remote domain's own mask picks the core.
    pub fn derive(cluster: &Node, remote: &Node) -> AmpResult<Self> {
        let cluster_cpus = CpusProp::decode(cluster)?;
        if cluster_cpus.lockstep() {
            return Ok(Self {
                mode: ClusterMode::Lockstep,
                core: 0,
            });
        }

        if cluster_cpus.core_mask != CoreMask::all() {
            error!(
                "invalid cpu prop for rpu {}: {:#x}",
                cluster,
                cluster_cpus.core_mask.bits()
            );
            return Err(AmpError::InvalidCoreMask {
                node: cluster.path().to_owned(),
                mask: cluster_cpus.core_mask.bits(),
            });
        }

        let remote_cpus = CpusProp::decode(remote)?;
        let core = if remote_cpus.core_mask == CoreMask::R5_1 {
            1
        } else if remote_cpus.core_mask == CoreMask::R5_0 {
            0
        } else {
            error!(
                "invalid cpu prop for core {}: {:#x}",
                remote,
                remote_cpus.core_mask.bits()
            );
            return Err(AmpError::InvalidCoreMask {
                node: remote.path().to_owned(),
                mask: remote_cpus.core_mask.bits(),
            });
        };
        Ok(Self {
            mode: ClusterMode::Split,
            core,
        })
    }
}

/// Core configuration of a remote domain, read from its parent cluster node.
pub fn derive_core_config(tree: &DeviceTree, remote: NodeId) -> AmpResult<CoreConfig> {
    let remote_node = tree.node(remote);
    let cluster = remote_node
        .parent()
        .ok_or_else(|| AmpError::MissingNode(format!("parent of {remote_node}")))?;
    let config = CoreConfig::derive(tree.node(cluster), remote_node)?;
    debug!("{}: cluster {} core {}", remote_node, config.mode, config.core);
    Ok(config)
}
