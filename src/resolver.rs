// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Resolve host/remote roles, peers and mailbox controllers per channel.
// Author: Lukas Bower

//! Domain graph resolution.
//!
//! A domain's `include` list holds `<&resource-group role-flag>` pairs. Flag
//! `1` marks the domain as host of that group. The remote peer of a channel
//! is the other domain including the same group, and its mailbox controller
//! is found by position: the i-th resource group in `include` pairs with the
//! i-th mailbox controller in `access`.

use log::{debug, error};

use crate::error::{AmpError, AmpResult};
use crate::tree::{DeviceTree, Node, NodeId};

pub const DOMAINS_PATH: &str = "/domains";

/// Role a domain plays for one included resource group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Host,
    Remote,
}

/// One decoded `include` pair. `group` is `None` when the reference dangles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IncludeEntry {
    pub phandle: u32,
    pub group: Option<NodeId>,
    pub role: Role,
}

/// Decode a domain's `include` list into pairs.
///
/// Besides an odd length, a role flag other than `0` or `1` is rejected as
/// [`AmpError::MalformedProperty`]: the flag is a boolean and any other value
/// means the pairs are misaligned.
pub fn include_entries(tree: &DeviceTree, domain: NodeId) -> AmpResult<Vec<IncludeEntry>> {
    let node = tree.node(domain);
    let include = node.cells("include");
    if include.len() % 2 == 1 {
        error!(
            "{}: include list not valid, expected even number of elements, got {}",
            node,
            include.len()
        );
        return Err(AmpError::OddIncludeList {
            node: node.path().to_owned(),
            len: include.len(),
        });
    }
    include
        .chunks_exact(2)
        .map(|pair| {
            let role = match pair[1] {
                1 => Role::Host,
                0 => Role::Remote,
                other => {
                    return Err(AmpError::MalformedProperty {
                        node: node.path().to_owned(),
                        prop: "include",
                        reason: format!("role flag {other} is neither 0 nor 1"),
                    })
                }
            };
            Ok(IncludeEntry {
                phandle: pair[0],
                group: tree.pnode(pair[0]),
                role,
            })
        })
        .collect()
}

/// Resource groups this domain hosts, in `include` order.
pub fn determine_role(tree: &DeviceTree, domain: NodeId) -> AmpResult<Vec<NodeId>> {
    let mut hosted = Vec::new();
    for entry in include_entries(tree, domain)? {
        if entry.role != Role::Host {
            debug!("{}: skipping remote-side include {:#x}", tree.node(domain), entry.phandle);
            continue;
        }
        let group = entry.group.ok_or_else(|| {
            error!("invalid resource group phandle: {:#x}", entry.phandle);
            AmpError::DanglingReference {
                node: tree.node(domain).path().to_owned(),
                prop: "include",
                phandle: entry.phandle,
            }
        })?;
        hosted.push(group);
    }
    Ok(hosted)
}

fn includes_group(tree: &DeviceTree, node: &Node, group: NodeId) -> bool {
    node.cells("include")
        .iter()
        .step_by(2)
        .any(|phandle| tree.pnode(*phandle) == Some(group))
}

/// Find the other domain that includes `group`.
///
/// Domains under `/domains` are scanned in document pre-order and the first
/// match wins.
pub fn find_remote(tree: &DeviceTree, domain: NodeId, group: NodeId) -> AmpResult<NodeId> {
    let domains = tree
        .lookup(DOMAINS_PATH)
        .ok_or_else(|| AmpError::MissingNode(DOMAINS_PATH.to_owned()))?;
    tree.descendants(domains)
        .into_iter()
        .filter(|candidate| *candidate != domain)
        .find(|candidate| includes_group(tree, tree.node(*candidate), group))
        .ok_or_else(|| {
            error!("failed to find remote for {}", tree.node(group));
            AmpError::NoRemotePeer {
                group: tree.node(group).name().to_owned(),
            }
        })
}

/// True for nodes shaped like an IPI mailbox controller.
pub fn is_mbox_cntr(node: &Node) -> bool {
    node.has_prop("reg-names") && node.has_prop("xlnx,ipi-id")
}

/// True for resource-group nodes, which describe their carveouts in `memory`.
pub fn is_resource_group(node: &Node) -> bool {
    node.has_prop("memory")
}

/// Zero-based channel index of `group` among the resource groups `domain`
/// includes. References to anything else do not count.
fn channel_index(tree: &DeviceTree, domain: NodeId, group: NodeId) -> AmpResult<usize> {
    let node = tree.node(domain);
    let include = node.cells("include");
    if include.is_empty() {
        return Err(AmpError::MissingProperty {
            node: node.path().to_owned(),
            prop: "include",
        });
    }
    include
        .iter()
        .step_by(2)
        .filter_map(|phandle| tree.pnode(*phandle))
        .filter(|included| is_resource_group(tree.node(*included)))
        .position(|included| included == group)
        .ok_or_else(|| AmpError::MalformedProperty {
            node: node.path().to_owned(),
            prop: "include",
            reason: format!("does not include {}", tree.node(group)),
        })
}

/// Mailbox controller serving the channel of `group`.
///
/// [`AmpError::NoMailbox`] means the channel has no kernel-side mailbox and
/// is handled as a user-space channel by the caller.
pub fn find_mbox_cntr(
    tree: &DeviceTree,
    remote: NodeId,
    domain: NodeId,
    group: NodeId,
) -> AmpResult<NodeId> {
    let index = channel_index(tree, domain, group)?;
    debug!(
        "find_mbox_cntr: {} is channel {} (remote {})",
        tree.node(group),
        index,
        tree.node(remote)
    );
    let no_mailbox = || AmpError::NoMailbox {
        domain: tree.node(domain).path().to_owned(),
        group: tree.node(group).name().to_owned(),
        index,
    };
    tree.node(domain)
        .cells("access")
        .iter()
        .filter_map(|phandle| tree.pnode(*phandle))
        .filter(|candidate| is_mbox_cntr(tree.node(*candidate)))
        .nth(index)
        .ok_or_else(|| {
            debug!("did not find corresponding mbox for channel {index}");
            no_mailbox()
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::Property;

    struct Fixture {
        tree: DeviceTree,
        host: NodeId,
        group_a: NodeId,
        group_b: NodeId,
    }

    fn fixture(host_include: &[u32]) -> Fixture {
        let mut tree = DeviceTree::new();
        tree.add_node(DOMAINS_PATH, Vec::new()).unwrap();
        let memory = || Property::cells("memory", &[0, 0x3ed0_0000, 0, 0x4_0000]);
        let group_a = tree
            .add_node("/domains/rg_a", vec![Property::cells("phandle", &[10]), memory()])
            .unwrap();
        let group_b = tree
            .add_node("/domains/rg_b", vec![Property::cells("phandle", &[11]), memory()])
            .unwrap();
        tree.add_node("/domains/bundle", vec![Property::cells("phandle", &[12])])
            .unwrap();
        tree.add_node(
            "/mbox0",
            vec![
                Property::cells("phandle", &[20]),
                Property::strings("reg-names", &["local_request_region"]),
                Property::cells("xlnx,ipi-id", &[1]),
            ],
        )
        .unwrap();
        tree.add_node("/plain", vec![Property::cells("phandle", &[21])])
            .unwrap();
        tree.add_node(
            "/mbox1",
            vec![
                Property::cells("phandle", &[22]),
                Property::strings("reg-names", &["local_request_region"]),
                Property::cells("xlnx,ipi-id", &[2]),
            ],
        )
        .unwrap();
        let host = tree
            .add_node(
                "/domains/apu",
                vec![
                    Property::cells("include", host_include),
                    Property::cells("access", &[21, 20, 22]),
                ],
            )
            .unwrap();
        Fixture {
            tree,
            host,
            group_a,
            group_b,
        }
    }

    #[test]
    fn host_groups_follow_flags() {
        let f = fixture(&[10, 1, 11, 0]);
        assert_eq!(determine_role(&f.tree, f.host), Ok(vec![f.group_a]));

        let f = fixture(&[10, 1, 11, 1]);
        assert_eq!(
            determine_role(&f.tree, f.host),
            Ok(vec![f.group_a, f.group_b])
        );

        let f = fixture(&[]);
        assert_eq!(determine_role(&f.tree, f.host), Ok(Vec::new()));
    }

    #[test]
    fn odd_include_fails() {
        let f = fixture(&[10, 1, 11]);
        assert_eq!(
            determine_role(&f.tree, f.host),
            Err(AmpError::OddIncludeList {
                node: "/domains/apu".into(),
                len: 3
            })
        );
    }

    #[test]
    fn dangling_host_group_fails() {
        let f = fixture(&[99, 1]);
        assert!(matches!(
            determine_role(&f.tree, f.host),
            Err(AmpError::DanglingReference { phandle: 99, .. })
        ));
        // A dangling reference on a remote-side pair is not inspected.
        let f = fixture(&[99, 0]);
        assert_eq!(determine_role(&f.tree, f.host), Ok(Vec::new()));
    }

    #[test]
    fn remote_is_first_other_includer() {
        let mut f = fixture(&[10, 1]);
        let first = f
            .tree
            .add_node("/domains/r5_0", vec![Property::cells("include", &[10, 0])])
            .unwrap();
        f.tree
            .add_node("/domains/r5_1", vec![Property::cells("include", &[10, 0])])
            .unwrap();
        assert_eq!(find_remote(&f.tree, f.host, f.group_a), Ok(first));
        assert!(matches!(
            find_remote(&f.tree, f.host, f.group_b),
            Err(AmpError::NoRemotePeer { .. })
        ));
    }

    #[test]
    fn remote_scan_descends_into_cluster_domains() {
        let mut f = fixture(&[10, 1]);
        f.tree.add_node("/domains/rpu", Vec::new()).unwrap();
        let nested = f
            .tree
            .add_node("/domains/rpu/r5_0", vec![Property::cells("include", &[10, 0])])
            .unwrap();
        assert_eq!(find_remote(&f.tree, f.host, f.group_a), Ok(nested));
    }

    #[test]
    fn role_flags_are_not_mistaken_for_groups() {
        let mut f = fixture(&[10, 1]);
        // Phandle 1 exists, but flag cells must never match a group.
        let one = f.tree.add_node("/one", vec![Property::cells("phandle", &[1])]).unwrap();
        f.tree
            .add_node("/domains/other", vec![Property::cells("include", &[11, 1])])
            .unwrap();
        assert!(find_remote(&f.tree, f.host, one).is_err());
    }

    #[test]
    fn mailbox_pairs_by_channel_position() {
        let f = fixture(&[10, 1, 11, 1]);
        let remote = f.group_a;
        let mbox0 = f.tree.lookup("/mbox0").unwrap();
        let mbox1 = f.tree.lookup("/mbox1").unwrap();
        assert_eq!(find_mbox_cntr(&f.tree, remote, f.host, f.group_a), Ok(mbox0));
        assert_eq!(find_mbox_cntr(&f.tree, remote, f.host, f.group_b), Ok(mbox1));
    }

    #[test]
    fn channel_index_ignores_non_group_includes() {
        let f = fixture(&[12, 0, 10, 1, 12, 1, 11, 1]);
        let mbox0 = f.tree.lookup("/mbox0").unwrap();
        let mbox1 = f.tree.lookup("/mbox1").unwrap();
        assert_eq!(find_mbox_cntr(&f.tree, f.group_a, f.host, f.group_a), Ok(mbox0));
        assert_eq!(find_mbox_cntr(&f.tree, f.group_a, f.host, f.group_b), Ok(mbox1));
    }

    #[test]
    fn role_flag_must_be_boolean() {
        let f = fixture(&[10, 2]);
        assert!(matches!(
            determine_role(&f.tree, f.host),
            Err(AmpError::MalformedProperty { prop: "include", .. })
        ));
    }

    #[test]
    fn missing_mailbox_signals_userspace_channel() {
        let mut f = fixture(&[10, 1, 11, 1]);
        f.tree
            .set_prop(f.host, "access", Property::cells("access", &[21]).value)
            .unwrap();
        assert_eq!(
            find_mbox_cntr(&f.tree, f.group_a, f.host, f.group_b),
            Err(AmpError::NoMailbox {
                domain: "/domains/apu".into(),
                group: "rg_b".into(),
                index: 1
            })
        );
    }
}
