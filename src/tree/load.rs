// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Load declarative tree descriptions and dump mutated trees as JSON.
// Author: Lukas Bower

//! Description files list nodes in TOML or JSON:
//!
//! ```toml
//! [[node]]
//! path = "/domains/apu"
//! label = "apu"
//! props = { compatible = "openamp,domain-v1", include = ["&group_a", 1] }
//! ```
//!
//! Strings starting with `&` are label references and become phandle cells.
//! A node may also carry a `marker`; [`dump_tree`] writes the same shape, so
//! a dumped tree loads back unchanged.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};

use super::{DeviceTree, NodeMarker, Phandle, PropValue, Property};

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct TreeDescription {
    #[serde(default, rename = "node")]
    pub nodes: Vec<NodeDescription>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct NodeDescription {
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub marker: Option<NodeMarker>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub props: BTreeMap<String, RawValue>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum RawValue {
    Int(u64),
    Str(String),
    List(Vec<RawScalar>),
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum RawScalar {
    Int(u64),
    Str(String),
}

/// Input encodings accepted by [`parse_description`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptionFormat {
    Toml,
    Json,
}

impl DescriptionFormat {
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Self::Json,
            _ => Self::Toml,
        }
    }
}

pub fn parse_description(text: &str, format: DescriptionFormat) -> Result<TreeDescription> {
    match format {
        DescriptionFormat::Toml => toml::from_str(text).context("invalid TOML tree description"),
        DescriptionFormat::Json => {
            serde_json::from_str(text).context("invalid JSON tree description")
        }
    }
}

/// Read and build a tree from a description file.
pub fn load_tree(path: &Path) -> Result<DeviceTree> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read tree description {}", path.display()))?;
    let description = parse_description(&text, DescriptionFormat::from_path(path))?;
    description
        .build()
        .with_context(|| format!("failed to build tree from {}", path.display()))
}

impl TreeDescription {
    /// Materialise the description, resolving `&label` references.
    ///
    /// Nodes are created shallowest first; siblings keep file order.
    pub fn build(&self) -> Result<DeviceTree> {
        let labels = self.assign_phandles()?;

        let mut ordered: Vec<&NodeDescription> = self.nodes.iter().collect();
        ordered.sort_by_key(|node| depth(&node.path));

        let mut tree = DeviceTree::new();
        for desc in ordered {
            let mut props = Vec::with_capacity(desc.props.len() + 1);
            for (name, raw) in &desc.props {
                let value = convert_value(raw, &labels)
                    .with_context(|| format!("{}: property {name}", desc.path))?;
                props.push(Property {
                    name: name.clone(),
                    value,
                });
            }
            if let Some(label) = &desc.label {
                if !desc.props.contains_key("phandle") {
                    let phandle = resolve_ref(label, &labels)?;
                    props.push(Property::cells("phandle", &[phandle]));
                }
            }

            let id = if desc.path == "/" {
                let root = tree.root();
                for prop in props {
                    tree.set_prop(root, &prop.name, prop.value)?;
                }
                root
            } else {
                tree.add_node(&desc.path, props)
                    .with_context(|| format!("cannot add node {}", desc.path))?
            };
            if let Some(marker) = desc.marker {
                tree.set_marker(id, marker);
            }
        }
        Ok(tree)
    }

    fn assign_phandles(&self) -> Result<BTreeMap<&str, Phandle>> {
        let mut explicit = BTreeSet::new();
        for desc in &self.nodes {
            if let Some(phandle) = explicit_phandle(desc)? {
                explicit.insert(phandle);
            }
        }

        let mut labels = BTreeMap::new();
        let mut next: Phandle = 1;
        for desc in &self.nodes {
            let Some(label) = desc.label.as_deref() else {
                continue;
            };
            let phandle = match explicit_phandle(desc)? {
                Some(phandle) => phandle,
                None => {
                    while explicit.contains(&next) {
                        next += 1;
                    }
                    let assigned = next;
                    next += 1;
                    assigned
                }
            };
            if labels.insert(label, phandle).is_some() {
                bail!("duplicate label {label}");
            }
        }
        Ok(labels)
    }
}

/// `phandle = 7` or, as written by [`dump_tree`], `phandle = [7]`.
fn explicit_phandle(desc: &NodeDescription) -> Result<Option<Phandle>> {
    match desc.props.get("phandle") {
        None => Ok(None),
        Some(RawValue::Int(value)) => to_cell(*value).map(Some),
        Some(RawValue::List(items)) => match items.as_slice() {
            [RawScalar::Int(value)] => to_cell(*value).map(Some),
            _ => bail!("{}: phandle must be a single integer", desc.path),
        },
        Some(RawValue::Str(_)) => bail!("{}: phandle must be a single integer", desc.path),
    }
}

fn depth(path: &str) -> usize {
    path.split('/').filter(|seg| !seg.is_empty()).count()
}

fn to_cell(value: u64) -> Result<u32> {
    u32::try_from(value).map_err(|_| anyhow!("value {value:#x} does not fit a 32-bit cell"))
}

fn resolve_ref(reference: &str, labels: &BTreeMap<&str, Phandle>) -> Result<u32> {
    labels
        .get(reference)
        .copied()
        .ok_or_else(|| anyhow!("unknown label reference &{reference}"))
}

fn convert_value(raw: &RawValue, labels: &BTreeMap<&str, Phandle>) -> Result<PropValue> {
    match raw {
        RawValue::Int(value) => Ok(PropValue::Cells(vec![to_cell(*value)?])),
        RawValue::Str(s) => match s.strip_prefix('&') {
            Some(reference) => Ok(PropValue::Cells(vec![resolve_ref(reference, labels)?])),
            None => Ok(PropValue::Strings(vec![s.clone()])),
        },
        RawValue::List(items) => {
            let all_plain_strings = !items.is_empty()
                && items
                    .iter()
                    .all(|item| matches!(item, RawScalar::Str(s) if !s.starts_with('&')));
            if all_plain_strings {
                let strings = items
                    .iter()
                    .filter_map(|item| match item {
                        RawScalar::Str(s) => Some(s.clone()),
                        RawScalar::Int(_) => None,
                    })
                    .collect();
                return Ok(PropValue::Strings(strings));
            }
            let mut cells = Vec::with_capacity(items.len());
            for item in items {
                match item {
                    RawScalar::Int(value) => cells.push(to_cell(*value)?),
                    RawScalar::Str(s) => match s.strip_prefix('&') {
                        Some(reference) => cells.push(resolve_ref(reference, labels)?),
                        None => bail!("string {s:?} mixed into a cell list"),
                    },
                }
            }
            Ok(PropValue::Cells(cells))
        }
    }
}

/// Description of every node, children after parents.
///
/// Cells are written as integers, so phandles become explicit `phandle`
/// properties instead of labels.
pub fn dump_tree(tree: &DeviceTree) -> TreeDescription {
    let root = tree.root();
    let nodes = std::iter::once(root)
        .chain(tree.descendants(root))
        .map(|id| {
            let node = tree.node(id);
            NodeDescription {
                path: node.path().to_owned(),
                label: None,
                marker: node.marker(),
                props: node
                    .props()
                    .iter()
                    .map(|prop| (prop.name.clone(), raw_value(&prop.value)))
                    .collect(),
            }
        })
        .collect();
    TreeDescription { nodes }
}

fn raw_value(value: &PropValue) -> RawValue {
    match value {
        PropValue::Cells(cells) => RawValue::List(
            cells
                .iter()
                .map(|cell| RawScalar::Int(u64::from(*cell)))
                .collect(),
        ),
        PropValue::Strings(strings) => {
            RawValue::List(strings.iter().cloned().map(RawScalar::Str).collect())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[[node]]
path = "/"
props = { compatible = ["xlnx,versal-vc-p-a2197-00-revA", "xlnx,versal"] }

[[node]]
path = "/domains/apu"
label = "apu"
props = { include = ["&group", 1], access = "&ipi" }

[[node]]
path = "/domains"

[[node]]
path = "/domains/group"
label = "group"
props = { memory = [0, 0x3ed00000, 0, 0x40000] }

[[node]]
path = "/amba/ipi@ff340000"
label = "ipi"
props = { phandle = 1, reg-names = ["local_request_region", "remote_request_region"] }

[[node]]
path = "/amba"
"#;

    #[test]
    fn builds_tree_and_resolves_labels() {
        let desc = parse_description(SAMPLE, DescriptionFormat::Toml).unwrap();
        let tree = desc.build().unwrap();

        let root = tree.node(tree.root());
        assert!(root.string_contains("compatible", "versal"));

        let ipi = tree.lookup("/amba/ipi@ff340000").unwrap();
        assert_eq!(tree.node(ipi).phandle(), Some(1));
        assert_eq!(tree.node(ipi).strings("reg-names").len(), 2);

        let group = tree.lookup("/domains/group").unwrap();
        let group_ph = tree.node(group).phandle().unwrap();
        assert_ne!(group_ph, 1);

        let apu = tree.node(tree.lookup("/domains/apu").unwrap());
        assert_eq!(apu.cells("include"), &[group_ph, 1]);
        assert_eq!(apu.cells("access"), &[1]);
    }

    #[test]
    fn rejects_unknown_label() {
        let text = r#"
[[node]]
path = "/a"
props = { access = "&nowhere" }
"#;
        let desc = parse_description(text, DescriptionFormat::Toml).unwrap();
        let err = desc.build().unwrap_err();
        assert!(format!("{err:#}").contains("unknown label reference &nowhere"));
    }

    #[test]
    fn rejects_strings_mixed_with_cells() {
        let text = r#"{"node": [{"path": "/a", "props": {"bad": [1, "x"]}}]}"#;
        let desc = parse_description(text, DescriptionFormat::Json).unwrap();
        assert!(desc.build().is_err());
    }

    #[test]
    fn dump_lists_parents_first() {
        let desc = parse_description(SAMPLE, DescriptionFormat::Toml).unwrap();
        let tree = desc.build().unwrap();
        let dump = dump_tree(&tree);
        assert_eq!(dump.nodes[0].path, "/");
        let domains = dump.nodes.iter().position(|n| n.path == "/domains").unwrap();
        let apu = dump.nodes.iter().position(|n| n.path == "/domains/apu").unwrap();
        assert!(domains < apu);
    }

    #[test]
    fn dumped_tree_loads_back_with_markers() {
        let mut tree = parse_description(SAMPLE, DescriptionFormat::Toml)
            .unwrap()
            .build()
            .unwrap();
        let ipi = tree.lookup("/amba/ipi@ff340000").unwrap();
        tree.set_marker(ipi, NodeMarker::Carveout);
        tree.set_prop(ipi, "no-map", PropValue::empty()).unwrap();

        let json = serde_json::to_string(&dump_tree(&tree)).unwrap();
        let reloaded = parse_description(&json, DescriptionFormat::Json)
            .unwrap()
            .build()
            .unwrap();

        let ipi = reloaded.node(reloaded.lookup("/amba/ipi@ff340000").unwrap());
        assert_eq!(ipi.marker(), Some(NodeMarker::Carveout));
        assert_eq!(ipi.prop("no-map"), Some(&PropValue::empty()));
        assert_eq!(ipi.phandle(), Some(1));
        let apu = tree.node(tree.lookup("/domains/apu").unwrap());
        let reloaded_apu = reloaded.node(reloaded.lookup("/domains/apu").unwrap());
        assert_eq!(reloaded_apu.cells("include"), apu.cells("include"));
        assert_eq!(reloaded_apu.cells("access"), &[1]);
        assert_eq!(reloaded_apu.phandle(), apu.phandle());
        let root = reloaded.node(reloaded.root());
        assert!(root.string_contains("compatible", "versal"));
    }
}
