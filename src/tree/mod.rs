// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: In-memory system device tree consumed and mutated by the assist.
// Author: Lukas Bower

//! Arena-backed device tree.
//!
//! Nodes are addressed by [`NodeId`], looked up by absolute path or by
//! phandle, and mutated in place. Writes are visible to the next read, so
//! there is no separate sync or resolve step. Property reads never fail:
//! an absent property reads as an empty slice.

pub mod load;

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Reference handle stored in `phandle` properties and reference cells.
pub type Phandle = u32;

/// Index of a node inside a [`DeviceTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

/// Errors raised by tree storage operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TreeError {
    #[error("invalid node path {0:?}")]
    InvalidPath(String),
    #[error("node {0} already exists")]
    DuplicatePath(String),
    #[error("parent of {0} does not exist")]
    MissingParent(String),
    #[error("phandle {phandle:#x} already assigned to {path}")]
    PhandleInUse { phandle: Phandle, path: String },
}

/// Value of a property: either a flat list of 32-bit cells or a string list.
///
/// An empty cell list is the empty (boolean) property.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropValue {
    Cells(Vec<u32>),
    Strings(Vec<String>),
}

impl PropValue {
    pub fn empty() -> Self {
        Self::Cells(Vec::new())
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Self::Cells(cells) => cells.is_empty(),
            Self::Strings(strings) => strings.is_empty(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Property {
    pub name: String,
    pub value: PropValue,
}

impl Property {
    pub fn cells(name: &str, cells: &[u32]) -> Self {
        Self {
            name: name.to_owned(),
            value: PropValue::Cells(cells.to_vec()),
        }
    }

    pub fn strings(name: &str, strings: &[&str]) -> Self {
        Self {
            name: name.to_owned(),
            value: PropValue::Strings(strings.iter().map(|s| (*s).to_owned()).collect()),
        }
    }

    pub fn empty(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            value: PropValue::empty(),
        }
    }
}

/// Kind tag attached to nodes created by the synthesizer.
///
/// Identity checks on synthesized children use the marker instead of
/// matching substrings of node paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NodeMarker {
    RemoteprocContainer,
    R5Core,
    TcmBank,
    Carveout,
}

#[derive(Debug, Clone)]
pub struct Node {
    name: String,
    path: String,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    props: Vec<Property>,
    marker: Option<NodeMarker>,
}

impl Node {
    /// Node name including any unit address, e.g. `tcm@ffe00000`.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Portion of the node name after `@`, if any.
    pub fn unit_address(&self) -> Option<&str> {
        self.name.split_once('@').map(|(_, addr)| addr)
    }

    /// Node name with the unit address stripped.
    pub fn base_name(&self) -> &str {
        self.name
            .split_once('@')
            .map_or(self.name.as_str(), |(base, _)| base)
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    pub fn props(&self) -> &[Property] {
        &self.props
    }

    pub fn marker(&self) -> Option<NodeMarker> {
        self.marker
    }

    pub fn prop(&self, name: &str) -> Option<&PropValue> {
        self.props.iter().find(|p| p.name == name).map(|p| &p.value)
    }

    pub fn has_prop(&self, name: &str) -> bool {
        self.prop(name).is_some()
    }

    /// Cells of `name`, or an empty slice when absent or string-valued.
    pub fn cells(&self, name: &str) -> &[u32] {
        match self.prop(name) {
            Some(PropValue::Cells(cells)) => cells,
            _ => &[],
        }
    }

    /// Strings of `name`, or an empty slice when absent or cell-valued.
    pub fn strings(&self, name: &str) -> &[String] {
        match self.prop(name) {
            Some(PropValue::Strings(strings)) => strings,
            _ => &[],
        }
    }

    /// True when any string of `name` contains `needle`.
    pub fn string_contains(&self, name: &str, needle: &str) -> bool {
        self.strings(name).iter().any(|s| s.contains(needle))
    }

    pub fn phandle(&self) -> Option<Phandle> {
        self.cells("phandle").first().copied().filter(|ph| *ph != 0)
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path)
    }
}

#[derive(Debug, Clone)]
pub struct DeviceTree {
    nodes: Vec<Node>,
    by_path: BTreeMap<String, NodeId>,
    by_phandle: BTreeMap<Phandle, NodeId>,
}

impl Default for DeviceTree {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceTree {
    /// Create a tree holding only the root node `/`.
    pub fn new() -> Self {
        let root = Node {
            name: String::new(),
            path: "/".to_owned(),
            parent: None,
            children: Vec::new(),
            props: Vec::new(),
            marker: None,
        };
        let mut by_path = BTreeMap::new();
        by_path.insert("/".to_owned(), NodeId(0));
        Self {
            nodes: vec![root],
            by_path,
            by_phandle: BTreeMap::new(),
        }
    }

    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }

    /// Look a node up by absolute path.
    pub fn lookup(&self, path: &str) -> Option<NodeId> {
        self.by_path.get(path).copied()
    }

    /// Resolve a phandle to its node. Phandle 0 never resolves.
    pub fn pnode(&self, phandle: Phandle) -> Option<NodeId> {
        if phandle == 0 {
            return None;
        }
        self.by_phandle.get(&phandle).copied()
    }

    pub fn phandle_in_use(&self, phandle: Phandle) -> bool {
        self.by_phandle.contains_key(&phandle)
    }

    pub fn subnodes(&self, id: NodeId) -> &[NodeId] {
        &self.nodes[id.0].children
    }

    /// All nodes below `id` in document pre-order, excluding `id` itself.
    pub fn descendants(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack: Vec<NodeId> = self.subnodes(id).iter().rev().copied().collect();
        while let Some(next) = stack.pop() {
            out.push(next);
            stack.extend(self.subnodes(next).iter().rev().copied());
        }
        out
    }

    /// Iterate over every attached node in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &Node)> + '_ {
        self.nodes
            .iter()
            .enumerate()
            .map(|(idx, node)| (NodeId(idx), node))
            .filter(move |(id, node)| self.by_path.get(node.path()) == Some(id))
    }

    /// Create a node at `path` with an initial property set.
    ///
    /// The parent must already exist and the path must be free.
    pub fn add_node(&mut self, path: &str, props: Vec<Property>) -> Result<NodeId, TreeError> {
        if !path.starts_with('/') || path.len() < 2 || path.ends_with('/') {
            return Err(TreeError::InvalidPath(path.to_owned()));
        }
        if self.by_path.contains_key(path) {
            return Err(TreeError::DuplicatePath(path.to_owned()));
        }
        let (parent_path, name) = match path.rsplit_once('/') {
            Some(("", name)) => ("/", name),
            Some((parent, name)) => (parent, name),
            None => return Err(TreeError::InvalidPath(path.to_owned())),
        };
        if name.is_empty() {
            return Err(TreeError::InvalidPath(path.to_owned()));
        }
        let parent = self
            .lookup(parent_path)
            .ok_or_else(|| TreeError::MissingParent(path.to_owned()))?;

        let id = NodeId(self.nodes.len());
        self.nodes.push(Node {
            name: name.to_owned(),
            path: path.to_owned(),
            parent: Some(parent),
            children: Vec::new(),
            props: Vec::new(),
            marker: None,
        });
        self.by_path.insert(path.to_owned(), id);
        self.nodes[parent.0].children.push(id);
        for prop in props {
            if let Err(err) = self.set_prop(id, &prop.name, prop.value) {
                self.detach(id);
                return Err(err);
            }
        }
        Ok(id)
    }

    fn detach(&mut self, id: NodeId) {
        if let Some(parent) = self.nodes[id.0].parent {
            self.nodes[parent.0].children.retain(|child| *child != id);
        }
        let path = self.nodes[id.0].path.clone();
        self.by_path.remove(&path);
        self.by_phandle.retain(|_, owner| *owner != id);
        // Leave the arena slot in place; ids stay stable.
        self.nodes[id.0].parent = None;
        self.nodes[id.0].props.clear();
    }

    /// Set or replace a property. Writing `phandle` updates the phandle index.
    pub fn set_prop(&mut self, id: NodeId, name: &str, value: PropValue) -> Result<(), TreeError> {
        if name == "phandle" {
            let new = match &value {
                PropValue::Cells(cells) => cells.first().copied().filter(|ph| *ph != 0),
                PropValue::Strings(_) => None,
            };
            if let Some(phandle) = new {
                if let Some(owner) = self.by_phandle.get(&phandle) {
                    if *owner != id {
                        return Err(TreeError::PhandleInUse {
                            phandle,
                            path: self.nodes[owner.0].path.clone(),
                        });
                    }
                }
            }
            if let Some(old) = self.nodes[id.0].phandle() {
                self.by_phandle.remove(&old);
            }
            if let Some(phandle) = new {
                self.by_phandle.insert(phandle, id);
            }
        }

        let node = &mut self.nodes[id.0];
        match node.props.iter_mut().find(|p| p.name == name) {
            Some(existing) => existing.value = value,
            None => node.props.push(Property {
                name: name.to_owned(),
                value,
            }),
        }
        Ok(())
    }

    /// Remove a property, returning its previous value.
    pub fn remove_prop(&mut self, id: NodeId, name: &str) -> Option<PropValue> {
        if name == "phandle" {
            if let Some(old) = self.nodes[id.0].phandle() {
                self.by_phandle.remove(&old);
            }
        }
        let node = &mut self.nodes[id.0];
        let idx = node.props.iter().position(|p| p.name == name)?;
        Some(node.props.remove(idx).value)
    }

    pub fn set_marker(&mut self, id: NodeId, marker: NodeMarker) {
        self.nodes[id.0].marker = Some(marker);
    }

    /// True when any direct child of `id` carries `marker`.
    pub fn has_child_marked(&self, id: NodeId, marker: NodeMarker) -> bool {
        self.subnodes(id)
            .iter()
            .any(|child| self.node(*child).marker == Some(marker))
    }

    /// Return the node's phandle, assigning the lowest free one if it has none.
    pub fn ensure_phandle(&mut self, id: NodeId) -> Result<Phandle, TreeError> {
        if let Some(phandle) = self.nodes[id.0].phandle() {
            return Ok(phandle);
        }
        let mut next: Phandle = 1;
        for used in self.by_phandle.keys() {
            if *used != next {
                break;
            }
            next += 1;
        }
        self.set_prop(id, "phandle", PropValue::Cells(vec![next]))?;
        Ok(next)
    }
}
