// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Allocate reserved-memory carveouts for RPU firmware and vrings.
// Author: Lukas Bower

//! Memory carveout allocation.
//!
//! A resource group's `memory` property lists four
//! `<addr_hi addr_lo size_hi size_lo>` regions: firmware load area, two
//! vrings and the shared buffer. Each becomes a `no-map` node under
//! `/reserved-memory` with a phandle drawn from a [`CarveoutAllocator`].

use log::{debug, info};

use crate::error::{AmpError, AmpResult};
use crate::facts::AppInputs;
use crate::tree::{DeviceTree, NodeId, NodeMarker, Phandle, Property};

pub const RESERVED_MEMORY_PATH: &str = "/reserved-memory";

/// First carveout phandle of a run.
pub const CARVEOUT_PHANDLE_BASE: Phandle = 0x5ed0;

/// Region names in `memory` order.
pub const REGION_NAMES: [&str; 4] = ["elfload", "vdev0vring0", "vdev0vring1", "vdev0buffer"];

const CELLS_PER_REGION: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemRegion {
    pub base: u64,
    pub size: u64,
}

impl MemRegion {
    fn from_cells(cells: &[u32]) -> Self {
        let join = |hi: u32, lo: u32| (u64::from(hi) << 32) | u64::from(lo);
        Self {
            base: join(cells[0], cells[1]),
            size: join(cells[2], cells[3]),
        }
    }

    /// `reg` cells with two address and two size cells.
    pub fn reg(&self) -> [u32; 4] {
        [
            (self.base >> 32) as u32,
            self.base as u32,
            (self.size >> 32) as u32,
            self.size as u32,
        ]
    }
}

/// Decode the four regions of a resource group.
pub fn mem_regions(tree: &DeviceTree, group: NodeId) -> AmpResult<[MemRegion; 4]> {
    let node = tree.node(group);
    let cells = node.cells("memory");
    if cells.is_empty() {
        return Err(AmpError::MissingProperty {
            node: node.path().to_owned(),
            prop: "memory",
        });
    }
    if cells.len() != CELLS_PER_REGION * REGION_NAMES.len() {
        return Err(AmpError::MalformedProperty {
            node: node.path().to_owned(),
            prop: "memory",
            reason: format!(
                "expected {} cells, found {}",
                CELLS_PER_REGION * REGION_NAMES.len(),
                cells.len()
            ),
        });
    }
    let mut regions = [MemRegion { base: 0, size: 0 }; 4];
    for (region, chunk) in regions.iter_mut().zip(cells.chunks_exact(CELLS_PER_REGION)) {
        *region = MemRegion::from_cells(chunk);
    }
    Ok(regions)
}

/// Decode the regions of `group` and record their base and size facts.
pub fn record_region_facts(
    tree: &DeviceTree,
    group: NodeId,
    facts: &mut AppInputs,
) -> AmpResult<[MemRegion; 4]> {
    let regions = mem_regions(tree, group)?;
    let group_name = tree.node(group).name();
    for (region, name) in regions.iter().zip(REGION_NAMES) {
        facts.record_carveout(group_name, name, region.base, region.size);
    }
    Ok(regions)
}

/// Run-scoped carveout phandle sequence.
///
/// Identifiers increase monotonically from [`CARVEOUT_PHANDLE_BASE`] and are
/// never handed out twice by the same allocator.
#[derive(Debug, Clone)]
pub struct CarveoutAllocator {
    next: Phandle,
}

impl Default for CarveoutAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl CarveoutAllocator {
    pub fn new() -> Self {
        Self::starting_at(CARVEOUT_PHANDLE_BASE)
    }

    pub fn starting_at(base: Phandle) -> Self {
        Self { next: base }
    }

    /// Identifier the next carveout will receive.
    pub fn peek(&self) -> Phandle {
        self.next
    }

    fn take(&mut self, tree: &DeviceTree) -> AmpResult<Phandle> {
        let phandle = self.next;
        if tree.phandle_in_use(phandle) {
            return Err(AmpError::PhandleConflict(phandle));
        }
        self.next += 1;
        Ok(phandle)
    }

    /// Create the four carveouts of `group` for `core`.
    ///
    /// Returns the phandles in region order for the core's `memory-region`.
    pub fn construct_carveouts(
        &mut self,
        tree: &mut DeviceTree,
        group: NodeId,
        core: usize,
        facts: &mut AppInputs,
    ) -> AmpResult<Vec<Phandle>> {
        let regions = record_region_facts(tree, group, facts)?;

        let mut phandles = Vec::with_capacity(REGION_NAMES.len());
        for (region, name) in regions.iter().zip(REGION_NAMES) {
            let phandle = self.take(tree)?;
            let path = format!("{RESERVED_MEMORY_PATH}/rpu{core}{name}");
            let id = tree.add_node(
                &path,
                vec![
                    Property::empty("no-map"),
                    Property::cells("reg", &region.reg()),
                    Property::cells("phandle", &[phandle]),
                ],
            )?;
            tree.set_marker(id, NodeMarker::Carveout);
            debug!("added node {path} phandle {phandle:#x}");
            phandles.push(phandle);
        }
        Ok(phandles)
    }

    /// Ensure `/reserved-memory` exists, then construct the carveouts.
    pub fn construct_mem_region(
        &mut self,
        tree: &mut DeviceTree,
        group: NodeId,
        core: usize,
        facts: &mut AppInputs,
    ) -> AmpResult<Vec<Phandle>> {
        ensure_reserved_memory(tree)?;
        self.construct_carveouts(tree, group, core, facts)
    }
}

/// Return `/reserved-memory`, creating it with two-cell addressing if absent.
///
/// An existing node is reused without inspecting its contents.
pub fn ensure_reserved_memory(tree: &mut DeviceTree) -> AmpResult<NodeId> {
    if let Some(existing) = tree.lookup(RESERVED_MEMORY_PATH) {
        debug!("found pre-existing reserved mem node");
        return Ok(existing);
    }
    let id = tree.add_node(
        RESERVED_MEMORY_PATH,
        vec![
            Property::cells("#address-cells", &[2]),
            Property::cells("#size-cells", &[2]),
            Property::empty("ranges"),
        ],
    )?;
    info!("added reserved mem node {RESERVED_MEMORY_PATH}");
    Ok(id)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MEMORY: [u32; 16] = [
        0, 0x3ed0_0000, 0, 0x4_0000, //
        0, 0x3ed4_0000, 0, 0x2000, //
        0, 0x3ed4_4000, 0, 0x2000, //
        0, 0x3ed4_8000, 0, 0x10_0000,
    ];

    fn tree_with_group(name: &str, memory: &[u32]) -> (DeviceTree, NodeId) {
        let mut tree = DeviceTree::new();
        let group = tree
            .add_node(&format!("/{name}"), vec![Property::cells("memory", memory)])
            .unwrap();
        (tree, group)
    }

    #[test]
    fn allocates_four_increasing_phandles() {
        let (mut tree, group) = tree_with_group("rg0", &MEMORY);
        let mut alloc = CarveoutAllocator::new();
        let mut facts = AppInputs::new();

        let phandles = alloc
            .construct_mem_region(&mut tree, group, 0, &mut facts)
            .unwrap();
        assert_eq!(phandles, vec![0x5ed0, 0x5ed1, 0x5ed2, 0x5ed3]);
        assert_eq!(alloc.peek(), 0x5ed4);

        let vring1 = tree.lookup("/reserved-memory/rpu0vdev0vring1").unwrap();
        let node = tree.node(vring1);
        assert!(node.has_prop("no-map"));
        assert_eq!(node.cells("reg"), &[0, 0x3ed4_4000, 0, 0x2000]);
        assert_eq!(node.phandle(), Some(0x5ed2));
        assert_eq!(node.marker(), Some(NodeMarker::Carveout));

        assert_eq!(facts.get("rg0elfload_base"), Some("0x3ed00000"));
        assert_eq!(facts.get("rg0vdev0buffer_size"), Some("0x100000"));
    }

    #[test]
    fn sequence_continues_across_channels() {
        let (mut tree, group_a) = tree_with_group("rg0", &MEMORY);
        let group_b = tree
            .add_node("/rg1", vec![Property::cells("memory", &MEMORY)])
            .unwrap();
        let mut alloc = CarveoutAllocator::new();
        let mut facts = AppInputs::new();

        alloc
            .construct_mem_region(&mut tree, group_a, 0, &mut facts)
            .unwrap();
        let second = alloc
            .construct_mem_region(&mut tree, group_b, 1, &mut facts)
            .unwrap();
        assert_eq!(second, vec![0x5ed4, 0x5ed5, 0x5ed6, 0x5ed7]);
    }

    #[test]
    fn reuses_existing_reserved_memory() {
        let (mut tree, group) = tree_with_group("rg0", &MEMORY);
        let existing = tree
            .add_node(RESERVED_MEMORY_PATH, vec![Property::cells("#size-cells", &[1])])
            .unwrap();
        let mut alloc = CarveoutAllocator::new();
        alloc
            .construct_mem_region(&mut tree, group, 0, &mut AppInputs::new())
            .unwrap();
        assert_eq!(tree.lookup(RESERVED_MEMORY_PATH), Some(existing));
        assert_eq!(tree.node(existing).cells("#size-cells"), &[1]);
    }

    #[test]
    fn wide_addresses_split_into_cells() {
        let mut memory = MEMORY;
        memory[0] = 0x8;
        let (mut tree, group) = tree_with_group("rg0", &memory);
        let mut facts = AppInputs::new();
        CarveoutAllocator::new()
            .construct_mem_region(&mut tree, group, 0, &mut facts)
            .unwrap();
        let elf = tree.lookup("/reserved-memory/rpu0elfload").unwrap();
        assert_eq!(tree.node(elf).cells("reg"), &[0x8, 0x3ed0_0000, 0, 0x4_0000]);
        assert_eq!(facts.get("rg0elfload_base"), Some("0x83ed00000"));
    }

    #[test]
    fn short_memory_list_is_rejected() {
        let (mut tree, group) = tree_with_group("rg0", &MEMORY[..12]);
        let err = CarveoutAllocator::new()
            .construct_mem_region(&mut tree, group, 0, &mut AppInputs::new())
            .unwrap_err();
        assert!(matches!(err, AmpError::MalformedProperty { prop: "memory", .. }));
        assert!(tree.lookup("/reserved-memory/rpu0elfload").is_none());
    }

    #[test]
    fn existing_phandle_blocks_allocation() {
        let (mut tree, group) = tree_with_group("rg0", &MEMORY);
        tree.add_node("/taken", vec![Property::cells("phandle", &[0x5ed0])])
            .unwrap();
        assert_eq!(
            CarveoutAllocator::new().construct_mem_region(
                &mut tree,
                group,
                0,
                &mut AppInputs::new()
            ),
            Err(AmpError::PhandleConflict(0x5ed0))
        );
    }
}
