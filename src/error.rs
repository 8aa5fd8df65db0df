// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Error taxonomy for OpenAMP domain resolution and node synthesis.
// Author: Lukas Bower

//! Errors surfaced by the resolver, allocator and synthesizer.
//!
//! Every function in the crate returns [`AmpError`] instead of aborting so the
//! orchestrator can stop at the failing channel and report why.

use thiserror::Error;

use crate::tree::TreeError;

/// Errors produced while resolving an OpenAMP channel.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AmpError {
    /// A property exists but does not have the expected shape.
    #[error("{node}: property {prop} is malformed: {reason}")]
    MalformedProperty {
        node: String,
        prop: &'static str,
        reason: String,
    },
    /// `include` must hold resource-group / role-flag pairs.
    #[error("{node}: include list has odd length {len}, expected pairs")]
    OddIncludeList { node: String, len: usize },
    /// A reference cell did not resolve to a node.
    #[error("{node}: {prop} references unknown phandle {phandle:#x}")]
    DanglingReference {
        node: String,
        prop: &'static str,
        phandle: u32,
    },
    /// A node required by the assist is not present at its fixed path.
    #[error("required node {0} not found")]
    MissingNode(String),
    /// A node is missing a property needed for the transformation.
    #[error("{node}: missing property {prop}")]
    MissingProperty { node: String, prop: &'static str },
    /// No other domain includes the resource group.
    #[error("no remote domain includes resource group {group}")]
    NoRemotePeer { group: String },
    /// The channel index has no matching mailbox controller in `access`.
    #[error("{domain}: no mailbox controller for channel {index} ({group})")]
    NoMailbox {
        domain: String,
        group: String,
        index: usize,
    },
    /// The root compatible string names no supported SoC family.
    #[error("unsupported platform: {0}")]
    UnsupportedPlatform(String),
    /// The `cpus` core mask does not select a supported layout.
    #[error("{node}: unsupported core mask {mask:#x}")]
    InvalidCoreMask { node: String, mask: u32 },
    /// A synthesized property is already present and must not be overwritten.
    #[error("{node}: {prop} already configured")]
    AlreadyConfigured { node: String, prop: &'static str },
    /// An address has no entry in a static platform table.
    #[error("address {address:#x} not present in {table} table")]
    UnknownAddress { table: &'static str, address: u32 },
    /// An IPI node referenced from a domain is not a usable mailbox.
    #[error("invalid {role} IPI {node}: {reason}")]
    InvalidIpi {
        role: &'static str,
        node: String,
        reason: &'static str,
    },
    /// A carveout identifier collides with a phandle already in the tree.
    #[error("carveout phandle {0:#x} already used in tree")]
    PhandleConflict(u32),
    /// The underlying tree rejected an operation.
    #[error(transparent)]
    Tree(#[from] TreeError),
}

/// Result alias used throughout the crate.
pub type AmpResult<T> = Result<T, AmpError>;
