// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: OpenAMP RPU assist for Xilinx system device trees.
// Author: Lukas Bower
#![forbid(unsafe_code)]

//! Resolve OpenAMP channels between an APU host domain and R5 remote
//! domains, then synthesize the remoteproc, carveout and TCM nodes the
//! host kernel needs. Resolved addresses and bitmasks are returned as
//! [`facts::AppInputs`] for downstream header generation.

pub mod carveout;
pub mod config;
pub mod core_config;
pub mod decode;
pub mod error;
pub mod facts;
pub mod orchestrator;
pub mod platform;
pub mod resolver;
pub mod synth;
pub mod tree;

pub use config::AssistOptions;
pub use error::{AmpError, AmpResult};
pub use facts::AppInputs;
pub use orchestrator::{is_compat, xlnx_openamp_rpu, AmpRun, AssistOutcome, Resolution};
pub use tree::DeviceTree;
