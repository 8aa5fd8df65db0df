// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Options passed to the OpenAMP assist by the host tool.
// Author: Lukas Bower

use std::collections::BTreeMap;

/// Environment variable consulted by [`AssistOptions::default`].
pub const VERBOSE_ENV: &str = "OPENAMP_ASSIST_VERBOSE";

/// Assist options. Only `verbose` is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AssistOptions {
    pub verbose: u8,
}

impl Default for AssistOptions {
    fn default() -> Self {
        Self {
            verbose: std::env::var(VERBOSE_ENV)
                .ok()
                .and_then(|v| parse_verbose(&v))
                .unwrap_or(0),
        }
    }
}

impl AssistOptions {
    pub fn quiet() -> Self {
        Self { verbose: 0 }
    }

    /// Build options from the host's option mapping.
    ///
    /// A missing or unparsable `verbose` entry means 0.
    pub fn from_map(options: &BTreeMap<String, String>) -> Self {
        Self {
            verbose: options
                .get("verbose")
                .and_then(|v| parse_verbose(v))
                .unwrap_or(0),
        }
    }
}

fn parse_verbose(value: &str) -> Option<u8> {
    match value.trim() {
        "true" | "yes" => Some(1),
        "false" | "no" => Some(0),
        other => other.parse().ok(),
    }
}
