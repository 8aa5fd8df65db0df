// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Shared Versal system device tree fixtures for OpenAMP assist tests.
// Author: Lukas Bower
#![allow(dead_code)]

use openamp_xlnx::tree::load::{parse_description, DescriptionFormat};
use openamp_xlnx::DeviceTree;

/// One remote R5 domain and the channel it serves.
pub struct RemoteSpec {
    pub name: &'static str,
    pub core_mask: u32,
    pub group: &'static str,
    /// Label of the IPI block the remote lists first in `access`.
    pub ipi: &'static str,
}

pub struct Fixture {
    pub root_compatible: &'static str,
    pub lockstep: bool,
    /// Host `access` list, as labels.
    pub host_access: Vec<&'static str>,
    pub remotes: Vec<RemoteSpec>,
}

impl Fixture {
    /// One kernel-mediated channel: APU hosts `groupA`, R5 core 1 is remote.
    pub fn kernel() -> Self {
        Self {
            root_compatible: "xlnx,versal",
            lockstep: false,
            host_access: vec!["mbox_a"],
            remotes: vec![RemoteSpec {
                name: "r5_1",
                core_mask: 0x2,
                group: "groupA",
                ipi: "ipi_ff340000",
            }],
        }
    }

    /// Same channel without a kernel mailbox: the APU only names its own IPI.
    pub fn userspace() -> Self {
        Self {
            host_access: vec!["ipi_ff330000"],
            ..Self::kernel()
        }
    }

    /// Two kernel channels, one per R5 core.
    pub fn two_channels() -> Self {
        Self {
            host_access: vec!["mbox_a", "ipi_ff360000", "mbox_b"],
            remotes: vec![
                RemoteSpec {
                    name: "r5_1",
                    core_mask: 0x2,
                    group: "groupA",
                    ipi: "ipi_ff340000",
                },
                RemoteSpec {
                    name: "r5_0",
                    core_mask: 0x1,
                    group: "groupB",
                    ipi: "ipi_ff350000",
                },
            ],
            ..Self::kernel()
        }
    }

    pub fn description(&self) -> String {
        let mut out = String::new();
        let cluster_mode: u32 = if self.lockstep { 0xc000_0000 } else { 0x8000_0000 };

        node(
            &mut out,
            "/",
            None,
            &[(
                "compatible",
                format!("[\"{0}-board\", \"{0}\"]", self.root_compatible),
            )],
        );
        node(&mut out, "/amba_apu", None, &[]);
        node(&mut out, "/amba_apu/interrupt-controller@f9000000", Some("gic"), &[]);
        node(&mut out, "/amba", None, &[]);
        for base in ["ff330000", "ff340000", "ff350000", "ff360000"] {
            node(
                &mut out,
                &format!("/amba/ipi@{base}"),
                Some(&format!("ipi_{base}")),
                &[
                    ("compatible", "\"xlnx,zynqmp-ipi-mailbox\"".into()),
                    ("reg", format!("[0, 0x{base}, 0, 0x1000]")),
                    ("\"xlnx,ipi-id\"", "5".into()),
                    ("interrupts", "[0, 30, 4]".into()),
                ],
            );
        }
        mailbox(&mut out, "/zynqmp_ipi1", "mbox_a", 0x400, 0x600);
        mailbox(&mut out, "/zynqmp_ipi2", "mbox_b", 0x800, 0xa00);

        node(&mut out, "/cpus_r5", Some("cpus_r5"), &[]);
        node(&mut out, "/tcm@ffe00000", Some("tcm_a"), &[]);
        node(&mut out, "/tcm@ffe20000", Some("tcm_b"), &[]);
        node(&mut out, "/tcm@ffe90000", Some("tcm_c"), &[]);
        node(&mut out, "/tcm@ffeb0000", Some("tcm_d"), &[]);

        node(&mut out, "/domains", None, &[]);
        let groups: Vec<&str> = self.remotes.iter().map(|r| r.group).collect();
        for (idx, group) in groups.iter().enumerate() {
            let base = 0x3ed0_0000 + (idx as u32) * 0x0100_0000;
            let tcm = if idx == 0 { "\"&tcm_a\", \"&tcm_b\"" } else { "\"&tcm_c\", \"&tcm_d\"" };
            node(
                &mut out,
                &format!("/domains/{group}"),
                Some(group),
                &[
                    (
                        "memory",
                        format!(
                            "[0, {:#x}, 0, 0x40000, 0, {:#x}, 0, 0x4000, 0, {:#x}, 0, 0x4000, 0, {:#x}, 0, 0x100000]",
                            base,
                            base + 0x4_0000,
                            base + 0x4_4000,
                            base + 0x4_8000
                        ),
                    ),
                    ("access", format!("[{tcm}]")),
                ],
            );
        }

        let include: Vec<String> = groups.iter().map(|g| format!("\"&{g}\", 1")).collect();
        let access: Vec<String> = self.host_access.iter().map(|l| format!("\"&{l}\"")).collect();
        node(
            &mut out,
            "/domains/apu",
            Some("apu"),
            &[
                ("compatible", "\"openamp,domain-v1\"".into()),
                ("include", format!("[{}]", include.join(", "))),
                ("access", format!("[{}]", access.join(", "))),
            ],
        );
        node(
            &mut out,
            "/domains/rpu_cluster",
            None,
            &[("cpus", format!("[\"&cpus_r5\", 0x3, {cluster_mode:#x}]"))],
        );
        for remote in &self.remotes {
            node(
                &mut out,
                &format!("/domains/rpu_cluster/{}", remote.name),
                Some(remote.name),
                &[
                    ("compatible", "\"openamp,domain-v1\"".into()),
                    (
                        "cpus",
                        format!("[\"&cpus_r5\", {:#x}, {cluster_mode:#x}]", remote.core_mask),
                    ),
                    ("include", format!("[\"&{}\", 0]", remote.group)),
                    ("access", format!("[\"&{}\"]", remote.ipi)),
                ],
            );
        }
        out
    }

    pub fn build(&self) -> DeviceTree {
        parse_description(&self.description(), DescriptionFormat::Toml)
            .expect("fixture parses")
            .build()
            .expect("fixture builds")
    }
}

fn mailbox(out: &mut String, path: &str, label: &str, local: u32, remote: u32) {
    let buffers = 0xff3f_0000u32;
    node(
        out,
        path,
        Some(label),
        &[
            ("compatible", "\"xlnx,zynqmp-ipi-mailbox\"".into()),
            ("\"xlnx,ipi-id\"", "1".into()),
            (
                "reg-names",
                "[\"local_request_region\", \"local_response_region\", \"remote_request_region\", \"remote_response_region\"]"
                    .into(),
            ),
            (
                "reg",
                format!(
                    "[{:#x}, 0x20, {:#x}, 0x20, {:#x}, 0x20, {:#x}, 0x20]",
                    buffers | local,
                    buffers | (local + 0x20),
                    buffers | remote,
                    buffers | (remote + 0x20)
                ),
            ),
        ],
    );
}

fn node(out: &mut String, path: &str, label: Option<&str>, props: &[(&str, String)]) {
    out.push_str("[[node]]\n");
    out.push_str(&format!("path = \"{path}\"\n"));
    if let Some(label) = label {
        out.push_str(&format!("label = \"{label}\"\n"));
    }
    if !props.is_empty() {
        out.push_str("[node.props]\n");
        for (name, value) in props {
            out.push_str(&format!("{name} = {value}\n"));
        }
    }
    out.push('\n');
}

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}
