//! Output formatting utilities for the CLI
//!
//! Tables for fleet records and per-VM reports, the daemon status block,
//! and colored status messages.

use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};
use tabled::{
    settings::{Style, Width},
    Table, Tabled,
};

use mci_core::api::{DaemonStatus, SshKeySummary};
use mci_core::model::{
    ActionReport, CommandResult, ConnectionConfig, DeleteReport, MciAccessInfo, MciInfo,
    MciStatusInfo, Namespace, Vm, VmDeleteResult, VnetBastions,
};
use mci_core::StatusCount;

fn dash(value: Option<&str>) -> String {
    value.unwrap_or("-").to_string()
}

/// Format MCIs as a summary table, one row per MCI
pub fn format_mcis(mcis: &[MciInfo]) -> String {
    if mcis.is_empty() {
        return "No MCIs".to_string();
    }

    #[derive(Tabled)]
    struct MciRow {
        #[tabled(rename = "MCI")]
        id: String,
        #[tabled(rename = "STATUS")]
        status: String,
        #[tabled(rename = "VMS")]
        vms: String,
        #[tabled(rename = "SUBGROUPS")]
        sub_groups: usize,
        #[tabled(rename = "AGENT")]
        agent: &'static str,
        #[tabled(rename = "DESCRIPTION")]
        description: String,
    }

    let rows: Vec<MciRow> = mcis
        .iter()
        .map(|info| MciRow {
            id: info.mci.id.to_string(),
            status: info.status.to_string(),
            vms: format!("{}/{}", info.status_count.running, info.status_count.total),
            sub_groups: info.mci.sub_groups.len(),
            agent: if info.mci.agent_installed { "yes" } else { "no" },
            description: info.mci.description.clone(),
        })
        .collect();

    Table::new(rows)
        .with(Style::rounded())
        .with(Width::wrap(120))
        .to_string()
}

/// Format the VMs of one MCI
pub fn format_vms(vms: &[Vm], detailed: bool) -> String {
    if vms.is_empty() {
        return "No VMs".to_string();
    }

    #[derive(Tabled)]
    struct VmRow {
        #[tabled(rename = "VM")]
        id: String,
        #[tabled(rename = "SUBGROUP")]
        sub_group: String,
        #[tabled(rename = "STATUS")]
        status: String,
        #[tabled(rename = "PUBLIC IP")]
        public_ip: String,
        #[tabled(rename = "PRIVATE IP")]
        private_ip: String,
        #[tabled(rename = "CONNECTION")]
        connection: String,
    }

    #[derive(Tabled)]
    struct VmRowDetailed {
        #[tabled(rename = "VM")]
        id: String,
        #[tabled(rename = "SUBGROUP")]
        sub_group: String,
        #[tabled(rename = "STATUS")]
        status: String,
        #[tabled(rename = "TARGET")]
        target: String,
        #[tabled(rename = "PUBLIC IP")]
        public_ip: String,
        #[tabled(rename = "PRIVATE IP")]
        private_ip: String,
        #[tabled(rename = "CSP ID")]
        csp_id: String,
        #[tabled(rename = "SPEC")]
        spec: String,
        #[tabled(rename = "MESSAGE")]
        message: String,
    }

    if detailed {
        let rows: Vec<VmRowDetailed> = vms
            .iter()
            .map(|vm| VmRowDetailed {
                id: vm.id.to_string(),
                sub_group: vm.sub_group_id.to_string(),
                status: vm.status.to_string(),
                target: match (vm.target_action, vm.target_status) {
                    (Some(action), Some(status)) => format!("{} -> {}", action, status),
                    (Some(action), None) => action.to_string(),
                    _ => "-".to_string(),
                },
                public_ip: dash(vm.public_ip.as_deref()),
                private_ip: dash(vm.private_ip.as_deref()),
                csp_id: truncate(vm.csp_vm_id.as_deref().unwrap_or("-"), 20),
                spec: vm.spec_id.clone(),
                message: dash(vm.system_message.as_deref()),
            })
            .collect();

        Table::new(rows)
            .with(Style::rounded())
            .with(Width::wrap(140))
            .to_string()
    } else {
        let rows: Vec<VmRow> = vms
            .iter()
            .map(|vm| VmRow {
                id: vm.id.to_string(),
                sub_group: vm.sub_group_id.to_string(),
                status: vm.status.to_string(),
                public_ip: dash(vm.public_ip.as_deref()),
                private_ip: dash(vm.private_ip.as_deref()),
                connection: vm.connection_name.clone(),
            })
            .collect();

        Table::new(rows).with(Style::rounded()).to_string()
    }
}

/// Format one MCI: header block followed by its VM table
pub fn format_mci(info: &MciInfo, detailed: bool) -> String {
    let mut output = String::new();
    output.push_str(&format!("MCI: {}\n", info.mci.id));
    output.push_str(&format!("Status: {}\n", info.status));
    output.push_str(&format!("Counts: {}\n", format_counts(&info.status_count)));
    output.push_str(&format!("Target VMs: {}\n", info.mci.target_vm_count));
    output.push_str(&format!(
        "Agent installed: {}\n",
        if info.mci.agent_installed { "yes" } else { "no" }
    ));
    if !info.mci.description.is_empty() {
        output.push_str(&format!("Description: {}\n", info.mci.description));
    }
    output.push('\n');
    output.push_str(&format_vms(&info.vms, detailed));
    output
}

/// Non-zero per-state counts, e.g. `3 total, 2 running, 1 failed`
pub fn format_counts(count: &StatusCount) -> String {
    let states = [
        ("creating", count.creating),
        ("running", count.running),
        ("suspended", count.suspended),
        ("rebooting", count.rebooting),
        ("terminating", count.terminating),
        ("terminated", count.terminated),
        ("failed", count.failed),
        ("unknown", count.unknown),
    ];
    let mut parts = vec![format!("{} total", count.total)];
    parts.extend(
        states
            .iter()
            .filter(|(_, n)| *n > 0)
            .map(|(name, n)| format!("{} {}", n, name)),
    );
    parts.join(", ")
}

/// Format freshly polled MCI status
pub fn format_mci_status(status: &MciStatusInfo) -> String {
    #[derive(Tabled)]
    struct StatusRow {
        #[tabled(rename = "VM")]
        id: String,
        #[tabled(rename = "SUBGROUP")]
        sub_group: String,
        #[tabled(rename = "STATUS")]
        status: String,
        #[tabled(rename = "TARGET")]
        target: String,
        #[tabled(rename = "PUBLIC IP")]
        public_ip: String,
        #[tabled(rename = "MESSAGE")]
        message: String,
    }

    let mut output = format!(
        "MCI: {}\nStatus: {}\nCounts: {}\n\n",
        status.id,
        status.status,
        format_counts(&status.status_count)
    );
    if status.vms.is_empty() {
        output.push_str("No VMs");
        return output;
    }

    let rows: Vec<StatusRow> = status
        .vms
        .iter()
        .map(|vm| StatusRow {
            id: vm.id.to_string(),
            sub_group: vm.sub_group_id.to_string(),
            status: vm.status.to_string(),
            target: vm
                .target_status
                .map(|s| s.to_string())
                .unwrap_or_else(|| "-".to_string()),
            public_ip: dash(vm.public_ip.as_deref()),
            message: dash(vm.system_message.as_deref()),
        })
        .collect();
    output.push_str(&Table::new(rows).with(Style::rounded()).to_string());
    output
}

/// Format SSH access details grouped by SubGroup
pub fn format_access_info(info: &MciAccessInfo) -> String {
    #[derive(Tabled)]
    struct AccessRow {
        #[tabled(rename = "SUBGROUP")]
        sub_group: String,
        #[tabled(rename = "VM")]
        vm: String,
        #[tabled(rename = "PUBLIC IP")]
        public_ip: String,
        #[tabled(rename = "PRIVATE IP")]
        private_ip: String,
        #[tabled(rename = "PORT")]
        port: u16,
        #[tabled(rename = "USER")]
        user: String,
        #[tabled(rename = "KEY")]
        key: String,
        #[tabled(rename = "BASTION")]
        bastion: String,
    }

    let rows: Vec<AccessRow> = info
        .sub_groups
        .iter()
        .flat_map(|sg| {
            sg.vms.iter().map(move |vm| AccessRow {
                sub_group: sg.sub_group_id.to_string(),
                vm: vm.vm_id.to_string(),
                public_ip: dash(vm.public_ip.as_deref()),
                private_ip: dash(vm.private_ip.as_deref()),
                port: vm.ssh_port,
                user: vm.user_name.clone(),
                key: vm.ssh_key_id.clone(),
                bastion: vm
                    .bastion
                    .as_ref()
                    .map(|b| b.to_string())
                    .unwrap_or_else(|| "-".to_string()),
            })
        })
        .collect();

    if rows.is_empty() {
        return format!("MCI: {}\nNo VMs", info.mci_id);
    }
    format!(
        "MCI: {}\n{}",
        info.mci_id,
        Table::new(rows).with(Style::rounded())
    )
}

/// Format per-VM outcomes of an MCI action
pub fn format_action_report(report: &ActionReport) -> String {
    #[derive(Tabled)]
    struct ActionRow {
        #[tabled(rename = "VM")]
        vm: String,
        #[tabled(rename = "STATUS")]
        status: String,
        #[tabled(rename = "ERROR")]
        error: String,
    }

    let rows: Vec<ActionRow> = report
        .results
        .iter()
        .map(|r| ActionRow {
            vm: r.vm_id.to_string(),
            status: r.status.to_string(),
            error: dash(r.error.as_deref()),
        })
        .collect();

    format!(
        "{} {}\n{}",
        report.action,
        report.mci_id,
        Table::new(rows).with(Style::rounded())
    )
}

/// Format per-VM outcomes of a deletion
pub fn format_delete_report(report: &DeleteReport) -> String {
    let mut output = format!(
        "MCI {}: {}\n",
        report.mci_id,
        if report.mci_removed {
            "removed"
        } else {
            "kept (some VMs could not be confirmed terminated)"
        }
    );
    if !report.results.is_empty() {
        output.push_str(&format_vm_deletes(&report.results));
    }
    output
}

pub fn format_vm_deletes(results: &[VmDeleteResult]) -> String {
    #[derive(Tabled)]
    struct DeleteRow {
        #[tabled(rename = "VM")]
        vm: String,
        #[tabled(rename = "REMOVED")]
        removed: &'static str,
        #[tabled(rename = "NOTE")]
        note: String,
    }

    let rows: Vec<DeleteRow> = results
        .iter()
        .map(|r| DeleteRow {
            vm: r.vm_id.to_string(),
            removed: if r.removed { "yes" } else { "no" },
            note: dash(r.error.as_deref()),
        })
        .collect();
    Table::new(rows).with(Style::rounded()).to_string()
}

/// Format remote command results, one section per VM
pub fn format_command_results(results: &[CommandResult]) -> String {
    if results.is_empty() {
        return "No target VMs".to_string();
    }

    let mut output = String::new();
    for result in results {
        output.push_str(&format!(
            "== {}/{} ({})\n",
            result.mci_id,
            result.vm_id,
            result.vm_ip.as_deref().unwrap_or("no address")
        ));
        if let Some(error) = &result.error {
            output.push_str(&format!("error: {}\n", error));
        }
        for out in &result.outputs {
            let status = out
                .exit_status
                .map(|s| s.to_string())
                .unwrap_or_else(|| "?".to_string());
            output.push_str(&format!("$ {}  [exit {}]\n", out.command, status));
            if !out.stdout.is_empty() {
                output.push_str(out.stdout.trim_end());
                output.push('\n');
            }
            if !out.stderr.is_empty() {
                output.push_str(&format!("stderr: {}\n", out.stderr.trim_end()));
            }
        }
        output.push('\n');
    }
    output
}

pub fn format_namespaces(namespaces: &[Namespace]) -> String {
    if namespaces.is_empty() {
        return "No namespaces".to_string();
    }

    #[derive(Tabled)]
    struct NamespaceRow {
        #[tabled(rename = "NAMESPACE")]
        id: String,
        #[tabled(rename = "DESCRIPTION")]
        description: String,
    }

    let rows: Vec<NamespaceRow> = namespaces
        .iter()
        .map(|ns| NamespaceRow {
            id: ns.id.to_string(),
            description: ns.description.clone(),
        })
        .collect();
    Table::new(rows).with(Style::rounded()).to_string()
}

pub fn format_connections(connections: &[ConnectionConfig]) -> String {
    if connections.is_empty() {
        return "No connections registered".to_string();
    }

    #[derive(Tabled)]
    struct ConnectionRow {
        #[tabled(rename = "NAME")]
        name: String,
        #[tabled(rename = "PROVIDER")]
        provider: String,
        #[tabled(rename = "REGION")]
        region: String,
        #[tabled(rename = "ZONE")]
        zone: String,
        #[tabled(rename = "CREDENTIAL")]
        credential: String,
    }

    let rows: Vec<ConnectionRow> = connections
        .iter()
        .map(|c| ConnectionRow {
            name: c.name.clone(),
            provider: c.provider.clone(),
            region: c.region.clone(),
            zone: dash(c.zone.as_deref()),
            credential: c.credential.clone(),
        })
        .collect();
    Table::new(rows).with(Style::rounded()).to_string()
}

pub fn format_ssh_keys(keys: &[SshKeySummary]) -> String {
    if keys.is_empty() {
        return "No SSH keys registered".to_string();
    }

    #[derive(Tabled)]
    struct KeyRow {
        #[tabled(rename = "KEY")]
        id: String,
        #[tabled(rename = "USER")]
        user: String,
        #[tabled(rename = "DESCRIPTION")]
        description: String,
    }

    let rows: Vec<KeyRow> = keys
        .iter()
        .map(|k| KeyRow {
            id: k.id.clone(),
            user: k.user_name.clone(),
            description: k.description.clone(),
        })
        .collect();
    Table::new(rows).with(Style::rounded()).to_string()
}

pub fn format_bastions(vnets: &[VnetBastions]) -> String {
    #[derive(Tabled)]
    struct BastionRow {
        #[tabled(rename = "VNET")]
        vnet: String,
        #[tabled(rename = "MCI")]
        mci: String,
        #[tabled(rename = "BASTION VM")]
        vm: String,
    }

    let rows: Vec<BastionRow> = vnets
        .iter()
        .flat_map(|v| {
            v.nodes.iter().map(move |node| BastionRow {
                vnet: v.vnet_id.clone(),
                mci: node.mci_id.to_string(),
                vm: node.vm_id.to_string(),
            })
        })
        .collect();

    if rows.is_empty() {
        return "No bastions assigned".to_string();
    }
    Table::new(rows).with(Style::rounded()).to_string()
}

/// Format daemon status as a human-readable block
pub fn format_status(status: &DaemonStatus) -> String {
    let mut output = String::new();
    output.push_str(&format!(
        "Orchestrator Status: {}\n",
        if status.running { "Running" } else { "Stopped" }
    ));
    output.push_str(&format!("Version: {}\n", status.version));
    output.push_str(&format!("Listening: {}\n", status.bind_address));
    output.push_str(&format!("Uptime: {}\n", format_duration(status.uptime_secs)));
    output.push_str(&format!("Namespaces: {}\n", status.namespace_count));
    output.push_str(&format!("Connections: {}\n", status.connection_count));
    output.push_str(&format!(
        "Providers: {}\n",
        if status.providers.is_empty() {
            "none".to_string()
        } else {
            status.providers.join(", ")
        }
    ));
    output
}

/// Format duration in human-readable form
fn format_duration(secs: u64) -> String {
    match secs {
        s if s < 60 => format!("{}s", s),
        s if s < 3600 => format!("{}m {}s", s / 60, s % 60),
        s if s < 86400 => format!("{}h {}m", s / 3600, (s % 3600) / 60),
        s => format!("{}d {}h", s / 86400, (s % 86400) / 3600),
    }
}

/// Truncate a string with ellipsis if too long
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

fn print_colored(mut out: impl std::io::Write, color: Color, symbol: &str, msg: &str) {
    let _ = crossterm::execute!(
        out,
        SetForegroundColor(color),
        Print(symbol),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}

/// Print a success message in green with a checkmark prefix
pub fn print_success(msg: &str) {
    print_colored(std::io::stdout(), Color::Green, "✓ ", msg);
}

/// Print an error message in red to stderr
pub fn print_error(msg: &str) {
    print_colored(std::io::stderr(), Color::Red, "✗ ", msg);
}

/// Print a warning message in yellow to stderr
pub fn print_warning(msg: &str) {
    print_colored(std::io::stderr(), Color::Yellow, "⚠ ", msg);
}

/// Print an informational message in cyan
pub fn print_info(msg: &str) {
    print_colored(std::io::stdout(), Color::Cyan, "ℹ ", msg);
}
