//! Run report printed by the CLI.

use std::fmt::Write as _;

use serde::Serialize;

use fleetcycle_core::{RecycleWorkItem, WorkItemState};

/// Outcome of one recycle run, successful or not.
#[derive(Debug, Clone, Serialize)]
pub struct RecycleSummary {
    pub cluster: String,
    pub capacity_group: String,
    pub dry_run: bool,
    pub baseline_desired: Option<u32>,
    pub baseline_max_size: Option<u32>,
    pub restored: bool,
    pub items: Vec<RecycleWorkItem>,
}

impl RecycleSummary {
    pub fn terminated(&self) -> usize {
        self.items
            .iter()
            .filter(|i| i.state == WorkItemState::Terminated)
            .count()
    }

    pub fn forced(&self) -> usize {
        self.items.iter().filter(|i| i.forced).count()
    }

    pub fn failed(&self) -> Option<&RecycleWorkItem> {
        self.items.iter().find(|i| i.state == WorkItemState::Failed)
    }

    /// Every baseline member was replaced.
    pub fn is_complete(&self) -> bool {
        !self.dry_run && self.items.iter().all(|i| i.state == WorkItemState::Terminated)
    }

    /// Human-readable table of work items.
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        let mode = if self.dry_run { " (dry run)" } else { "" };
        let _ = writeln!(
            out,
            "cluster {} / group {}{}",
            self.cluster, self.capacity_group, mode
        );
        if let (Some(desired), Some(max)) = (self.baseline_desired, self.baseline_max_size) {
            let _ = writeln!(out, "baseline desired {desired}, max {max}");
        }
        let _ = writeln!(
            out,
            "{:<4} {:<48} {:<22} {:<20} {}",
            "#", "MEMBER", "HOST", "STATE", "REPLACEMENT"
        );
        for (i, item) in self.items.iter().enumerate() {
            let state = match (item.state, item.forced) {
                (WorkItemState::Terminated, true) => "TERMINATED (forced)".to_string(),
                (state, _) => state.to_string(),
            };
            let _ = writeln!(
                out,
                "{:<4} {:<48} {:<22} {:<20} {}",
                i + 1,
                item.member.instance_id,
                item.member.host_id,
                state,
                item.replacement.as_deref().unwrap_or("-")
            );
            if let Some(reason) = &item.failure {
                let _ = writeln!(out, "     error: {reason}");
            }
        }
        let _ = write!(
            out,
            "{}/{} replaced",
            self.terminated(),
            self.items.len()
        );
        if self.restored {
            out.push_str(", capacity restored");
        }
        out.push('\n');
        out
    }
}
