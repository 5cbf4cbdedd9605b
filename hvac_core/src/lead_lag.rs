//! Lead/lag coordination for redundant equipment groups.
//!
//! One member of a group is lead and runs; the others are lag and stay in
//! standby unless the lead looks failed or the load is extreme. Leadership
//! rotates on a fixed interval, but never while a member is running.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::util::{MILLIS_PER_HOUR, ms_to_hours};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LeadLagParams {
    pub rotation_interval_ms: u64,
    pub rotation_retry_ms: u64,
    /// Lead current below this while commanded on is treated as a failure.
    pub min_current_amps: f64,
}

impl Default for LeadLagParams {
    fn default() -> Self {
        Self {
            rotation_interval_ms: 168 * MILLIS_PER_HOUR,
            rotation_retry_ms: 15 * 60 * 1000,
            min_current_amps: 0.5,
        }
    }
}

/// Band of a group metric in which a lag member runs alongside the lead.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ExtremeBand {
    pub metric: String,
    pub below: Option<f64>,
    pub above: Option<f64>,
}

impl ExtremeBand {
    pub fn contains(&self, value: f64) -> bool {
        self.below.is_some_and(|b| value <= b) || self.above.is_some_and(|a| value >= a)
    }
}

/// Shared memory for one lead-lag group.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LeadLagGroupMemory {
    pub group_id: String,
    pub member_runtime_hours: BTreeMap<String, f64>,
    pub lead_equipment_id: Option<String>,
    pub last_changeover_ms: Option<u64>,
    pub last_runtime_check_ms: BTreeMap<String, u64>,
    /// Set when a due rotation was deferred because a member was running.
    pub rotation_retry_at_ms: Option<u64>,
}

impl LeadLagGroupMemory {
    pub fn new(group_id: impl Into<String>) -> Self {
        Self {
            group_id: group_id.into(),
            ..Self::default()
        }
    }
}

/// What the group lead looks like from a lag member's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct LeadStatus {
    /// Last commanded enable of the lead.
    pub unit_enable: bool,
    pub amps: Option<f64>,
    pub fault: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LeadLagDecision {
    pub is_lead: bool,
    pub should_run: bool,
    pub reason: String,
    pub lead_equipment_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RotationOutcome {
    Rotated { from: String, to: String },
    Deferred { retry_at_ms: u64 },
    NotDue,
}

/// Lead for the group: cached assignment when it is still a member, otherwise
/// the lowest member id. Records the choice in `group`.
pub fn establish_lead(group: &mut LeadLagGroupMemory, members: &[String], now_ms: u64) -> Option<String> {
    if let Some(lead) = group.lead_equipment_id.as_ref() {
        if members.iter().any(|m| m == lead) {
            return Some(lead.clone());
        }
    }
    let lead = members.iter().min()?.clone();
    tracing::info!(group_id = %group.group_id, lead = %lead, "lead-lag group lead assigned");
    group.lead_equipment_id = Some(lead.clone());
    if group.last_changeover_ms.is_none() {
        group.last_changeover_ms = Some(now_ms);
    }
    Some(lead)
}

/// Role and run decision for `equipment_id`.
///
/// `lead_override` is the unit's explicit lead setting, `lead_status` the lead's
/// live state (only consulted by lag members), `extreme` whether the group's
/// controlled variable is in its extreme band.
#[allow(clippy::too_many_arguments)]
pub fn resolve_lead_lag(
    equipment_id: &str,
    members: &[String],
    lead_override: Option<bool>,
    group: &mut LeadLagGroupMemory,
    lead_status: Option<&LeadStatus>,
    extreme: bool,
    params: &LeadLagParams,
    now_ms: u64,
) -> LeadLagDecision {
    let lead = establish_lead(group, members, now_ms);

    let is_lead = match lead_override {
        Some(v) => v,
        None => lead.as_deref() == Some(equipment_id),
    };

    if is_lead {
        let reason = if lead_override.is_some() {
            "lead (override)"
        } else {
            "lead"
        };
        return LeadLagDecision {
            is_lead: true,
            should_run: true,
            reason: reason.to_string(),
            lead_equipment_id: lead,
        };
    }

    let failure = lead_status.and_then(|s| {
        if s.fault {
            return Some("lead fault status".to_string());
        }
        match s.amps {
            Some(a) if s.unit_enable && a < params.min_current_amps => Some(format!(
                "lead current {a:.2}A below {:.2}A while enabled",
                params.min_current_amps
            )),
            _ => None,
        }
    });

    let (should_run, reason) = if let Some(f) = failure {
        tracing::warn!(equipment_id, reason = %f, "lag member taking over");
        (true, format!("failover: {f}"))
    } else if extreme {
        (true, "lag assist: extreme load".to_string())
    } else {
        (false, "lag standby".to_string())
    };

    LeadLagDecision {
        is_lead: false,
        should_run,
        reason,
        lead_equipment_id: lead,
    }
}

/// Scheduled rotation check. Rotates to the next member in id order.
pub fn check_rotation(
    group: &mut LeadLagGroupMemory,
    members: &[String],
    any_running: bool,
    params: &LeadLagParams,
    now_ms: u64,
) -> RotationOutcome {
    let Some(lead) = group.lead_equipment_id.clone() else {
        return RotationOutcome::NotDue;
    };
    if members.len() < 2 {
        return RotationOutcome::NotDue;
    }
    let Some(last) = group.last_changeover_ms else {
        group.last_changeover_ms = Some(now_ms);
        return RotationOutcome::NotDue;
    };
    if now_ms.saturating_sub(last) < params.rotation_interval_ms {
        return RotationOutcome::NotDue;
    }
    if let Some(retry_at) = group.rotation_retry_at_ms {
        if now_ms < retry_at {
            return RotationOutcome::NotDue;
        }
    }
    if any_running {
        let retry_at_ms = now_ms.saturating_add(params.rotation_retry_ms);
        group.rotation_retry_at_ms = Some(retry_at_ms);
        tracing::debug!(group_id = %group.group_id, retry_at_ms, "rotation deferred, member running");
        return RotationOutcome::Deferred { retry_at_ms };
    }

    let mut sorted: Vec<&String> = members.iter().collect();
    sorted.sort();
    let next = match sorted.iter().position(|m| **m == lead) {
        Some(i) => sorted[(i + 1) % sorted.len()].clone(),
        None => sorted[0].clone(),
    };
    group.lead_equipment_id = Some(next.clone());
    group.last_changeover_ms = Some(now_ms);
    group.rotation_retry_at_ms = None;
    tracing::info!(group_id = %group.group_id, from = %lead, to = %next, "lead-lag rotation");
    RotationOutcome::Rotated { from: lead, to: next }
}

/// Add elapsed hours to the member's runtime when it was enabled since the last check.
pub fn record_runtime(group: &mut LeadLagGroupMemory, equipment_id: &str, enabled: bool, now_ms: u64) {
    if let Some(prev) = group.last_runtime_check_ms.get(equipment_id).copied() {
        if enabled {
            let hours = ms_to_hours(now_ms.saturating_sub(prev));
            *group
                .member_runtime_hours
                .entry(equipment_id.to_string())
                .or_insert(0.0) += hours;
        }
    }
    group
        .last_runtime_check_ms
        .insert(equipment_id.to_string(), now_ms);
}
