//! Command emission: one command per changed output field.

use hvac_traits::{Command, CommandSink, FieldMap};
use serde::Serialize;

use crate::control::EquipmentRef;
use crate::source_error::map_sink_error;
use crate::store::ControlCache;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct EmitSummary {
    pub sent: usize,
    pub failed: usize,
    pub unchanged: usize,
}

/// Fields of `outputs` that differ from what the cache last recorded.
pub fn changed_fields<'a>(outputs: &'a FieldMap, cached: Option<&FieldMap>) -> Vec<&'a str> {
    outputs
        .iter()
        .filter(|(k, v)| !cached.and_then(|c| c.get(*k)).is_some_and(|old| old.same_as(v)))
        .map(|(k, _)| k.as_str())
        .collect()
}

/// Send a command for every changed field, then merge all outputs into the
/// cache. The merge happens whether or not delivery succeeded.
pub fn emit(
    sink: &mut dyn CommandSink,
    cache: &mut ControlCache,
    eq: &EquipmentRef,
    outputs: &FieldMap,
    now_ms: u64,
) -> EmitSummary {
    let cached = cache.values(&eq.site_id, &eq.equipment_id);
    let changed = changed_fields(outputs, cached);
    let mut summary = EmitSummary {
        unchanged: outputs.len() - changed.len(),
        ..EmitSummary::default()
    };

    for field in changed {
        let Some(value) = outputs.get(field) else {
            continue;
        };
        let command = Command {
            equipment_id: eq.equipment_id.clone(),
            site_id: eq.site_id.clone(),
            equipment_type: eq.equipment_type.clone(),
            command_type: field.to_string(),
            value: value.clone(),
            timestamp_ms: now_ms,
        };
        match sink.send(&command) {
            Ok(()) => summary.sent += 1,
            Err(e) => {
                let err = map_sink_error(e.as_ref());
                tracing::warn!(
                    equipment_id = %eq.equipment_id,
                    site_id = %eq.site_id,
                    field,
                    error = %err,
                    "command delivery failed"
                );
                summary.failed += 1;
            }
        }
    }

    cache.merge(&eq.site_id, &eq.equipment_id, outputs, now_ms);
    summary
}
