//! Equipment directory backed by the configured site inventory.

use std::collections::HashMap;

use hvac_traits::{BoxError, DirectoryEntry, EquipmentDirectory};

/// Read-only directory built once from config. Run-all order is config order.
#[derive(Debug, Clone, Default)]
pub struct StaticDirectory {
    entries: Vec<DirectoryEntry>,
    by_id: HashMap<String, usize>,
}

impl StaticDirectory {
    pub fn new(entries: Vec<DirectoryEntry>) -> Self {
        let mut by_id = HashMap::with_capacity(entries.len());
        for (i, e) in entries.iter().enumerate() {
            if by_id.insert(e.equipment_id.clone(), i).is_some() {
                tracing::warn!(equipment_id = %e.equipment_id, "duplicate equipment id, later entry wins");
            }
        }
        Self { entries, by_id }
    }

    pub fn from_config(cfg: &hvac_config::Config) -> Self {
        let entries = cfg
            .sites
            .iter()
            .flat_map(|site| {
                site.equipment.iter().map(move |eq| DirectoryEntry {
                    equipment_id: eq.id.clone(),
                    site_id: site.id.clone(),
                    equipment_type: eq.equipment_type.clone(),
                    name: eq.name.clone(),
                    system_name: eq.system_name.clone(),
                    group_id: eq.group.clone(),
                    aliases: eq.aliases.clone(),
                })
            })
            .collect();
        Self::new(entries)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl EquipmentDirectory for StaticDirectory {
    fn lookup(&self, equipment_id: &str) -> Result<Option<DirectoryEntry>, BoxError> {
        Ok(self
            .by_id
            .get(equipment_id)
            .and_then(|&i| self.entries.get(i))
            .cloned())
    }

    fn eligible(&self) -> Result<Vec<DirectoryEntry>, BoxError> {
        Ok(self.entries.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CFG: &str = r#"
        [[sites]]
        id = "site-a"

        [[sites.equipment]]
        id = "pump-2"
        type = "HW Pump"
        group = "hw"

        [[sites.equipment]]
        id = "pump-1"
        type = "HW Pump"
        group = "hw"
        system_name = "HWPump1"

        [[sites]]
        id = "site-b"

        [[sites.equipment]]
        id = "boiler-9"
        type = "Comfort Boiler"
        aliases = ["B9"]
    "#;

    fn dir() -> StaticDirectory {
        StaticDirectory::from_config(&hvac_config::load_toml(CFG).unwrap())
    }

    #[test]
    fn lookup_carries_site_and_group() {
        let d = dir();
        let e = d.lookup("pump-1").unwrap().unwrap();
        assert_eq!(e.site_id, "site-a");
        assert_eq!(e.group_id.as_deref(), Some("hw"));
        assert_eq!(e.system_name.as_deref(), Some("HWPump1"));
        assert_eq!(d.lookup("boiler-9").unwrap().unwrap().aliases, vec!["B9"]);
        assert!(d.lookup("ghost").unwrap().is_none());
    }

    #[test]
    fn eligible_keeps_config_order_and_groups_sort() {
        let d = dir();
        let ids: Vec<_> = d.eligible().unwrap().into_iter().map(|e| e.equipment_id).collect();
        assert_eq!(ids, vec!["pump-2", "pump-1", "boiler-9"]);
        assert_eq!(d.group_members("hw").unwrap(), vec!["pump-1", "pump-2"]);
    }
}
