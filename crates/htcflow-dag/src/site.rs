use crate::error::Result;
use htcflow_core::config::Config;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};

/// Pool information needed to translate a workflow.
pub trait PoolInfo {
    /// Largest `TotalSlotMemory` (MB) over the static and partitionable
    /// slots of machines whose name matches `machine_pattern`, or `None`
    /// when no machine matches.
    fn max_slot_memory(&self, machine_pattern: &str) -> Result<Option<i64>>;
}

/// Constraint selecting candidate execute slots. Dynamic slots are skipped
/// as they never exceed their partitionable parent.
pub fn machine_constraint(machine_pattern: &str) -> String {
    format!(
        "SlotType != \"Dynamic\" && regexp(\"{}\", Machine)",
        machine_pattern
    )
}

/// Values shared by every job that runs on one compute site.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SiteValues {
    pub use_shared: bool,
    pub memory_limit: Option<i64>,
    pub accounting_group: Option<String>,
    pub accounting_user: Option<String>,
    /// Site profile entries prefixed with `+`, without the prefix.
    pub attrs: BTreeMap<String, Value>,
    pub profile: BTreeMap<String, Value>,
}

/// Site values resolved at most once per site during one translation pass.
pub struct SiteCache<'a> {
    config: &'a Config,
    pool: &'a dyn PoolInfo,
    values: HashMap<Option<String>, SiteValues>,
}

impl<'a> SiteCache<'a> {
    pub fn new(config: &'a Config, pool: &'a dyn PoolInfo) -> Self {
        Self {
            config,
            pool,
            values: HashMap::new(),
        }
    }

    pub fn get(&mut self, site: Option<&str>) -> Result<&SiteValues> {
        let key = site.map(str::to_string);
        if !self.values.contains_key(&key) {
            let values = self.gather(site)?;
            self.values.insert(key.clone(), values);
        }
        Ok(&self.values[&key])
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    fn gather(&self, site: Option<&str>) -> Result<SiteValues> {
        let memory_limit = match self.config.memory_limit(site) {
            Some(limit) => Some(limit),
            None => {
                let pattern = self.config.execute_machines_pattern(site);
                let limit = self.pool.max_slot_memory(pattern)?;
                if limit.is_none() {
                    tracing::debug!("No execute machine in the pool matches {}", pattern);
                }
                limit
            }
        };

        let mut values = SiteValues {
            use_shared: self.config.use_shared,
            memory_limit,
            accounting_group: self.config.accounting_group(site).map(str::to_string),
            accounting_user: self.config.accounting_user(site).map(str::to_string),
            ..Default::default()
        };

        if let Some(site_config) = self.config.site(site) {
            for (key, value) in &site_config.profile {
                match key.strip_prefix('+') {
                    Some(attr) => {
                        values.attrs.insert(attr.to_string(), value.clone());
                    }
                    None => {
                        values.profile.insert(key.clone(), value.clone());
                    }
                }
            }
        }

        tracing::debug!("Site values for {:?}: {:?}", site, values);
        Ok(values)
    }
}
