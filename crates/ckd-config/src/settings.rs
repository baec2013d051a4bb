use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use ckd_ledger::{ResourceMap, UnknownResourcePolicy};
use ckd_orders::{DuplicateOrderPolicy, DEFAULT_PRIORITY};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationSettings {
    /// Period of the daemon's simulation ticker.
    pub tick_ms: u64,
    /// Share of each resource's total a generated order requests (floored).
    pub request_fraction: f64,
}

impl Default for SimulationSettings {
    fn default() -> Self {
        Self {
            tick_ms: 3000,
            request_fraction: 0.5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorSettings {
    /// Period of the daemon's deadlock monitor.
    pub interval_ms: u64,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self { interval_ms: 1000 }
    }
}

/// Typed view of the effective config. Missing keys take defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KitchenSettings {
    /// Initial pool, seeded into an empty store.
    pub resources: ResourceMap,
    pub default_priority: i64,
    pub duplicate_orders: DuplicateOrderPolicy,
    pub unknown_resources: UnknownResourcePolicy,
    pub simulation: SimulationSettings,
    pub monitor: MonitorSettings,
}

impl Default for KitchenSettings {
    fn default() -> Self {
        Self {
            resources: ckd_ledger::resource_map([
                ("Oven", 1),
                ("Chef", 2),
                ("Delivery_Bike", 1),
                ("Ingredients", 5),
            ]),
            default_priority: DEFAULT_PRIORITY,
            duplicate_orders: DuplicateOrderPolicy::default(),
            unknown_resources: UnknownResourcePolicy::default(),
            simulation: SimulationSettings::default(),
            monitor: MonitorSettings::default(),
        }
    }
}

impl KitchenSettings {
    pub fn from_config_json(v: &Value) -> Result<Self> {
        let settings: Self =
            serde_json::from_value(v.clone()).context("kitchen settings: invalid shape")?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        for (name, &qty) in &self.resources {
            if name.trim().is_empty() {
                bail!("CONFIG_INVALID: resource name must not be empty");
            }
            if qty < 0 {
                bail!("CONFIG_INVALID: /resources/{name} must be >= 0, got {qty}");
            }
        }
        let f = self.simulation.request_fraction;
        if !(0.0..=1.0).contains(&f) {
            bail!("CONFIG_INVALID: /simulation/request_fraction must be in [0, 1], got {f}");
        }
        if self.simulation.tick_ms == 0 {
            bail!("CONFIG_INVALID: /simulation/tick_ms must be > 0");
        }
        if self.monitor.interval_ms == 0 {
            bail!("CONFIG_INVALID: /monitor/interval_ms must be > 0");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_object_yields_defaults() {
        let s = KitchenSettings::from_config_json(&serde_json::json!({})).unwrap();
        assert_eq!(s, KitchenSettings::default());
        assert_eq!(s.resources.get("Ingredients"), Some(&5));
        assert_eq!(s.default_priority, 5);
    }

    #[test]
    fn policies_parse_from_snake_case() {
        let s = KitchenSettings::from_config_json(&serde_json::json!({
            "duplicate_orders": "overwrite",
            "unknown_resources": "reject",
        }))
        .unwrap();
        assert_eq!(s.duplicate_orders, DuplicateOrderPolicy::Overwrite);
        assert_eq!(s.unknown_resources, UnknownResourcePolicy::Reject);
    }

    #[test]
    fn negative_capacity_is_rejected() {
        let err = KitchenSettings::from_config_json(&serde_json::json!({
            "resources": { "Oven": -1 }
        }))
        .unwrap_err();
        assert!(format!("{err:#}").contains("/resources/Oven"));
    }

    #[test]
    fn fraction_out_of_range_is_rejected() {
        let err = KitchenSettings::from_config_json(&serde_json::json!({
            "simulation": { "request_fraction": 1.5 }
        }))
        .unwrap_err();
        assert!(format!("{err:#}").contains("request_fraction"));
    }
}
