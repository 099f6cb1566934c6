//! Registry file loading

use routewarm::{RouteFlow, RouteRegistry, SchedulerConfig};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// On-disk description of the preload tables.
///
/// Every section is optional; missing tables fall back to the built-in ERP
/// defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryFile {
    /// Route policies
    pub routes: Option<RouteRegistry>,
    /// Likely next routes
    pub flow: Option<RouteFlow>,
    /// Scheduler tuning
    pub scheduler: SchedulerConfig,
}

impl RegistryFile {
    /// Load from a JSON file, or use the defaults when no path is given
    pub fn load(path: Option<&Path>) -> Result<Self, Box<dyn std::error::Error>> {
        match path {
            Some(path) => {
                let contents = std::fs::read_to_string(path)
                    .map_err(|e| format!("Failed to read {}: {}", path.display(), e))?;
                Ok(serde_json::from_str(&contents)?)
            }
            None => Ok(Self::default()),
        }
    }

    /// Route registry, defaulting to the ERP table
    pub fn registry(&self) -> RouteRegistry {
        self.routes.clone().unwrap_or_else(RouteRegistry::erp_defaults)
    }

    /// Route flow, defaulting to the ERP table
    pub fn flow(&self) -> RouteFlow {
        self.flow.clone().unwrap_or_else(RouteFlow::erp_defaults)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use routewarm::{Priority, TriggerKind};
    use std::time::Duration;

    #[test]
    fn test_empty_file_uses_defaults() {
        let file: RegistryFile = serde_json::from_str("{}").unwrap();
        assert_eq!(file.registry().len(), 7);
        assert_eq!(file.flow().likely_next("/pos").len(), 2);
        assert_eq!(file.scheduler.idle_budget, 1);
    }

    #[test]
    fn test_partial_file() {
        let json = r#"{
            "routes": {
                "/reports": { "priority": "high", "trigger": "network-idle", "estimated_size_kb": 12 }
            },
            "scheduler": { "network_idle_debounce": 250 }
        }"#;
        let file: RegistryFile = serde_json::from_str(json).unwrap();

        let registry = file.registry();
        let reports = registry.lookup("/reports").unwrap();
        assert_eq!(reports.priority, Priority::High);
        assert_eq!(reports.trigger, TriggerKind::NetworkIdle);
        assert_eq!(file.flow().likely_next("/dashboard").len(), 3);
        assert_eq!(file.scheduler.network_idle_debounce, Duration::from_millis(250));
    }
}
