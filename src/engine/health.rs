//! Health reporting
//!
//! The engine is healthy when it is open, its WAL accepts appends and the
//! published index root is reachable. Anything else is degraded, with one
//! reason per failing component.

use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded { reasons: Vec<String> },
}

impl HealthStatus {
    pub fn is_healthy(&self) -> bool {
        matches!(self, HealthStatus::Healthy)
    }
}

/// Health of one component
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ComponentHealth {
    pub name: &'static str,
    pub healthy: bool,
    pub detail: String,
}

impl ComponentHealth {
    pub fn ok(name: &'static str, detail: impl Into<String>) -> Self {
        Self {
            name,
            healthy: true,
            detail: detail.into(),
        }
    }

    pub fn failing(name: &'static str, detail: impl Into<String>) -> Self {
        Self {
            name,
            healthy: false,
            detail: detail.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub components: Vec<ComponentHealth>,
}

impl HealthReport {
    /// Derives the overall status from `components`
    pub fn from_components(components: Vec<ComponentHealth>) -> Self {
        let reasons: Vec<String> = components
            .iter()
            .filter(|c| !c.healthy)
            .map(|c| format!("{}: {}", c.name, c.detail))
            .collect();
        let status = if reasons.is_empty() {
            HealthStatus::Healthy
        } else {
            HealthStatus::Degraded { reasons }
        };
        Self { status, components }
    }

    pub fn is_healthy(&self) -> bool {
        self.status.is_healthy()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_ok_is_healthy() {
        let report = HealthReport::from_components(vec![
            ComponentHealth::ok("wal", "writable"),
            ComponentHealth::ok("index", "depth 1"),
        ]);
        assert!(report.is_healthy());
    }

    #[test]
    fn test_failing_component_degrades() {
        let report = HealthReport::from_components(vec![
            ComponentHealth::ok("index", "depth 1"),
            ComponentHealth::failing("wal", "writer poisoned"),
        ]);

        assert_eq!(
            report.status,
            HealthStatus::Degraded {
                reasons: vec!["wal: writer poisoned".to_string()]
            }
        );
    }

    #[test]
    fn test_status_serializes_tagged() {
        let json = serde_json::to_value(HealthStatus::Degraded {
            reasons: vec!["engine: closed".into()],
        })
        .unwrap();
        assert_eq!(json["state"], "degraded");
        assert_eq!(json["reasons"][0], "engine: closed");
    }
}
