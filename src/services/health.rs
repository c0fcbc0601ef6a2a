use serde::Serialize;

/// Service health status
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum ServiceHealth {
    /// Service is operating normally
    Healthy,

    /// Running, but a dependency is unavailable (e.g. broker not connected)
    Degraded(String),

    /// Service has failed
    Unhealthy(String),
}

impl ServiceHealth {
    pub fn is_healthy(&self) -> bool {
        matches!(self, ServiceHealth::Healthy)
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, ServiceHealth::Degraded(_))
    }

    pub fn is_unhealthy(&self) -> bool {
        matches!(self, ServiceHealth::Unhealthy(_))
    }
}

impl std::fmt::Display for ServiceHealth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServiceHealth::Healthy => write!(f, "healthy"),
            ServiceHealth::Degraded(reason) => write!(f, "degraded ({})", reason),
            ServiceHealth::Unhealthy(reason) => write!(f, "unhealthy ({})", reason),
        }
    }
}
