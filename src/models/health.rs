use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LivenessResponse {
    pub status: HealthStatus,
    pub timestamp: DateTime<Utc>,
    pub uptime_seconds: u64,
}

impl LivenessResponse {
    pub fn healthy(uptime_seconds: u64) -> Self {
        Self {
            status: HealthStatus::Healthy,
            timestamp: Utc::now(),
            uptime_seconds,
        }
    }
}
