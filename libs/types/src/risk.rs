//! Risk alert types

use crate::ids::{AccountId, AlertId};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Alert classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertType {
    /// Loss utilization crossed the warning threshold
    MarginWarning,
    /// Loss utilization crossed the auto-close threshold and positions were closed
    AutoClose,
}

/// Alert severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    LOW,
    MEDIUM,
    HIGH,
    CRITICAL,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Severity::LOW => "LOW",
            Severity::MEDIUM => "MEDIUM",
            Severity::HIGH => "HIGH",
            Severity::CRITICAL => "CRITICAL",
        };
        f.write_str(s)
    }
}

/// Risk alert row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskAlert {
    pub alert_id: AlertId,
    pub account_id: AccountId,
    pub alert_type: AlertType,
    pub severity: Severity,
    pub message: String,
    pub resolved: bool,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl RiskAlert {
    pub fn new(
        account_id: AccountId,
        alert_type: AlertType,
        severity: Severity,
        message: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            alert_id: AlertId::new(),
            account_id,
            alert_type,
            severity,
            message: message.into(),
            resolved: false,
            created_at: timestamp,
            resolved_at: None,
        }
    }

    pub fn resolve(&mut self, timestamp: DateTime<Utc>) {
        if !self.resolved {
            self.resolved = true;
            self.resolved_at = Some(timestamp);
        }
    }

    /// An unresolved alert younger than `cooldown` suppresses a repeat
    pub fn suppresses_repeat(&self, now: DateTime<Utc>, cooldown: Duration) -> bool {
        !self.resolved && now - self.created_at < cooldown
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alert_creation() {
        let alert = RiskAlert::new(
            AccountId::new(),
            AlertType::MarginWarning,
            Severity::HIGH,
            "loss utilization 82%",
            Utc::now(),
        );
        assert!(!alert.resolved);
        assert_eq!(alert.severity, Severity::HIGH);
    }

    #[test]
    fn test_resolve_is_idempotent() {
        let mut alert = RiskAlert::new(
            AccountId::new(),
            AlertType::AutoClose,
            Severity::CRITICAL,
            "closed 2 positions",
            Utc::now(),
        );
        let t1 = Utc::now();
        alert.resolve(t1);
        alert.resolve(t1 + Duration::seconds(5));
        assert_eq!(alert.resolved_at, Some(t1));
    }

    #[test]
    fn test_cooldown_suppression() {
        let created = Utc::now();
        let mut alert = RiskAlert::new(
            AccountId::new(),
            AlertType::MarginWarning,
            Severity::HIGH,
            "warn",
            created,
        );
        let cooldown = Duration::minutes(15);
        assert!(alert.suppresses_repeat(created + Duration::minutes(5), cooldown));
        assert!(!alert.suppresses_repeat(created + Duration::minutes(16), cooldown));

        alert.resolve(created + Duration::minutes(1));
        assert!(!alert.suppresses_repeat(created + Duration::minutes(2), cooldown));
    }

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::CRITICAL > Severity::HIGH);
        assert!(Severity::HIGH > Severity::MEDIUM);
    }
}
