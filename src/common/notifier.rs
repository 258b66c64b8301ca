//! Operator notifications

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::traits::Notifier;

/// Severity of an operator notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NotificationLevel {
    Minor,
    Medium,
    Major,
}

impl std::fmt::Display for NotificationLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NotificationLevel::Minor => write!(f, "minor"),
            NotificationLevel::Medium => write!(f, "medium"),
            NotificationLevel::Major => write!(f, "major"),
        }
    }
}

/// Notifier that writes notifications to the log
#[derive(Debug, Clone)]
pub struct TracingNotifier {
    levels: Vec<NotificationLevel>,
}

impl TracingNotifier {
    /// Only notifications whose level is in `levels` are emitted
    pub fn new(levels: Vec<NotificationLevel>) -> Self {
        Self { levels }
    }

    pub fn accepts(&self, level: NotificationLevel) -> bool {
        self.levels.contains(&level)
    }
}

impl Default for TracingNotifier {
    fn default() -> Self {
        Self::new(vec![NotificationLevel::Medium, NotificationLevel::Major])
    }
}

impl Notifier for TracingNotifier {
    fn notify(&self, level: NotificationLevel, message: &str) {
        if !self.accepts(level) {
            return;
        }
        match level {
            NotificationLevel::Major => warn!(target: "notification", %level, "{}", message),
            _ => info!(target: "notification", %level, "{}", message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_levels_filter_minor() {
        let notifier = TracingNotifier::default();
        assert!(!notifier.accepts(NotificationLevel::Minor));
        assert!(notifier.accepts(NotificationLevel::Medium));
        assert!(notifier.accepts(NotificationLevel::Major));
    }

    #[test]
    fn test_level_parsing() {
        let levels: Vec<NotificationLevel> = serde_json::from_str(r#"["Minor","Major"]"#).unwrap();
        assert_eq!(levels, vec![NotificationLevel::Minor, NotificationLevel::Major]);
    }
}
