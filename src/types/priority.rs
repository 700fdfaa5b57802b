use serde::{Deserialize, Serialize};

/// Job priority levels for dispatch ordering (higher value = dispatched first).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobPriority {
    /// Processed last.
    Low = 1,

    /// Default priority.
    Normal = 2,

    /// Processed ahead of normal traffic.
    High = 3,

    /// Jumps every other waiting job.
    Critical = 4,
}

// Waiting-list order: (Reverse(priority), created_at, seq) — critical first,
// FIFO within a priority level.

impl Default for JobPriority {
    fn default() -> Self {
        Self::Normal
    }
}

impl JobPriority {
    /// Human-readable name.
    pub fn name(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Normal => "normal",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl std::fmt::Display for JobPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for JobPriority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "normal" => Ok(Self::Normal),
            "high" => Ok(Self::High),
            "critical" => Ok(Self::Critical),
            _ => Err(format!("Invalid priority: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cmp::Reverse;

    #[test]
    fn ordering_puts_critical_first() {
        let mut priorities = vec![
            JobPriority::Normal,
            JobPriority::Critical,
            JobPriority::Low,
            JobPriority::High,
        ];
        priorities.sort_by_key(|p| Reverse(*p));
        assert_eq!(
            priorities,
            vec![
                JobPriority::Critical,
                JobPriority::High,
                JobPriority::Normal,
                JobPriority::Low,
            ]
        );
    }

    #[test]
    fn parses_from_str() {
        assert_eq!("critical".parse::<JobPriority>().unwrap(), JobPriority::Critical);
        assert_eq!("Normal".parse::<JobPriority>().unwrap(), JobPriority::Normal);
        assert!("urgent".parse::<JobPriority>().is_err());
    }
}
