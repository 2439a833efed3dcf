//! Result of one apply run.

use deployit_core::RunId;
use deployit_core::state::AppliedState;
use serde::Serialize;
use std::fmt;

/// What happened to one resource during a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ResourceOutcome {
    /// The provisioner ran and succeeded.
    Applied,
    /// Inputs matched the last applied hash and no dependency changed.
    SkippedUnchanged,
    Failed { error: String },
    /// A dependency failed or was itself blocked.
    Blocked { by: String },
    /// The run was cancelled or aborted before this resource started.
    Cancelled,
}

impl ResourceOutcome {
    /// Applied or skipped; dependents may proceed.
    pub fn is_complete(&self) -> bool {
        matches!(self, Self::Applied | Self::SkippedUnchanged)
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Applied => "applied",
            Self::SkippedUnchanged => "unchanged",
            Self::Failed { .. } => "failed",
            Self::Blocked { .. } => "blocked",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for ResourceOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Failed { error } => write!(f, "failed: {}", error),
            Self::Blocked { by } => write!(f, "blocked by {}", by),
            other => f.write_str(other.label()),
        }
    }
}

/// Per-resource outcomes (in plan order) and the state to persist.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub run_id: RunId,
    pub stack: String,
    pub outcomes: Vec<(String, ResourceOutcome)>,
    #[serde(skip)]
    pub state: AppliedState,
    /// Reason new work stopped early, e.g. a build failure.
    pub aborted: Option<String>,
    pub cancelled: bool,
    /// Set when the final state save failed.
    pub store_error: Option<String>,
}

impl RunReport {
    pub fn outcome(&self, name: &str) -> Option<&ResourceOutcome> {
        self.outcomes
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, outcome)| outcome)
    }

    fn names_where(&self, pred: impl Fn(&ResourceOutcome) -> bool) -> Vec<&str> {
        self.outcomes
            .iter()
            .filter(|(_, o)| pred(o))
            .map(|(n, _)| n.as_str())
            .collect()
    }

    pub fn applied(&self) -> Vec<&str> {
        self.names_where(|o| matches!(o, ResourceOutcome::Applied))
    }

    pub fn skipped(&self) -> Vec<&str> {
        self.names_where(|o| matches!(o, ResourceOutcome::SkippedUnchanged))
    }

    pub fn failed(&self) -> Vec<&str> {
        self.names_where(|o| matches!(o, ResourceOutcome::Failed { .. }))
    }

    pub fn blocked(&self) -> Vec<&str> {
        self.names_where(|o| matches!(o, ResourceOutcome::Blocked { .. }))
    }

    pub fn cancelled_before_start(&self) -> Vec<&str> {
        self.names_where(|o| matches!(o, ResourceOutcome::Cancelled))
    }

    /// Every resource completed and the state was saved.
    pub fn is_success(&self) -> bool {
        self.aborted.is_none()
            && !self.cancelled
            && self.store_error.is_none()
            && self.outcomes.iter().all(|(_, o)| o.is_complete())
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Run {} (stack {})", self.run_id, self.stack)?;
        let width = self
            .outcomes
            .iter()
            .map(|(n, _)| n.len())
            .max()
            .unwrap_or(0);
        for (name, outcome) in &self.outcomes {
            writeln!(f, "  {:<width$}  {}", name, outcome, width = width)?;
        }
        write!(
            f,
            "{} applied, {} unchanged, {} failed, {} blocked, {} cancelled",
            self.applied().len(),
            self.skipped().len(),
            self.failed().len(),
            self.blocked().len(),
            self.cancelled_before_start().len()
        )?;
        if let Some(reason) = &self.aborted {
            write!(f, "\naborted: {}", reason)?;
        }
        if self.cancelled {
            write!(f, "\ncancelled")?;
        }
        if let Some(err) = &self.store_error {
            write!(f, "\nstate was not saved: {}", err)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(outcomes: Vec<(&str, ResourceOutcome)>) -> RunReport {
        RunReport {
            run_id: RunId::new(),
            stack: "prod".to_string(),
            outcomes: outcomes
                .into_iter()
                .map(|(n, o)| (n.to_string(), o))
                .collect(),
            state: AppliedState::new(),
            aborted: None,
            cancelled: false,
            store_error: None,
        }
    }

    #[test]
    fn test_summary_counts() {
        let r = report(vec![
            ("catfacts", ResourceOutcome::SkippedUnchanged),
            ("api", ResourceOutcome::Failed { error: "boom".into() }),
            ("blast", ResourceOutcome::Blocked { by: "api".into() }),
        ]);

        assert_eq!(r.skipped(), vec!["catfacts"]);
        assert_eq!(r.failed(), vec!["api"]);
        assert_eq!(r.blocked(), vec!["blast"]);
        assert!(!r.is_success());

        let text = r.to_string();
        assert!(text.contains("blocked by api"));
        assert!(text.contains("0 applied, 1 unchanged, 1 failed, 1 blocked, 0 cancelled"));
    }

    #[test]
    fn test_success_requires_saved_state() {
        let mut r = report(vec![("catfacts", ResourceOutcome::Applied)]);
        assert!(r.is_success());
        r.store_error = Some("disk full".to_string());
        assert!(!r.is_success());
    }

    #[test]
    fn test_outcome_serializes_with_status_tag() {
        let json = serde_json::to_value(ResourceOutcome::Blocked { by: "api".into() }).unwrap();
        assert_eq!(json, serde_json::json!({"status": "blocked", "by": "api"}));
    }
}
