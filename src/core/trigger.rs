//! Trigger events and run conditions

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Kind of event that started a pipeline run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    /// A push to a branch
    Push,
    /// An operator started the run by hand
    Manual,
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventKind::Push => write!(f, "push"),
            EventKind::Manual => write!(f, "manual"),
        }
    }
}

/// The event a pipeline run was started with
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerEvent {
    pub kind: EventKind,

    /// Branch name for push events
    pub branch: Option<String>,
}

impl TriggerEvent {
    pub fn push(branch: impl Into<String>) -> Self {
        Self {
            kind: EventKind::Push,
            branch: Some(branch.into()),
        }
    }

    pub fn manual() -> Self {
        Self {
            kind: EventKind::Manual,
            branch: None,
        }
    }
}

/// Pattern for matching branch names (not serializable due to Regex)
#[derive(Debug, Clone)]
pub enum BranchFilter {
    /// Exact branch name match
    Exact(String),
    /// Regular expression match
    Regex(Regex),
}

impl BranchFilter {
    pub fn matches(&self, branch: &str) -> bool {
        match self {
            BranchFilter::Exact(name) => name == branch,
            BranchFilter::Regex(regex) => regex.is_match(branch),
        }
    }
}

/// The pipeline-level trigger predicate built from the `on:` section
#[derive(Debug, Clone, Default)]
pub struct TriggerPredicate {
    /// Branch filters for push events. `None` means push does not trigger
    /// the pipeline; an empty list means any branch does.
    pub push_branches: Option<Vec<BranchFilter>>,

    /// Whether manual runs are accepted
    pub manual: bool,
}

impl TriggerPredicate {
    pub fn matches(&self, event: &TriggerEvent) -> bool {
        match event.kind {
            EventKind::Manual => self.manual,
            EventKind::Push => match (&self.push_branches, &event.branch) {
                (Some(filters), Some(branch)) => {
                    filters.is_empty() || filters.iter().any(|f| f.matches(branch))
                }
                _ => false,
            },
        }
    }
}

/// Stage-level `only` condition, evaluated against the trigger context
#[derive(Debug, Clone, Default)]
pub struct RunCondition {
    /// Event kinds the stage runs on. `None` means any.
    pub events: Option<Vec<EventKind>>,

    /// Branch filters the stage runs on. `None` means any; only meaningful
    /// for push events (manual runs have no branch and match).
    pub branches: Option<Vec<BranchFilter>>,
}

impl RunCondition {
    pub fn matches(&self, event: &TriggerEvent) -> bool {
        if let Some(kinds) = &self.events {
            if !kinds.contains(&event.kind) {
                return false;
            }
        }

        if let Some(filters) = &self.branches {
            match &event.branch {
                Some(branch) => {
                    if !filters.is_empty() && !filters.iter().any(|f| f.matches(branch)) {
                        return false;
                    }
                }
                // Manual runs carry no branch; a branch filter alone does
                // not exclude them.
                None => {}
            }
        }

        true
    }
}
