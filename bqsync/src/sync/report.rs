use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// Lifecycle of one entity within one run.
///
/// `Pending -> Extracting -> (Empty | Writing) -> (Succeeded | Failed)`. A run never moves an
/// entity out of a terminal phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityPhase {
    Pending,
    Extracting,
    Empty,
    Writing,
    Succeeded,
    Failed,
}

impl EntityPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, EntityPhase::Succeeded | EntityPhase::Failed)
    }

    /// Whether `next` directly follows `self`.
    pub fn can_transition_to(&self, next: EntityPhase) -> bool {
        use EntityPhase::*;

        match (self, next) {
            (Pending, Extracting) => true,
            (Extracting, Empty | Writing) => true,
            (Empty | Writing, Succeeded) => true,
            (phase, Failed) => !phase.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for EntityPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EntityPhase::Pending => "pending",
            EntityPhase::Extracting => "extracting",
            EntityPhase::Empty => "empty",
            EntityPhase::Writing => "writing",
            EntityPhase::Succeeded => "succeeded",
            EntityPhase::Failed => "failed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityStatus {
    Success,
    Failed,
    /// Not part of a selective run.
    Skipped,
}

/// Outcome of one entity in a [`SyncRunReport`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntityReport {
    pub rows_synced: u64,
    pub status: EntityStatus,
    pub error_detail: Option<String>,
}

impl EntityReport {
    pub fn success(rows_synced: u64) -> Self {
        Self {
            rows_synced,
            status: EntityStatus::Success,
            error_detail: None,
        }
    }

    pub fn failed(error_detail: impl Into<String>) -> Self {
        Self {
            rows_synced: 0,
            status: EntityStatus::Failed,
            error_detail: Some(error_detail.into()),
        }
    }

    pub fn skipped() -> Self {
        Self {
            rows_synced: 0,
            status: EntityStatus::Skipped,
            error_detail: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    Full,
    Selective,
}

impl fmt::Display for SyncMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncMode::Full => f.write_str("full"),
            SyncMode::Selective => f.write_str("selective"),
        }
    }
}

/// Result of one orchestration pass, kept in memory as the last run snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncRunReport {
    pub run_id: Uuid,
    pub mode: SyncMode,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub entities: BTreeMap<String, EntityReport>,
}

impl SyncRunReport {
    pub fn new(run_id: Uuid, mode: SyncMode, started_at: DateTime<Utc>) -> Self {
        Self {
            run_id,
            mode,
            started_at,
            finished_at: started_at,
            entities: BTreeMap::new(),
        }
    }

    pub fn entity(&self, name: &str) -> Option<&EntityReport> {
        self.entities.get(name)
    }

    pub fn total_rows(&self) -> u64 {
        self.entities.values().map(|report| report.rows_synced).sum()
    }

    pub fn count(&self, status: EntityStatus) -> usize {
        self.entities
            .values()
            .filter(|report| report.status == status)
            .count()
    }

    pub fn has_failures(&self) -> bool {
        self.count(EntityStatus::Failed) > 0
    }

    pub fn failed_entities(&self) -> impl Iterator<Item = (&str, &EntityReport)> {
        self.entities
            .iter()
            .filter(|(_, report)| report.status == EntityStatus::Failed)
            .map(|(name, report)| (name.as_str(), report))
    }

    /// Alert text listing every failed entity with its error, `None` for a clean run.
    pub fn failure_summary(&self) -> Option<String> {
        if !self.has_failures() {
            return None;
        }

        let mut summary = format!(
            "Sync run {} ({}) started at {} failed for {} of {} entities:",
            self.run_id,
            self.mode,
            self.started_at.to_rfc3339(),
            self.count(EntityStatus::Failed),
            self.entities.len()
        );
        for (name, report) in self.failed_entities() {
            let detail = report.error_detail.as_deref().unwrap_or("unknown error");
            summary.push_str(&format!("\n- {name}: {detail}"));
        }

        Some(summary)
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn phases_follow_the_state_machine() {
        use EntityPhase::*;

        assert!(Pending.can_transition_to(Extracting));
        assert!(Extracting.can_transition_to(Empty));
        assert!(Writing.can_transition_to(Succeeded));
        assert!(Extracting.can_transition_to(Failed));
        assert!(!Pending.can_transition_to(Writing));
        assert!(!Succeeded.can_transition_to(Failed));
        assert!(!Failed.can_transition_to(Pending));
    }

    #[test]
    fn clean_run_has_no_failure_summary() {
        let mut report = SyncRunReport::new(Uuid::nil(), SyncMode::Full, Utc::now());
        report.entities.insert("users".into(), EntityReport::success(3));
        report.entities.insert("tasks".into(), EntityReport::success(0));

        assert_eq!(report.total_rows(), 3);
        assert!(report.failure_summary().is_none());
    }

    #[test]
    fn failure_summary_lists_failed_entities() {
        let started_at = Utc.with_ymd_and_hms(2024, 5, 1, 18, 25, 0).unwrap();
        let mut report = SyncRunReport::new(Uuid::nil(), SyncMode::Full, started_at);
        report.entities.insert("users".into(), EntityReport::success(3));
        report.entities.insert(
            "tasks".into(),
            EntityReport::failed("Failed to write rows to the warehouse: boom"),
        );

        insta::assert_snapshot!(report.failure_summary().unwrap(), @r"
        Sync run 00000000-0000-0000-0000-000000000000 (full) started at 2024-05-01T18:25:00+00:00 failed for 1 of 2 entities:
        - tasks: Failed to write rows to the warehouse: boom
        ");
    }

    #[test]
    fn report_serializes_statuses_in_snake_case() {
        let report = EntityReport::skipped();

        assert_eq!(
            serde_json::to_value(&report).unwrap(),
            serde_json::json!({"rows_synced": 0, "status": "skipped", "error_detail": null})
        );
    }
}
