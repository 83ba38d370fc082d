//! Counters and failed-id sets accumulated across pipeline phases, plus the
//! per-direction report of a Partner Directory sync. Reporting never feeds
//! back into outcomes.

use std::collections::BTreeSet;
use std::fmt;

/// Final result of an orchestrator run.
#[derive(Debug, Default, Clone)]
pub struct RunReport {
    pub packages_updated: usize,
    pub packages_deployed: usize,
    pub packages_failed: usize,
    pub packages_filtered: usize,

    pub artifacts_total: usize,
    pub artifacts_updated: usize,
    pub artifacts_deploy_ok: usize,
    pub artifacts_deploy_failed: usize,
    pub artifacts_filtered: usize,

    pub failed_packages: BTreeSet<String>,
    pub failed_artifact_updates: BTreeSet<String>,
    pub failed_artifact_deploys: BTreeSet<String>,
    pub successful_artifact_deploys: BTreeSet<String>,
}

impl RunReport {
    pub fn update_failure_count(&self) -> usize {
        self.failed_artifact_updates.len()
    }

    pub fn deploy_failure_count(&self) -> usize {
        self.failed_artifact_deploys.len()
    }

    /// True when any failure counter is non-zero.
    pub fn completed_with_failures(&self) -> bool {
        self.packages_failed > 0
            || !self.failed_packages.is_empty()
            || !self.failed_artifact_updates.is_empty()
            || !self.failed_artifact_deploys.is_empty()
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "==== Deployment summary ====")?;
        writeln!(
            f,
            "Packages   updated={} deployed={} failed={} filtered={}",
            self.packages_updated, self.packages_deployed, self.packages_failed, self.packages_filtered
        )?;
        writeln!(
            f,
            "Artifacts  total={} updated={} deployOk={} deployFailed={} filtered={}",
            self.artifacts_total,
            self.artifacts_updated,
            self.artifacts_deploy_ok,
            self.artifacts_deploy_failed,
            self.artifacts_filtered
        )?;
        write_set(f, "Failed packages", &self.failed_packages)?;
        write_set(f, "Failed artifact updates", &self.failed_artifact_updates)?;
        write_set(f, "Failed artifact deploys", &self.failed_artifact_deploys)?;
        Ok(())
    }
}

fn write_set(f: &mut fmt::Formatter<'_>, label: &str, set: &BTreeSet<String>) -> fmt::Result {
    if set.is_empty() {
        return Ok(());
    }
    let ids: Vec<&str> = set.iter().map(String::as_str).collect();
    writeln!(f, "{label}: {}", ids.join(", "))
}

/// Outcome of one Partner Directory parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamOutcome {
    Created,
    Updated,
    Unchanged,
    Deleted,
    Skipped,
    Error,
}

/// Per-direction summary of a Partner Directory sync run. Ids are recorded
/// as `<pid>/<id>`.
#[derive(Debug, Default, Clone)]
pub struct SyncReport {
    pub created: Vec<String>,
    pub updated: Vec<String>,
    pub unchanged: Vec<String>,
    pub deleted: Vec<String>,
    pub skipped: Vec<String>,
    pub errors: Vec<String>,
}

impl SyncReport {
    pub fn record(&mut self, outcome: ParamOutcome, pid: &str, id: &str) {
        let entry = format!("{pid}/{id}");
        match outcome {
            ParamOutcome::Created => self.created.push(entry),
            ParamOutcome::Updated => self.updated.push(entry),
            ParamOutcome::Unchanged => self.unchanged.push(entry),
            ParamOutcome::Deleted => self.deleted.push(entry),
            ParamOutcome::Skipped => self.skipped.push(entry),
            ParamOutcome::Error => self.errors.push(entry),
        }
    }

    pub fn record_error(&mut self, pid: &str, id: &str, message: &str) {
        self.errors.push(format!("{pid}/{id}: {message}"));
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }
}

impl fmt::Display for SyncReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "==== Partner Directory summary ====")?;
        writeln!(
            f,
            "created={} updated={} unchanged={} deleted={} skipped={} errors={}",
            self.created.len(),
            self.updated.len(),
            self.unchanged.len(),
            self.deleted.len(),
            self.skipped.len(),
            self.errors.len()
        )?;
        write_list(f, "Created", &self.created)?;
        write_list(f, "Updated", &self.updated)?;
        write_list(f, "Deleted", &self.deleted)?;
        write_list(f, "Errors", &self.errors)?;
        Ok(())
    }
}

fn write_list(f: &mut fmt::Formatter<'_>, label: &str, items: &[String]) -> fmt::Result {
    if items.is_empty() {
        return Ok(());
    }
    writeln!(f, "{label}: {}", items.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_report_has_no_failures() {
        let report = RunReport::default();
        assert!(!report.completed_with_failures());
    }

    #[test]
    fn failure_sets_flip_the_outcome() {
        let mut report = RunReport::default();
        report.failed_artifact_deploys.insert("A1".into());
        assert!(report.completed_with_failures());
        assert_eq!(report.deploy_failure_count(), 1);
        let rendered = format!("{report}");
        assert!(rendered.contains("Failed artifact deploys: A1"));
    }

    #[test]
    fn sync_report_records_by_outcome() {
        let mut report = SyncReport::default();
        report.record(ParamOutcome::Created, "P1", "s1");
        report.record(ParamOutcome::Deleted, "P1", "s2");
        report.record_error("P2", "x1", "HTTP 500");
        assert_eq!(report.created, vec!["P1/s1"]);
        assert_eq!(report.deleted, vec!["P1/s2"]);
        assert!(report.has_errors());
    }
}
