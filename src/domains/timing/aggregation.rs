use anyhow::Result;
use serde::Serialize;
use std::collections::HashMap;

use super::entity::{
    TimingEventRow, TimingFilter, TimingRunRecord, TimingStatus, TimingStepRecord, TimingWorkflow,
};
use super::store::TimingStore;
use crate::infrastructure::database::timestamps::utc_from_epoch_millis_lossy;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimingReport {
    /// Newest first.
    pub steps: Vec<TimingStepRecord>,
    /// Most recently finished first.
    pub runs: Vec<TimingRunRecord>,
}

/// Validates a stored row. Rows naming an unknown workflow or status are
/// rejected; a malformed metadata payload degrades to an empty object.
pub fn parse_timing_step(row: &TimingEventRow) -> Option<TimingStepRecord> {
    let workflow = row.workflow.parse::<TimingWorkflow>().ok()?;
    let status = row.status.parse::<TimingStatus>().ok()?;

    let metadata = match row.metadata.as_deref() {
        Some(raw) => match serde_json::from_str::<serde_json::Value>(raw) {
            Ok(serde_json::Value::Object(map)) => map,
            _ => serde_json::Map::new(),
        },
        None => serde_json::Map::new(),
    };

    Some(TimingStepRecord {
        id: row.id.clone(),
        cell_id: row.cell_id.clone(),
        workspace_id: row.workspace_id.clone(),
        workflow,
        run_id: row.run_id.clone(),
        step: row.step.clone(),
        status,
        duration_ms: row.duration_ms.max(0) as u64,
        attempt: row.attempt.and_then(|a| u32::try_from(a).ok()),
        error: row.error.clone(),
        metadata,
        created_at: utc_from_epoch_millis_lossy(row.created_at),
    })
}

pub fn build_timing_runs(steps: &[TimingStepRecord]) -> Vec<TimingRunRecord> {
    let mut order: Vec<&str> = Vec::new();
    let mut groups: HashMap<&str, Vec<&TimingStepRecord>> = HashMap::new();
    for step in steps {
        groups
            .entry(step.run_id.as_str())
            .or_insert_with(|| {
                order.push(step.run_id.as_str());
                Vec::new()
            })
            .push(step);
    }

    let mut runs: Vec<TimingRunRecord> = order
        .into_iter()
        .filter_map(|run_id| {
            let mut group = groups.remove(run_id)?;
            group.sort_by_key(|s| s.created_at);
            let first = group.first()?;
            let last = group.last()?;

            let total_duration_ms = group
                .iter()
                .find(|s| s.is_total())
                .map(|s| s.duration_ms)
                .unwrap_or_else(|| group.iter().map(|s| s.duration_ms).sum());
            let status = if group.iter().any(|s| s.status == TimingStatus::Error) {
                TimingStatus::Error
            } else {
                TimingStatus::Ok
            };

            Some(TimingRunRecord {
                run_id: run_id.to_string(),
                cell_id: first.cell_id.clone(),
                workspace_id: group.iter().find_map(|s| s.workspace_id.clone()),
                workflow: first.workflow,
                status,
                started_at: first.created_at,
                finished_at: last.created_at,
                total_duration_ms,
                step_count: group.len(),
                attempt: group.iter().find_map(|s| s.attempt),
            })
        })
        .collect();

    runs.sort_by(|a, b| b.finished_at.cmp(&a.finished_at));
    runs
}

/// Reads timing rows matching `filter` and folds them into runs.
pub async fn query_timings(store: &dyn TimingStore, filter: &TimingFilter) -> Result<TimingReport> {
    let rows = store.list_timing_events(filter).await?;
    let mut steps: Vec<TimingStepRecord> = rows
        .iter()
        .filter_map(|row| {
            let parsed = parse_timing_step(row);
            if parsed.is_none() {
                log::debug!("Skipping malformed timing row {}", row.id);
            }
            parsed
        })
        .filter(|step| filter.workflow.is_none_or(|w| step.workflow == w))
        .collect();
    steps.sort_by(|a, b| b.created_at.cmp(&a.created_at));

    let runs = build_timing_runs(&steps);
    Ok(TimingReport { steps, runs })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(run_id: &str, workflow: &str, step: &str, status: &str, duration_ms: i64, at: i64) -> TimingEventRow {
        TimingEventRow {
            id: format!("{run_id}-{step}"),
            cell_id: "cell-1".into(),
            workspace_id: Some("ws-1".into()),
            workflow: workflow.into(),
            run_id: run_id.into(),
            step: step.into(),
            status: status.into(),
            duration_ms,
            attempt: None,
            error: None,
            metadata: None,
            created_at: at,
        }
    }

    fn parse_all(rows: &[TimingEventRow]) -> Vec<TimingStepRecord> {
        rows.iter().filter_map(parse_timing_step).collect()
    }

    #[test]
    fn parse_rejects_unknown_workflow_and_status() {
        assert!(parse_timing_step(&row("r", "archive", "x", "ok", 1, 1_700_000_000_000)).is_none());
        assert!(parse_timing_step(&row("r", "create", "x", "skipped", 1, 1_700_000_000_000)).is_none());
        assert!(parse_timing_step(&row("r", "create", "x", "ok", 1, 1_700_000_000_000)).is_some());
    }

    #[test]
    fn parse_tolerates_bad_metadata_and_negative_values() {
        let mut raw = row("r", "delete", "stop_services", "ok", -5, 1_700_000_000_000);
        raw.metadata = Some("not json".into());
        raw.attempt = Some(-1);
        let step = parse_timing_step(&raw).unwrap();
        assert!(step.metadata.is_empty());
        assert_eq!(step.duration_ms, 0);
        assert_eq!(step.attempt, None);

        raw.metadata = Some(r#"{"releasedPorts":[39100]}"#.into());
        let step = parse_timing_step(&raw).unwrap();
        assert_eq!(step.metadata["releasedPorts"][0], 39100);
    }

    #[test]
    fn builds_one_run_per_run_id() {
        let base = 1_700_000_000_000;
        let steps = parse_all(&[
            row("run-create", "create", "ensure_services", "ok", 1250, base),
            row("run-create", "create", "total", "ok", 1800, base + 10),
            row("run-delete", "delete", "stop_services", "error", 30, base + 100),
            row("run-delete", "delete", "total", "error", 55, base + 110),
        ]);

        let runs = build_timing_runs(&steps);
        assert_eq!(runs.len(), 2);

        assert_eq!(runs[0].run_id, "run-delete");
        assert_eq!(runs[0].workflow, TimingWorkflow::Delete);
        assert_eq!(runs[0].status, TimingStatus::Error);
        assert_eq!(runs[0].total_duration_ms, 55);
        assert_eq!(runs[0].step_count, 2);

        assert_eq!(runs[1].run_id, "run-create");
        assert_eq!(runs[1].status, TimingStatus::Ok);
        assert_eq!(runs[1].total_duration_ms, 1800);
        assert_eq!(runs[1].started_at.timestamp_millis(), base);
        assert_eq!(runs[1].finished_at.timestamp_millis(), base + 10);
    }

    #[test]
    fn total_falls_back_to_sum_and_first_attempt_wins() {
        let base = 1_700_000_000_000;
        let mut rows = vec![
            row("run-a", "create", "clone", "ok", 100, base + 20),
            row("run-a", "create", "install", "ok", 250, base),
            row("run-a", "create", "setup", "ok", 50, base + 40),
        ];
        rows[1].attempt = Some(2);
        rows[2].attempt = Some(3);

        let runs = build_timing_runs(&parse_all(&rows));
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].total_duration_ms, 400);
        // Earliest step by time carries attempt 2.
        assert_eq!(runs[0].attempt, Some(2));
        assert_eq!(runs[0].started_at.timestamp_millis(), base);
        assert_eq!(runs[0].finished_at.timestamp_millis(), base + 40);
    }

    #[test]
    fn empty_input_yields_no_runs() {
        assert!(build_timing_runs(&[]).is_empty());
    }
}
