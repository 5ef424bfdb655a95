use futures::future::BoxFuture;
use serde::Serialize;
use serde_json::{Map, Value};
use std::time::{Duration, Instant};

use super::timeout::run_with_timeout;
use crate::domains::timing::{TimingRecorder, TimingStatus};

pub type StepMetadata = Map<String, Value>;

/// One unit of a lifecycle workflow.
pub struct LifecycleStep<'a> {
    pub name: &'static str,
    pub timeout: Duration,
    /// A fatal failure stops the workflow; any other failure is recorded and skipped.
    pub fatal: bool,
    pub action: BoxFuture<'a, anyhow::Result<StepMetadata>>,
}

impl<'a> LifecycleStep<'a> {
    pub fn new(
        name: &'static str,
        timeout: Duration,
        action: BoxFuture<'a, anyhow::Result<StepMetadata>>,
    ) -> Self {
        Self {
            name,
            timeout,
            fatal: false,
            action,
        }
    }

    pub fn fatal(mut self) -> Self {
        self.fatal = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StepOutcome {
    pub name: String,
    pub status: TimingStatus,
    pub duration_ms: u64,
    pub error: Option<String>,
}

/// Runs steps strictly in order, recording a timing row for each.
pub struct StepRunner<'r> {
    recorder: &'r TimingRecorder,
    label: String,
    outcomes: Vec<StepOutcome>,
}

impl<'r> StepRunner<'r> {
    /// `label` identifies the subject (usually the cell id) in log lines.
    pub fn new(recorder: &'r TimingRecorder, label: impl Into<String>) -> Self {
        Self {
            recorder,
            label: label.into(),
            outcomes: Vec::new(),
        }
    }

    pub async fn run(&mut self, step: LifecycleStep<'_>) -> anyhow::Result<()> {
        let started = Instant::now();
        let result = run_with_timeout(step.name, step.timeout, step.action).await;
        let duration = started.elapsed();

        match result {
            Ok(metadata) => {
                self.recorder
                    .record_step(step.name, TimingStatus::Ok, duration, None, metadata)
                    .await;
                self.push(step.name, TimingStatus::Ok, duration, None);
                Ok(())
            }
            Err(err) => {
                let message = format!("{err:#}");
                self.recorder
                    .record_step(
                        step.name,
                        TimingStatus::Error,
                        duration,
                        Some(&message),
                        Map::new(),
                    )
                    .await;
                self.push(step.name, TimingStatus::Error, duration, Some(message.clone()));

                if step.fatal {
                    log::error!("Step {} failed for {}: {message}", step.name, self.label);
                    Err(err)
                } else {
                    log::warn!(
                        "Step {} failed for {}, continuing: {message}",
                        step.name,
                        self.label
                    );
                    Ok(())
                }
            }
        }
    }

    /// Stops at the first fatal failure and returns it.
    pub async fn run_all(&mut self, steps: Vec<LifecycleStep<'_>>) -> anyhow::Result<()> {
        for step in steps {
            self.run(step).await?;
        }
        Ok(())
    }

    pub fn outcomes(&self) -> &[StepOutcome] {
        &self.outcomes
    }

    pub fn into_outcomes(self) -> Vec<StepOutcome> {
        self.outcomes
    }

    fn push(&mut self, name: &str, status: TimingStatus, duration: Duration, error: Option<String>) {
        self.outcomes.push(StepOutcome {
            name: name.to_string(),
            status,
            duration_ms: duration.as_millis() as u64,
            error,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domains::timing::{TimingEventRow, TimingFilter, TimingStepRecord, TimingStore, TimingWorkflow};
    use async_trait::async_trait;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct MemoryStore(Mutex<Vec<TimingStepRecord>>);

    #[async_trait]
    impl TimingStore for MemoryStore {
        async fn insert_timing_event(&self, record: &TimingStepRecord) -> anyhow::Result<()> {
            self.0.lock().unwrap().push(record.clone());
            Ok(())
        }

        async fn list_timing_events(&self, _filter: &TimingFilter) -> anyhow::Result<Vec<TimingEventRow>> {
            Ok(Vec::new())
        }
    }

    fn fail(message: &str) -> anyhow::Result<StepMetadata> {
        Err(anyhow::anyhow!(message.to_string()))
    }

    fn ok_with(key: &str, value: Value) -> anyhow::Result<StepMetadata> {
        let mut map = Map::new();
        map.insert(key.to_string(), value);
        Ok(map)
    }

    #[tokio::test]
    async fn non_fatal_failures_continue_and_fatal_stops() {
        let store = Arc::new(MemoryStore::default());
        let recorder = TimingRecorder::new(store.clone(), "cell-1", None, TimingWorkflow::Delete);
        let mut runner = StepRunner::new(&recorder, "cell-1");
        let budget = Duration::from_secs(1);

        let result = runner
            .run_all(vec![
                LifecycleStep::new("first", budget, Box::pin(async { ok_with("n", Value::from(1)) })),
                LifecycleStep::new("second", budget, Box::pin(async { fail("flaky") })),
                LifecycleStep::new("third", budget, Box::pin(async { fail("broken") }))
                    .fatal(),
                LifecycleStep::new("never", budget, Box::pin(async { ok_with("n", Value::from(4)) })),
            ])
            .await;

        assert_eq!(result.unwrap_err().to_string(), "broken");
        let names: Vec<_> = runner.outcomes().iter().map(|o| o.name.as_str()).collect();
        assert_eq!(names, vec!["first", "second", "third"]);
        assert_eq!(runner.outcomes()[1].error.as_deref(), Some("flaky"));

        let records = store.0.lock().unwrap().clone();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].metadata["n"], 1);
        assert_eq!(records[1].status, TimingStatus::Error);
        assert_eq!(records[2].error.as_deref(), Some("broken"));
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_is_recorded_as_step_error() {
        let store = Arc::new(MemoryStore::default());
        let recorder = TimingRecorder::new(store.clone(), "cell-1", None, TimingWorkflow::Delete);
        let mut runner = StepRunner::new(&recorder, "cell-1");

        runner
            .run(LifecycleStep::new(
                "close_agent_session",
                Duration::from_millis(20),
                Box::pin(async {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    ok_with("late", Value::Bool(true))
                }),
            ))
            .await
            .unwrap();

        let outcome = &runner.outcomes()[0];
        assert_eq!(outcome.status, TimingStatus::Error);
        assert_eq!(
            outcome.error.as_deref(),
            Some("Step 'close_agent_session' timed out after 20ms")
        );
    }
}
