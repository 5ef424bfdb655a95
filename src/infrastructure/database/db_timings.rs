use super::connection::Database;
use super::timestamps::to_epoch_millis;
use crate::domains::timing::entity::{TimingEventRow, TimingFilter, TimingStepRecord};
use anyhow::Result;
use rusqlite::{Row, params_from_iter, types::Value};

pub trait TimingMethods {
    fn insert_timing_row(&self, record: &TimingStepRecord) -> Result<()>;
    fn list_timing_rows(&self, filter: &TimingFilter) -> Result<Vec<TimingEventRow>>;
}

impl TimingMethods for Database {
    fn insert_timing_row(&self, record: &TimingStepRecord) -> Result<()> {
        let conn = self.get_conn()?;
        let metadata = serde_json::to_string(&record.metadata)?;
        conn.execute(
            "INSERT INTO cell_timing_events (
                id, cell_id, workspace_id, workflow, run_id, step, status,
                duration_ms, attempt, error, metadata, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            rusqlite::params![
                record.id,
                record.cell_id,
                record.workspace_id,
                record.workflow.as_str(),
                record.run_id,
                record.step,
                record.status.as_str(),
                record.duration_ms as i64,
                record.attempt,
                record.error,
                metadata,
                to_epoch_millis(&record.created_at),
            ],
        )?;
        Ok(())
    }

    fn list_timing_rows(&self, filter: &TimingFilter) -> Result<Vec<TimingEventRow>> {
        let conn = self.get_conn()?;

        let mut clauses: Vec<&str> = Vec::new();
        let mut values: Vec<Value> = Vec::new();
        if let Some(cell_id) = &filter.cell_id {
            clauses.push("cell_id = ?");
            values.push(Value::Text(cell_id.clone()));
        }
        if let Some(workflow) = filter.workflow {
            clauses.push("workflow = ?");
            values.push(Value::Text(workflow.as_str().to_string()));
        }
        if let Some(run_id) = &filter.run_id {
            clauses.push("run_id = ?");
            values.push(Value::Text(run_id.clone()));
        }
        values.push(Value::Integer(filter.effective_limit() as i64));

        let where_sql = if clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", clauses.join(" AND "))
        };
        let sql = format!(
            "SELECT id, cell_id, workspace_id, workflow, run_id, step, status,
                    duration_ms, attempt, error, metadata, created_at
             FROM cell_timing_events
             {where_sql}
             ORDER BY created_at DESC, rowid DESC
             LIMIT ?"
        );

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(values), row_to_timing_event)?;
        let mut events = Vec::new();
        for row in rows {
            events.push(row?);
        }
        Ok(events)
    }
}

fn row_to_timing_event(row: &Row<'_>) -> rusqlite::Result<TimingEventRow> {
    Ok(TimingEventRow {
        id: row.get(0)?,
        cell_id: row.get(1)?,
        workspace_id: row.get(2)?,
        workflow: row.get(3)?,
        run_id: row.get(4)?,
        step: row.get(5)?,
        status: row.get(6)?,
        duration_ms: row.get(7)?,
        attempt: row.get(8)?,
        error: row.get(9)?,
        metadata: row.get(10)?,
        created_at: row.get(11)?,
    })
}
