use super::connection::Database;
use super::timestamps::{to_epoch_millis, utc_from_epoch_millis_lossy};
use crate::domains::cells::entity::{Cell, CellStatus};
use crate::errors::CellyardError;
use anyhow::Result;
use chrono::Utc;
use rusqlite::{OptionalExtension, Row, params};
use std::path::PathBuf;

const CELL_COLUMNS: &str = "id, workspace_id, name, repository_path, workspace_path, branch,
                            status, last_setup_error, created_at, updated_at";

pub trait CellMethods {
    fn create_cell(&self, cell: &Cell) -> Result<()>;
    fn find_cell(&self, id: &str) -> Result<Option<Cell>>;
    fn list_cells(&self, workspace_id: &str) -> Result<Vec<Cell>>;
    fn set_cell_status(&self, id: &str, status: CellStatus) -> Result<()>;
    fn set_cell_setup_error(&self, id: &str, message: Option<&str>) -> Result<()>;
    fn remove_cell(&self, id: &str) -> Result<()>;
}

impl CellMethods for Database {
    fn create_cell(&self, cell: &Cell) -> Result<()> {
        let conn = self.get_conn()?;
        conn.execute(
            "INSERT INTO cells (
                id, workspace_id, name, repository_path, workspace_path, branch,
                status, last_setup_error, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                cell.id,
                cell.workspace_id,
                cell.name,
                cell.repository_path.to_string_lossy(),
                cell.workspace_path.to_string_lossy(),
                cell.branch,
                cell.status.as_str(),
                cell.last_setup_error,
                to_epoch_millis(&cell.created_at),
                to_epoch_millis(&cell.updated_at),
            ],
        )?;
        Ok(())
    }

    fn find_cell(&self, id: &str) -> Result<Option<Cell>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(&format!("SELECT {CELL_COLUMNS} FROM cells WHERE id = ?1"))?;
        let cell = stmt.query_row(params![id], row_to_cell).optional()?;
        Ok(cell)
    }

    fn list_cells(&self, workspace_id: &str) -> Result<Vec<Cell>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {CELL_COLUMNS} FROM cells
             WHERE workspace_id = ?1
             ORDER BY created_at DESC, rowid DESC"
        ))?;
        let rows = stmt.query_map(params![workspace_id], row_to_cell)?;
        let mut cells = Vec::new();
        for row in rows {
            cells.push(row?);
        }
        Ok(cells)
    }

    fn set_cell_status(&self, id: &str, status: CellStatus) -> Result<()> {
        let conn = self.get_conn()?;
        let updated = conn.execute(
            "UPDATE cells
             SET status = ?1, updated_at = ?2
             WHERE id = ?3",
            params![status.as_str(), Utc::now().timestamp_millis(), id],
        )?;
        if updated == 0 {
            return Err(CellyardError::CellNotFound {
                cell_id: id.to_string(),
            }
            .into());
        }
        Ok(())
    }

    fn set_cell_setup_error(&self, id: &str, message: Option<&str>) -> Result<()> {
        let conn = self.get_conn()?;
        conn.execute(
            "UPDATE cells
             SET last_setup_error = ?1, updated_at = ?2
             WHERE id = ?3",
            params![message, Utc::now().timestamp_millis(), id],
        )?;
        Ok(())
    }

    fn remove_cell(&self, id: &str) -> Result<()> {
        let conn = self.get_conn()?;
        conn.execute("DELETE FROM cells WHERE id = ?1", params![id])?;
        Ok(())
    }
}

fn row_to_cell(row: &Row<'_>) -> rusqlite::Result<Cell> {
    let status: String = row.get(6)?;
    let status = status.parse::<CellStatus>().unwrap_or_else(|err| {
        log::warn!("{err}; treating cell as errored");
        CellStatus::Error
    });

    Ok(Cell {
        id: row.get(0)?,
        workspace_id: row.get(1)?,
        name: row.get(2)?,
        repository_path: PathBuf::from(row.get::<_, String>(3)?),
        workspace_path: PathBuf::from(row.get::<_, String>(4)?),
        branch: row.get(5)?,
        status,
        last_setup_error: row.get(7)?,
        created_at: utc_from_epoch_millis_lossy(row.get(8)?),
        updated_at: utc_from_epoch_millis_lossy(row.get(9)?),
    })
}
