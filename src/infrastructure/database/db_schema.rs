use super::connection::Database;

pub fn initialize_schema(db: &Database) -> anyhow::Result<()> {
    let conn = db.get_conn()?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS cells (
            id TEXT PRIMARY KEY,
            workspace_id TEXT NOT NULL,
            name TEXT NOT NULL,
            repository_path TEXT NOT NULL,
            workspace_path TEXT NOT NULL,
            branch TEXT,
            status TEXT NOT NULL,  -- 'pending', 'spawning', 'ready', 'error', 'deleting'
            last_setup_error TEXT,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_cells_workspace ON cells(workspace_id)",
        [],
    )?;

    // No foreign key to cells: timing history outlives the cell it describes.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS cell_timing_events (
            id TEXT PRIMARY KEY,
            cell_id TEXT NOT NULL,
            workspace_id TEXT,
            workflow TEXT NOT NULL,
            run_id TEXT NOT NULL,
            step TEXT NOT NULL,
            status TEXT NOT NULL,
            duration_ms INTEGER NOT NULL,
            attempt INTEGER,
            error TEXT,
            metadata TEXT,
            created_at INTEGER NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_timing_cell ON cell_timing_events(cell_id, created_at DESC)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_timing_run ON cell_timing_events(run_id)",
        [],
    )?;

    apply_cells_migrations(&conn)?;

    Ok(())
}

fn apply_cells_migrations(conn: &rusqlite::Connection) -> anyhow::Result<()> {
    // Databases created before setup errors were tracked lack the column.
    let mut stmt = conn.prepare("PRAGMA table_info(cells)")?;
    let columns = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<Result<Vec<_>, _>>()?;

    if !columns.iter().any(|c| c == "last_setup_error") {
        conn.execute("ALTER TABLE cells ADD COLUMN last_setup_error TEXT", [])?;
    }
    Ok(())
}
