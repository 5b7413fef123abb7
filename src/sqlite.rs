use anyhow::{Context, Result};
use rusqlite::{params, Connection, OpenFlags, Result as SqliteResult};
use std::path::Path;
use std::time::Instant;
use tracing::{info, warn};

use crate::ingest::NormalizedVacancyRecord;
use crate::rates::{RateTable, YearMonth};

pub fn open_database(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path).with_context(|| format!("Failed to open database {:?}", path))?;
    info!(action = "open", component = "database", path = ?path, "Connected to database");
    Ok(conn)
}

/// Replaces the `rates` table with the contents of `table`.
pub fn save_rate_table(conn: &mut Connection, table: &RateTable) -> Result<usize> {
    let start_time = Instant::now();
    let tx = conn.transaction()?;
    tx.execute_batch(
        "DROP TABLE IF EXISTS rates;
         CREATE TABLE rates (
             year INTEGER NOT NULL,
             month INTEGER NOT NULL,
             currency TEXT NOT NULL,
             rate REAL,
             PRIMARY KEY (year, month, currency)
         );",
    )
    .context("Failed to create rates table")?;

    let mut written = 0;
    {
        let mut stmt = tx.prepare("INSERT INTO rates (year, month, currency, rate) VALUES (?1, ?2, ?3, ?4)")?;
        for (at, code, rate) in table.entries() {
            stmt.execute(params![at.year, at.month, code, rate])?;
            written += 1;
        }
    }
    tx.commit()?;

    info!(
        action = "complete",
        component = "rate_store",
        rows = written,
        duration_ms = start_time.elapsed().as_millis(),
        "Rate table saved"
    );
    Ok(written)
}

pub fn load_rate_table(conn: &Connection) -> Result<RateTable> {
    let start_time = Instant::now();
    let rows = conn
        .prepare("SELECT year, month, currency, rate FROM rates ORDER BY year, month, currency")
        .context("Failed to query rates table")?
        .query_map([], |row| {
            Ok((
                row.get::<_, i32>(0)?,
                row.get::<_, u32>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, Option<f64>>(3)?,
            ))
        })?
        .collect::<SqliteResult<Vec<_>>>()?;

    let mut table = RateTable::new();
    for (year, month, code, rate) in rows {
        match YearMonth::new(year, month) {
            Some(at) => table.insert(at, &code, rate),
            None => warn!(action = "load", component = "rate_store", year, month, currency = %code, "Skipping row with invalid month"),
        }
    }

    info!(
        action = "complete",
        component = "rate_store",
        months = table.month_count(),
        known_rates = table.known_count(),
        duration_ms = start_time.elapsed().as_millis(),
        "Rate table loaded"
    );
    Ok(table)
}

/// Replaces the `vacancies` table with `records`.
pub fn save_vacancies(conn: &mut Connection, records: &[NormalizedVacancyRecord]) -> Result<usize> {
    let start_time = Instant::now();
    let tx = conn.transaction()?;
    tx.execute_batch(
        "DROP TABLE IF EXISTS vacancies;
         CREATE TABLE vacancies (
             name TEXT NOT NULL,
             salary INTEGER,
             area_name TEXT NOT NULL,
             year INTEGER NOT NULL
         );",
    )
    .context("Failed to create vacancies table")?;

    {
        let mut stmt = tx.prepare("INSERT INTO vacancies (name, salary, area_name, year) VALUES (?1, ?2, ?3, ?4)")?;
        for record in records {
            stmt.execute(params![record.name, record.salary_rub, record.area, record.year])?;
        }
    }
    tx.commit()?;

    info!(
        action = "complete",
        component = "vacancy_store",
        rows = records.len(),
        duration_ms = start_time.elapsed().as_millis(),
        "Vacancies saved"
    );
    Ok(records.len())
}

/// Loads normalized vacancies in insertion order.
pub fn load_vacancies(conn: &Connection) -> Result<Vec<NormalizedVacancyRecord>> {
    let start_time = Instant::now();
    let records = conn
        .prepare("SELECT name, salary, area_name, year FROM vacancies ORDER BY rowid")
        .context("Failed to query vacancies table")?
        .query_map([], |row| {
            Ok(NormalizedVacancyRecord {
                name: row.get(0)?,
                salary_rub: row.get(1)?,
                area: row.get(2)?,
                year: row.get(3)?,
            })
        })?
        .collect::<SqliteResult<Vec<_>>>()?;

    info!(
        action = "complete",
        component = "vacancy_store",
        rows = records.len(),
        duration_ms = start_time.elapsed().as_millis(),
        "Vacancies loaded"
    );
    Ok(records)
}

/// Reads the vacancies stored at `path` without creating or modifying anything.
///
/// A missing file or a store without a `vacancies` table yields no records.
pub fn load_stored_vacancies(path: &Path) -> Result<Vec<NormalizedVacancyRecord>> {
    if !path.exists() {
        warn!(action = "open", component = "vacancy_store", path = ?path, "Vacancy store not found");
        return Ok(Vec::new());
    }
    let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX)
        .with_context(|| format!("Failed to open database {:?}", path))?;

    let has_table: bool = conn
        .query_row(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = 'vacancies')",
            [],
            |row| row.get(0),
        )
        .with_context(|| format!("Failed to inspect database {:?}", path))?;
    if !has_table {
        warn!(action = "open", component = "vacancy_store", path = ?path, "No vacancies table");
        return Ok(Vec::new());
    }
    load_vacancies(&conn)
}
