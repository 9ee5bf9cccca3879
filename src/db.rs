use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use rusqlite::{Connection, Row};

use crate::schema::{CanonicalRecord, DataSource};

pub fn connect(path: &Path) -> Result<Connection> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir).with_context(|| format!("Failed to create {:?}", dir))?;
    }
    let conn = Connection::open(path).with_context(|| format!("Failed to open {:?}", path))?;
    conn.execute_batch("PRAGMA journal_mode=WAL;")?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS records (
            registration_date      TEXT,
            data_source            TEXT NOT NULL,
            source_detail          TEXT NOT NULL,
            product_type           TEXT,
            top_level_product_type TEXT,
            upper_product_type     TEXT,
            product_name           TEXT,
            origin_country         TEXT,
            notifying_country      TEXT,
            hazard_category        TEXT,
            hazard_item            TEXT,
            full_text              TEXT,
            analyzable             BOOLEAN NOT NULL DEFAULT 0,
            interest_item          BOOLEAN NOT NULL DEFAULT 0,
            updated_at             TEXT NOT NULL DEFAULT (datetime('now')),
            PRIMARY KEY (data_source, source_detail)
        );
        CREATE INDEX IF NOT EXISTS idx_records_date ON records(registration_date);
        ",
    )?;
    Ok(())
}

const SELECT_RECORDS: &str = "SELECT registration_date, data_source, source_detail, product_type,
        top_level_product_type, upper_product_type, product_name, origin_country,
        notifying_country, hazard_category, hazard_item, full_text, analyzable, interest_item
     FROM records";

fn record_from_row(row: &Row) -> rusqlite::Result<CanonicalRecord> {
    let date: Option<String> = row.get(0)?;
    let source: String = row.get(1)?;
    Ok(CanonicalRecord {
        registration_date: date.and_then(|d| NaiveDate::parse_from_str(&d, "%Y-%m-%d").ok()),
        data_source: source.parse().unwrap_or(DataSource::Unknown),
        source_detail: row.get(2)?,
        product_type: row.get(3)?,
        top_level_product_type: row.get(4)?,
        upper_product_type: row.get(5)?,
        product_name: row.get(6)?,
        origin_country: row.get(7)?,
        notifying_country: row.get(8)?,
        hazard_category: row.get(9)?,
        hazard_item: row.get(10)?,
        full_text: row.get(11)?,
        analyzable: row.get(12)?,
        interest_item: row.get(13)?,
    })
}

/// Every stored record, in key order.
pub fn load_records(conn: &Connection) -> Result<Vec<CanonicalRecord>> {
    let sql = format!("{} ORDER BY data_source, source_detail", SELECT_RECORDS);
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([], record_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Records for one source, used as the `existing` side of a merge.
pub fn load_source(conn: &Connection, source: &DataSource) -> Result<Vec<CanonicalRecord>> {
    let sql = format!(
        "{} WHERE data_source = ?1 ORDER BY source_detail",
        SELECT_RECORDS
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([source.as_str()], record_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Write already-merged records. One row per key; existing rows are replaced.
pub fn save_records(conn: &Connection, records: &[CanonicalRecord]) -> Result<usize> {
    let tx = conn.unchecked_transaction()?;
    let mut count = 0;
    {
        let mut stmt = tx.prepare(
            "INSERT OR REPLACE INTO records
             (registration_date, data_source, source_detail, product_type,
              top_level_product_type, upper_product_type, product_name, origin_country,
              notifying_country, hazard_category, hazard_item, full_text,
              analyzable, interest_item, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, datetime('now'))",
        )?;
        for r in records {
            count += stmt.execute(rusqlite::params![
                r.registration_date.map(|d| d.format("%Y-%m-%d").to_string()),
                r.data_source.as_str(),
                r.source_detail,
                r.product_type,
                r.top_level_product_type,
                r.upper_product_type,
                r.product_name,
                r.origin_country,
                r.notifying_country,
                r.hazard_category,
                r.hazard_item,
                r.full_text,
                r.analyzable,
                r.interest_item,
            ])?;
        }
    }
    tx.commit()?;
    Ok(count)
}

// ── Stats ──

pub struct SourceStats {
    pub data_source: String,
    pub total: usize,
    pub undated: usize,
    pub no_country: usize,
    pub no_hazard: usize,
    pub analyzable: usize,
}

pub struct Stats {
    pub total: usize,
    pub by_source: Vec<SourceStats>,
}

pub fn get_stats(conn: &Connection) -> Result<Stats> {
    let total: usize = conn.query_row("SELECT COUNT(*) FROM records", [], |r| r.get(0))?;
    let mut stmt = conn.prepare(
        "SELECT data_source,
                COUNT(*),
                SUM(registration_date IS NULL),
                SUM(origin_country IS NULL),
                SUM(hazard_item IS NULL),
                SUM(analyzable)
         FROM records
         GROUP BY data_source
         ORDER BY data_source",
    )?;
    let by_source = stmt
        .query_map([], |row| {
            Ok(SourceStats {
                data_source: row.get(0)?,
                total: row.get(1)?,
                undated: row.get(2)?,
                no_country: row.get(3)?,
                no_hazard: row.get(4)?,
                analyzable: row.get(5)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Stats { total, by_source })
}

/// Write all stored records as JSON lines, columns in canonical order.
pub fn export_jsonl<W: Write>(conn: &Connection, out: &mut W) -> Result<usize> {
    let records = load_records(conn)?;
    for r in &records {
        serde_json::to_writer(&mut *out, r)?;
        out.write_all(b"\n")?;
    }
    out.flush()?;
    Ok(records.len())
}
