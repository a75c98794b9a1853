//! Destinations for the final customer feature table.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use rusqlite::{params, Connection};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::info;

use crate::records::{CustomerFeatureRow, OUTPUT_COLUMNS};

pub const SQLITE_TABLE: &str = "customer_features";

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("I/O error writing {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("invalid output path: {0}")]
    InvalidPath(PathBuf),
}

pub trait TableSink {
    fn write_rows(&self, rows: &[CustomerFeatureRow]) -> Result<(), SinkError>;

    fn describe(&self) -> String;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CsvSink {
    pub path: PathBuf,
    pub delimiter: u8,
}

impl CsvSink {
    pub fn new(path: impl Into<PathBuf>, delimiter: u8) -> Self {
        Self {
            path: path.into(),
            delimiter,
        }
    }
}

impl TableSink for CsvSink {
    fn write_rows(&self, rows: &[CustomerFeatureRow]) -> Result<(), SinkError> {
        let bytes = render_csv(rows, self.delimiter)?;
        write_atomic(&self.path, &bytes)?;
        info!(
            component = "sink",
            event = "sink.write.finish",
            sink = "csv",
            path = %self.path.display(),
            rows = rows.len(),
            bytes = bytes.len()
        );
        Ok(())
    }

    fn describe(&self) -> String {
        format!("csv:{}", self.path.display())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqliteSink {
    pub path: PathBuf,
}

impl TableSink for SqliteSink {
    /// Replaces the table contents inside a single transaction.
    fn write_rows(&self, rows: &[CustomerFeatureRow]) -> Result<(), SinkError> {
        let mut conn = Connection::open(&self.path)?;
        let tx = conn.transaction()?;
        tx.execute_batch(&format!(
            "
            DROP TABLE IF EXISTS {SQLITE_TABLE};
            CREATE TABLE {SQLITE_TABLE} (
                customer_id TEXT PRIMARY KEY NOT NULL,
                customer_age REAL,
                tenure REAL,
                sex TEXT NOT NULL,
                age_group TEXT NOT NULL,
                tenure_group TEXT NOT NULL,
                total_baskets INTEGER NOT NULL,
                total_items REAL NOT NULL,
                avg_basket_size REAL NOT NULL,
                distinct_products INTEGER NOT NULL,
                last_basket_date TEXT,
                days_since_last_basket INTEGER NOT NULL
            );
            "
        ))?;

        {
            let mut stmt = tx.prepare(&format!(
                "INSERT INTO {SQLITE_TABLE} ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                OUTPUT_COLUMNS.join(", ")
            ))?;
            for row in rows {
                stmt.execute(params![
                    row.customer_id,
                    row.customer_age,
                    row.tenure,
                    row.sex,
                    row.age_group.as_str(),
                    row.tenure_group.as_str(),
                    row.total_baskets as i64,
                    row.total_items,
                    row.avg_basket_size,
                    row.distinct_products as i64,
                    row.last_basket_date
                        .map(|date| date.format("%Y-%m-%d").to_string()),
                    row.days_since_last_basket,
                ])?;
            }
        }
        tx.commit()?;

        info!(
            component = "sink",
            event = "sink.write.finish",
            sink = "sqlite",
            path = %self.path.display(),
            table = SQLITE_TABLE,
            rows = rows.len()
        );
        Ok(())
    }

    fn describe(&self) -> String {
        format!("sqlite:{}#{SQLITE_TABLE}", self.path.display())
    }
}

/// Delimiter of the canonical rendering hashed by [`output_fingerprint`].
pub const CANONICAL_DELIMITER: u8 = b',';

/// Renders rows with a header line in `OUTPUT_COLUMNS` order.
pub fn render_csv(rows: &[CustomerFeatureRow], delimiter: u8) -> Result<Vec<u8>, SinkError> {
    let mut writer = csv::WriterBuilder::new()
        .delimiter(delimiter)
        .from_writer(Vec::new());
    writer.write_record(OUTPUT_COLUMNS)?;
    for row in rows {
        writer.write_record(row.to_cell_text_values())?;
    }
    writer
        .into_inner()
        .map_err(|err| SinkError::Csv(err.into_error().into()))
}

/// Hex SHA-256 of `bytes`. Run reports hash the canonical CSV rendering
/// (`CANONICAL_DELIMITER`, header included) whatever the sink wrote.
pub fn output_fingerprint(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), SinkError> {
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .ok_or_else(|| SinkError::InvalidPath(path.to_path_buf()))?;
    let tmp_path = path.with_file_name(format!("{file_name}.tmp"));
    let io_err = |source: std::io::Error| SinkError::Io {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(io_err)?;
    }

    let written = fs::File::create(&tmp_path)
        .and_then(|mut file| {
            file.write_all(bytes)?;
            file.sync_all()
        })
        .and_then(|()| fs::rename(&tmp_path, path));
    if let Err(source) = written {
        let _ = fs::remove_file(&tmp_path);
        return Err(io_err(source));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::{AgeGroup, TenureGroup};
    use chrono::NaiveDate;
    use tempfile::tempdir;

    fn sample_row(id: &str) -> CustomerFeatureRow {
        CustomerFeatureRow {
            customer_id: id.to_string(),
            customer_age: Some(41.0),
            tenure: Some(12.0),
            sex: "F".to_string(),
            age_group: AgeGroup::From35To44,
            tenure_group: TenureGroup::Neu,
            total_baskets: 3,
            total_items: 7.0,
            avg_basket_size: 2.3333333333333335,
            distinct_products: 2,
            last_basket_date: NaiveDate::from_ymd_opt(2023, 6, 1),
            days_since_last_basket: 213,
        }
    }

    #[test]
    fn csv_has_stable_header_and_rows() {
        let bytes = render_csv(&[sample_row("1")], b',').unwrap();
        let text = String::from_utf8(bytes).unwrap();
        let mut lines = text.lines();

        assert_eq!(lines.next().unwrap(), OUTPUT_COLUMNS.join(","));
        assert_eq!(
            lines.next().unwrap(),
            "1,41,12,F,35-44,neu,3,7,2.3333333333333335,2,2023-06-01,213"
        );
        assert!(lines.next().is_none());
    }

    #[test]
    fn csv_sink_writes_atomically_into_new_directory() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out").join("features.csv");
        let sink = CsvSink::new(path.clone(), b';');

        sink.write_rows(&[sample_row("1"), sample_row("2")]).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("customer_id;customer_age;"));
        assert_eq!(text.lines().count(), 3);
        assert!(!path.with_file_name("features.csv.tmp").exists());
    }

    #[test]
    fn sqlite_sink_replaces_table_contents() {
        let dir = tempdir().unwrap();
        let sink = SqliteSink {
            path: dir.path().join("features.db"),
        };

        sink.write_rows(&[sample_row("1"), sample_row("2")]).unwrap();
        sink.write_rows(&[sample_row("3")]).unwrap();

        let conn = Connection::open(&sink.path).unwrap();
        let (count, id, last): (i64, String, Option<String>) = conn
            .query_row(
                &format!(
                    "SELECT COUNT(*), MIN(customer_id), MIN(last_basket_date) FROM {SQLITE_TABLE}"
                ),
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .unwrap();
        assert_eq!(count, 1);
        assert_eq!(id, "3");
        assert_eq!(last.as_deref(), Some("2023-06-01"));
    }

    #[test]
    fn fingerprint_is_hex_sha256() {
        let fp = output_fingerprint(b"abc");
        assert_eq!(
            fp,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn failed_rename_removes_temp_file() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("features.csv");
        fs::create_dir(&target).unwrap();
        fs::write(target.join("occupied"), b"x").unwrap();

        let err = CsvSink::new(target.clone(), b',')
            .write_rows(&[sample_row("1")])
            .unwrap_err();

        assert!(matches!(err, SinkError::Io { .. }));
        assert!(!dir.path().join("features.csv.tmp").exists());
        assert!(target.join("occupied").exists());
    }
}
