//! Delimited-text table source with an explicit per-table schema.

use std::fs;
use std::path::Path;

use csv::StringRecord;
use encoding_rs::{Encoding, UTF_8};
use thiserror::Error;
use tracing::{info, warn};

use crate::records::{RawBasketRecord, RawCustomerRecord};

pub const BASKET_COLUMNS: [&str; 4] = ["customer_id", "basket_date", "basket_count", "product_id"];
pub const CUSTOMER_COLUMNS: [&str; 4] = ["customer_id", "customer_age", "tenure", "sex"];

/// Cell contents treated as missing, in addition to the empty cell.
const NULL_MARKERS: [&str; 18] = [
    "#N/A", "#N/A N/A", "#NA", "-1.#IND", "-1.#QNAN", "-NaN", "-nan", "1.#IND", "1.#QNAN", "<NA>",
    "N/A", "NA", "NULL", "NaN", "None", "n/a", "nan", "null",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableKind {
    Basket,
    Customer,
    Sales,
}

impl TableKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Basket => "basket",
            Self::Customer => "customer",
            Self::Sales => "sales",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SourceOptions {
    pub delimiter: u8,
    pub encoding: &'static Encoding,
    /// chrono format string; when unset a fixed list of ISO layouts is tried.
    pub date_format: Option<String>,
}

impl Default for SourceOptions {
    fn default() -> Self {
        Self {
            delimiter: b',',
            encoding: UTF_8,
            date_format: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("{table} table is missing required column '{column}'")]
    MissingColumn {
        table: &'static str,
        column: &'static str,
    },
    #[error("{table} table has no header row")]
    MissingHeader { table: &'static str },
    #[error("I/O error reading {table} table: {source}")]
    Io {
        table: &'static str,
        #[source]
        source: std::io::Error,
    },
    #[error("CSV error in {table} table: {source}")]
    Csv {
        table: &'static str,
        #[source]
        source: csv::Error,
    },
}

/// Header-validated table held as text records.
#[derive(Debug, Clone)]
pub(crate) struct RawTable {
    kind: TableKind,
    headers: StringRecord,
    records: Vec<StringRecord>,
}

impl RawTable {
    pub(crate) fn parse(
        kind: TableKind,
        text: &str,
        opts: &SourceOptions,
    ) -> Result<Self, SourceError> {
        let table = kind.as_str();
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(opts.delimiter)
            .flexible(true)
            .from_reader(text.as_bytes());

        let headers = reader
            .headers()
            .map_err(|source| SourceError::Csv { table, source })?
            .clone();
        if headers.is_empty() {
            return Err(SourceError::MissingHeader { table });
        }

        let mut records = Vec::new();
        for record in reader.records() {
            records.push(record.map_err(|source| SourceError::Csv { table, source })?);
        }

        Ok(Self {
            kind,
            headers,
            records,
        })
    }

    pub(crate) fn read(
        kind: TableKind,
        path: &Path,
        opts: &SourceOptions,
    ) -> Result<Self, SourceError> {
        let bytes = fs::read(path).map_err(|source| SourceError::Io {
            table: kind.as_str(),
            source,
        })?;
        let (text, used_encoding, had_errors) = opts.encoding.decode(&bytes);
        if had_errors {
            warn!(
                component = "source",
                event = "source.decode.replaced",
                table = kind.as_str(),
                path = %path.display(),
                encoding = used_encoding.name()
            );
        }

        let table = Self::parse(kind, &text, opts)?;
        info!(
            component = "source",
            event = "source.table.loaded",
            table = kind.as_str(),
            path = %path.display(),
            encoding = used_encoding.name(),
            rows = table.records.len()
        );
        Ok(table)
    }

    pub(crate) fn column(&self, name: &'static str) -> Result<usize, SourceError> {
        self.headers
            .iter()
            .position(|header| header.trim_start_matches('\u{feff}').trim() == name)
            .ok_or(SourceError::MissingColumn {
                table: self.kind.as_str(),
                column: name,
            })
    }

    pub(crate) fn records(&self) -> &[StringRecord] {
        &self.records
    }
}

pub(crate) fn cell(record: &StringRecord, idx: usize) -> Option<String> {
    let raw = record.get(idx)?;
    if is_null_marker(raw) {
        None
    } else {
        Some(raw.to_string())
    }
}

fn is_null_marker(raw: &str) -> bool {
    let trimmed = raw.trim();
    trimmed.is_empty() || NULL_MARKERS.contains(&trimmed)
}

pub fn read_basket_table(
    path: &Path,
    opts: &SourceOptions,
) -> Result<Vec<RawBasketRecord>, SourceError> {
    basket_records(&RawTable::read(TableKind::Basket, path, opts)?)
}

pub fn read_customer_table(
    path: &Path,
    opts: &SourceOptions,
) -> Result<Vec<RawCustomerRecord>, SourceError> {
    customer_records(&RawTable::read(TableKind::Customer, path, opts)?)
}

pub fn parse_basket_table(
    text: &str,
    opts: &SourceOptions,
) -> Result<Vec<RawBasketRecord>, SourceError> {
    basket_records(&RawTable::parse(TableKind::Basket, text, opts)?)
}

pub fn parse_customer_table(
    text: &str,
    opts: &SourceOptions,
) -> Result<Vec<RawCustomerRecord>, SourceError> {
    customer_records(&RawTable::parse(TableKind::Customer, text, opts)?)
}

fn basket_records(table: &RawTable) -> Result<Vec<RawBasketRecord>, SourceError> {
    let [id_idx, date_idx, count_idx, product_idx] = column_indexes(table, BASKET_COLUMNS)?;

    Ok(table
        .records()
        .iter()
        .map(|record| RawBasketRecord {
            customer_id: record.get(id_idx).unwrap_or_default().to_string(),
            basket_date: cell(record, date_idx),
            basket_count: cell(record, count_idx),
            product_id: cell(record, product_idx).unwrap_or_default(),
        })
        .collect())
}

fn customer_records(table: &RawTable) -> Result<Vec<RawCustomerRecord>, SourceError> {
    let [id_idx, age_idx, tenure_idx, sex_idx] = column_indexes(table, CUSTOMER_COLUMNS)?;

    Ok(table
        .records()
        .iter()
        .map(|record| RawCustomerRecord {
            customer_id: record.get(id_idx).unwrap_or_default().to_string(),
            customer_age: cell(record, age_idx),
            tenure: cell(record, tenure_idx),
            sex: cell(record, sex_idx),
        })
        .collect())
}

fn column_indexes<const N: usize>(
    table: &RawTable,
    columns: [&'static str; N],
) -> Result<[usize; N], SourceError> {
    let mut out = [0usize; N];
    for (slot, column) in out.iter_mut().zip(columns) {
        *slot = table.column(column)?;
    }
    Ok(out)
}

/// Resolves a WHATWG encoding label such as `utf-8` or `latin1`.
pub fn encoding_for_label(label: &str) -> Option<&'static Encoding> {
    Encoding::for_label(label.trim().as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use encoding_rs::WINDOWS_1252;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn basket_columns_are_located_by_name_in_any_order() {
        let text = "product_id,basket_count,extra,basket_date,customer_id\np1,3,x,2023-01-01, 7 \n";
        let rows = parse_basket_table(text, &SourceOptions::default()).unwrap();

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].customer_id, " 7 ");
        assert_eq!(rows[0].basket_date.as_deref(), Some("2023-01-01"));
        assert_eq!(rows[0].basket_count.as_deref(), Some("3"));
        assert_eq!(rows[0].product_id, "p1");
    }

    #[test]
    fn missing_column_names_table_and_column() {
        let text = "customer_id,customer_age,sex\n1,30,M\n";
        let err = parse_customer_table(text, &SourceOptions::default()).unwrap_err();

        match err {
            SourceError::MissingColumn { table, column } => {
                assert_eq!(table, "customer");
                assert_eq!(column, "tenure");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn null_markers_and_short_rows_become_missing_cells() {
        let text = "customer_id,customer_age,tenure,sex\n1,NA,,null\n2\n";
        let rows = parse_customer_table(text, &SourceOptions::default()).unwrap();

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].customer_age, None);
        assert_eq!(rows[0].tenure, None);
        assert_eq!(rows[0].sex, None);
        assert_eq!(rows[1].customer_id, "2");
        assert_eq!(rows[1].sex, None);
    }

    #[test]
    fn custom_delimiter_is_honored() {
        let opts = SourceOptions {
            delimiter: b';',
            ..SourceOptions::default()
        };
        let text = "customer_id;customer_age;tenure;sex\n1;30;5;male\n";
        let rows = parse_customer_table(text, &opts).unwrap();
        assert_eq!(rows[0].customer_age.as_deref(), Some("30"));
        assert_eq!(rows[0].sex.as_deref(), Some("male"));
    }

    #[test]
    fn latin1_file_is_decoded_with_configured_encoding() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"customer_id,customer_age,tenure,sex\nj\xfcrgen,41,3,M\n")
            .unwrap();
        let opts = SourceOptions {
            encoding: WINDOWS_1252,
            ..SourceOptions::default()
        };

        let rows = read_customer_table(file.path(), &opts).unwrap();
        assert_eq!(rows[0].customer_id, "jürgen");
    }

    #[test]
    fn missing_file_is_reported_as_io_error() {
        let err = read_basket_table(Path::new("does/not/exist.csv"), &SourceOptions::default())
            .unwrap_err();
        assert!(matches!(err, SourceError::Io { table: "basket", .. }));
    }

    #[test]
    fn encoding_labels_resolve() {
        assert_eq!(encoding_for_label("utf-8"), Some(UTF_8));
        assert_eq!(encoding_for_label(" latin1 "), Some(WINDOWS_1252));
        assert_eq!(encoding_for_label("klingon"), None);
    }
}
