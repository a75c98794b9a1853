//! Pipeline configuration read from `BASKET_ETL_*` environment variables.

use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;

use chrono::NaiveDate;
use thiserror::Error;

use crate::source::{encoding_for_label, SourceOptions};

/// As-of date used for recency when nothing else is configured.
pub const DEFAULT_REFERENCE_DATE: (i32, u32, u32) = (2023, 12, 31);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkKind {
    Csv,
    Sqlite,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    pub basket_path: PathBuf,
    pub customer_path: PathBuf,
    pub output_path: PathBuf,
    pub sink: SinkKind,
    pub output_delimiter: u8,
    pub reference_date: NaiveDate,
    pub source: SourceOptions,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let (year, month, day) = DEFAULT_REFERENCE_DATE;
        Self {
            basket_path: PathBuf::from("data/basket_details.csv"),
            customer_path: PathBuf::from("data/customer_details.csv"),
            output_path: PathBuf::from("customer_basket_ready.csv"),
            sink: SinkKind::Csv,
            output_delimiter: b',',
            reference_date: NaiveDate::from_ymd_opt(year, month, day).unwrap_or_default(),
            source: SourceOptions::default(),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{var} must be a single ASCII character, got '{value}'")]
    InvalidDelimiter { var: &'static str, value: String },
    #[error("{var} names an unknown encoding '{value}'")]
    UnknownEncoding { var: &'static str, value: String },
    #[error("{var} must be a YYYY-MM-DD date, got '{value}'")]
    InvalidDate { var: &'static str, value: String },
    #[error("{var} must be 'csv' or 'sqlite', got '{value}'")]
    InvalidSink { var: &'static str, value: String },
    #[error("{var} must be a socket address like 127.0.0.1:8050, got '{value}'")]
    InvalidAddr { var: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct DashboardConfig {
    pub data_path: PathBuf,
    pub bind_addr: SocketAddr,
    pub source: SourceOptions,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            data_path: PathBuf::from("Dashboard/gaming_sales_data.csv"),
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 8050)),
            source: SourceOptions {
                delimiter: b';',
                ..SourceOptions::default()
            },
        }
    }
}

pub fn pipeline_config_from_env() -> Result<PipelineConfig, ConfigError> {
    let mut config = PipelineConfig::default();

    if let Some(path) = non_empty_var("BASKET_ETL_BASKET_PATH") {
        config.basket_path = PathBuf::from(path);
    }
    if let Some(path) = non_empty_var("BASKET_ETL_CUSTOMER_PATH") {
        config.customer_path = PathBuf::from(path);
    }
    if let Some(path) = non_empty_var("BASKET_ETL_OUTPUT_PATH") {
        config.output_path = PathBuf::from(path);
    }
    if let Some(raw) = non_empty_var("BASKET_ETL_SINK") {
        config.sink = parse_sink_kind(&raw).ok_or(ConfigError::InvalidSink {
            var: "BASKET_ETL_SINK",
            value: raw,
        })?;
    }
    if let Some(raw) = non_empty_var("BASKET_ETL_REFERENCE_DATE") {
        config.reference_date = NaiveDate::parse_from_str(&raw, "%Y-%m-%d").map_err(|_| {
            ConfigError::InvalidDate {
                var: "BASKET_ETL_REFERENCE_DATE",
                value: raw.clone(),
            }
        })?;
    }
    if let Some(raw) = env::var("BASKET_ETL_DELIMITER").ok() {
        config.source.delimiter = parse_delimiter("BASKET_ETL_DELIMITER", &raw)?;
    }
    if let Some(raw) = env::var("BASKET_ETL_OUTPUT_DELIMITER").ok() {
        config.output_delimiter = parse_delimiter("BASKET_ETL_OUTPUT_DELIMITER", &raw)?;
    }
    if let Some(raw) = non_empty_var("BASKET_ETL_ENCODING") {
        config.source.encoding =
            encoding_for_label(&raw).ok_or(ConfigError::UnknownEncoding {
                var: "BASKET_ETL_ENCODING",
                value: raw,
            })?;
    }
    if let Some(format) = non_empty_var("BASKET_ETL_DATE_FORMAT") {
        config.source.date_format = Some(format);
    }

    Ok(config)
}

pub fn dashboard_config_from_env() -> Result<DashboardConfig, ConfigError> {
    let mut config = DashboardConfig::default();

    if let Some(path) = non_empty_var("SALES_DASHBOARD_DATA_PATH") {
        config.data_path = PathBuf::from(path);
    }
    if let Some(raw) = env::var("SALES_DASHBOARD_DELIMITER").ok() {
        config.source.delimiter = parse_delimiter("SALES_DASHBOARD_DELIMITER", &raw)?;
    }
    if let Some(raw) = non_empty_var("SALES_DASHBOARD_ADDR") {
        config.bind_addr = raw.parse().map_err(|_| ConfigError::InvalidAddr {
            var: "SALES_DASHBOARD_ADDR",
            value: raw.clone(),
        })?;
    }

    Ok(config)
}

/// Accepts a single ASCII character; `\t` and `tab` name the tab character.
pub fn parse_delimiter(var: &'static str, raw: &str) -> Result<u8, ConfigError> {
    if matches!(raw, "\\t" | "tab") {
        return Ok(b'\t');
    }

    let mut chars = raw.chars();
    match (chars.next(), chars.next()) {
        (Some(ch), None) if ch.is_ascii() => Ok(ch as u8),
        _ => Err(ConfigError::InvalidDelimiter {
            var,
            value: raw.to_string(),
        }),
    }
}

fn parse_sink_kind(raw: &str) -> Option<SinkKind> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "csv" => Some(SinkKind::Csv),
        "sqlite" => Some(SinkKind::Sqlite),
        _ => None,
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
