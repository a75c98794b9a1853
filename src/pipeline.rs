//! End-to-end run: extract, transform, load.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, info};

use crate::aggregator::aggregate_features;
use crate::cleaner::{clean_baskets, clean_customers, CleanReport};
use crate::config::{ConfigError, PipelineConfig, SinkKind};
use crate::enricher::{enrich_baskets, enrich_customers};
use crate::joiner::{join_features, JoinError, JoinSummary};
use crate::records::{AggregatedFeatures, CustomerFeatureRow, RawBasketRecord, RawCustomerRecord};
use crate::sink::{
    output_fingerprint, render_csv, CsvSink, SinkError, SqliteSink, TableSink, CANONICAL_DELIMITER,
};
use crate::source::{read_basket_table, read_customer_table, SourceError};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("source error: {0}")]
    Source(#[from] SourceError),
    #[error("join error: {0}")]
    Join(#[from] JoinError),
    #[error("sink error: {0}")]
    Sink(#[from] SinkError),
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransformOutput {
    pub rows: Vec<CustomerFeatureRow>,
    pub features: Vec<AggregatedFeatures>,
    pub customer_report: CleanReport,
    pub basket_report: CleanReport,
    pub join: JoinSummary,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineReport {
    pub reference_date: NaiveDate,
    pub customer_report: CleanReport,
    pub basket_report: CleanReport,
    pub join: JoinSummary,
    pub output_rows: u64,
    pub destination: String,
    /// SHA-256 of the canonical comma-delimited CSV rendering of the output
    /// rows; identical across sinks and output delimiters.
    pub fingerprint: String,
}

/// Pure transform stage: each step borrows its input and returns new rows.
pub fn transform(
    customers: &[RawCustomerRecord],
    baskets: &[RawBasketRecord],
    reference_date: NaiveDate,
    date_format: Option<&str>,
) -> Result<TransformOutput, PipelineError> {
    let cleaned_customers = clean_customers(customers);
    let cleaned_baskets = clean_baskets(baskets, date_format);

    let enriched_baskets = enrich_baskets(&cleaned_baskets.records);
    let enriched_customers = enrich_customers(&cleaned_customers.records);
    let features = aggregate_features(&enriched_baskets);
    let (rows, join) = join_features(&enriched_customers, &features, reference_date)?;

    Ok(TransformOutput {
        rows,
        features,
        customer_report: cleaned_customers.report,
        basket_report: cleaned_baskets.report,
        join,
    })
}

pub fn run_pipeline(cfg: &PipelineConfig) -> Result<PipelineReport, PipelineError> {
    match cfg.sink {
        SinkKind::Csv => {
            let sink = CsvSink::new(cfg.output_path.clone(), cfg.output_delimiter);
            run_pipeline_with_sink(cfg, &sink)
        }
        SinkKind::Sqlite => {
            let sink = SqliteSink {
                path: cfg.output_path.clone(),
            };
            run_pipeline_with_sink(cfg, &sink)
        }
    }
}

pub fn run_pipeline_with_sink(
    cfg: &PipelineConfig,
    sink: &dyn TableSink,
) -> Result<PipelineReport, PipelineError> {
    info!(
        component = "pipeline",
        event = "pipeline.run.start",
        basket_path = %cfg.basket_path.display(),
        customer_path = %cfg.customer_path.display(),
        destination = %sink.describe(),
        reference_date = %cfg.reference_date
    );

    let result = execute(cfg, sink);
    if let Err(err) = &result {
        error!(
            component = "pipeline",
            event = "pipeline.run.error",
            error = %err
        );
    }
    result
}

fn execute(cfg: &PipelineConfig, sink: &dyn TableSink) -> Result<PipelineReport, PipelineError> {
    let baskets = read_basket_table(&cfg.basket_path, &cfg.source)?;
    let customers = read_customer_table(&cfg.customer_path, &cfg.source)?;

    let output = transform(
        &customers,
        &baskets,
        cfg.reference_date,
        cfg.source.date_format.as_deref(),
    )?;

    let canonical = render_csv(&output.rows, CANONICAL_DELIMITER)?;
    sink.write_rows(&output.rows)?;

    let report = PipelineReport {
        reference_date: cfg.reference_date,
        customer_report: output.customer_report,
        basket_report: output.basket_report,
        join: output.join,
        output_rows: output.rows.len() as u64,
        destination: sink.describe(),
        fingerprint: output_fingerprint(&canonical),
    };

    info!(
        component = "pipeline",
        event = "pipeline.run.finish",
        output_rows = report.output_rows,
        customers_with_baskets = report.join.customers_with_baskets,
        fingerprint = %report.fingerprint
    );

    Ok(report)
}
