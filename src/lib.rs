//! Customer basket feature pipeline.
//!
//! Current implemented scope:
//! - Extract: schema-checked basket and customer tables
//! - Transform: cleaning, enrichment, per-customer aggregation and the customer join
//! - Load: CSV or SQLite sinks with a fingerprinted run report
//! - Sales dashboard over the gaming sales dataset

mod aggregator;
mod cleaner;
mod config;
mod dashboard;
mod enricher;
mod joiner;
mod observability;
mod pipeline;
mod records;
mod sink;
mod source;
#[cfg(test)]
mod test_support;

pub use aggregator::{aggregate_features, latest_basket_date};
pub use cleaner::{
    clean_baskets, clean_customers, coerce_number, harmonize_sex, median, parse_date,
    CleanReport, CleanedBaskets, CleanedCustomers,
};
pub use config::{
    dashboard_config_from_env, parse_delimiter, pipeline_config_from_env, ConfigError,
    DashboardConfig, PipelineConfig, SinkKind, DEFAULT_REFERENCE_DATE,
};
pub use dashboard::{
    apply_filters, build_snapshot, category_shares, dashboard_router, heatmap,
    load_sales_dataset, parse_sales_dataset, render_dashboard_html, sales_by_year, top_titles,
    CategoryShare, DashboardError, DashboardFilters, DashboardQuery, DashboardSnapshot,
    FilterOptions, Heatmap, SalesDataset, SalesRecord, YearTotal, TABLE_HEADERS,
    TABLE_PAGE_SIZE, TOP_TITLES,
};
pub use enricher::{
    age_group, enrich_baskets, enrich_customers, tenure_group, AGE_BOUNDARIES,
    TENURE_BOUNDARIES,
};
pub use joiner::{days_since, join_features, JoinError, JoinSummary, NO_BASKET_SENTINEL};
pub use observability::{
    init_logging, log_app_bind, log_app_start, log_dataset_loaded, logging_config_from_env,
    LogFormat, LoggingConfig, LoggingInitError, LOG_FORMAT_VAR, LOG_LEVEL_VAR, LOG_TARGET_VAR,
};
pub use pipeline::{
    run_pipeline, run_pipeline_with_sink, transform, PipelineError, PipelineReport,
    TransformOutput,
};
pub use records::{
    normalize_customer_id, AgeGroup, AggregatedFeatures, BasketRecord, CustomerFeatureRow,
    CustomerRecord, EnrichedBasket, EnrichedCustomer, RawBasketRecord, RawCustomerRecord,
    TenureGroup, OUTPUT_COLUMNS, SEX_FEMALE, SEX_MALE, SEX_UNKNOWN, UNBUCKETED_LABEL,
};
pub use sink::{
    output_fingerprint, render_csv, CsvSink, SinkError, SqliteSink, TableSink, CANONICAL_DELIMITER,
    SQLITE_TABLE,
};
pub use source::{
    encoding_for_label, parse_basket_table, parse_customer_table, read_basket_table,
    read_customer_table, SourceError, SourceOptions, TableKind, BASKET_COLUMNS,
    CUSTOMER_COLUMNS,
};
