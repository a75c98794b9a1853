use std::sync::Arc;

use basket_features::{
    dashboard_config_from_env, dashboard_router, init_logging, load_sales_dataset, log_app_bind,
    log_app_start, log_dataset_loaded, logging_config_from_env,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let logging_cfg = logging_config_from_env();
    init_logging(&logging_cfg)?;
    log_app_start("dashboard_server", &logging_cfg);

    let cfg = dashboard_config_from_env()?;
    let dataset = load_sales_dataset(&cfg.data_path, &cfg.source)?;
    log_dataset_loaded(&cfg.data_path, dataset.rows.len());

    let app = dashboard_router(Arc::new(dataset));
    let listener = tokio::net::TcpListener::bind(cfg.bind_addr).await?;
    let bound_addr = listener.local_addr()?;

    log_app_bind(bound_addr);
    axum::serve(listener, app).await?;

    Ok(())
}
