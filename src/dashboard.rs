//! Sales dashboard: dataset loading, filters, chart views and HTTP routes.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Arc;

use axum::{
    extract::{Query, State},
    response::{Html, IntoResponse},
    routing::get,
    Json, Router,
};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::cleaner::coerce_number;
use crate::source::{cell, RawTable, SourceError, SourceOptions, TableKind};

pub const TABLE_PAGE_SIZE: usize = 10;
pub const TOP_TITLES: usize = 10;

/// Everything except RFC 3986 unreserved characters is escaped in pager links.
const QUERY_VALUE_CHARSET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

pub const TABLE_HEADERS: [&str; 6] = ["Name", "Platform", "Year", "Genre", "Publisher", "Global_Sales"];

#[derive(Debug, Error)]
pub enum DashboardError {
    #[error("sales dataset error: {0}")]
    Source(#[from] SourceError),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SalesRecord {
    pub name: String,
    pub platform: String,
    pub year: Option<i32>,
    pub genre: String,
    pub publisher: Option<String>,
    pub global_sales: f64,
}

impl SalesRecord {
    pub fn to_cell_text_values(&self) -> Vec<String> {
        vec![
            self.name.clone(),
            self.platform.clone(),
            self.year.map(|y| y.to_string()).unwrap_or_else(|| "-".to_string()),
            self.genre.clone(),
            self.publisher.clone().unwrap_or_else(|| "-".to_string()),
            format!("{:.2}", self.global_sales),
        ]
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SalesDataset {
    pub rows: Vec<SalesRecord>,
}

impl SalesDataset {
    pub fn filter_options(&self) -> FilterOptions {
        let years: BTreeSet<i32> = self.rows.iter().filter_map(|r| r.year).collect();
        let genres: BTreeSet<&str> = self
            .rows
            .iter()
            .map(|r| r.genre.as_str())
            .filter(|g| !g.is_empty())
            .collect();
        let platforms: BTreeSet<&str> = self
            .rows
            .iter()
            .map(|r| r.platform.as_str())
            .filter(|p| !p.is_empty())
            .collect();

        FilterOptions {
            years: years.into_iter().collect(),
            genres: genres.into_iter().map(str::to_string).collect(),
            platforms: platforms.into_iter().map(str::to_string).collect(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterOptions {
    pub years: Vec<i32>,
    pub genres: Vec<String>,
    pub platforms: Vec<String>,
}

/// Empty lists leave the dimension unrestricted; filters combine with AND.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DashboardFilters {
    pub years: Vec<i32>,
    pub genres: Vec<String>,
    pub platforms: Vec<String>,
}

impl DashboardFilters {
    pub fn matches(&self, row: &SalesRecord) -> bool {
        let year_ok = self.years.is_empty() || row.year.is_some_and(|y| self.years.contains(&y));
        let genre_ok = self.genres.is_empty() || self.genres.contains(&row.genre);
        let platform_ok = self.platforms.is_empty() || self.platforms.contains(&row.platform);
        year_ok && genre_ok && platform_ok
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DashboardQuery {
    pub filters: DashboardFilters,
    /// 1-based table page.
    pub page: usize,
}

impl DashboardQuery {
    /// Builds a query from decoded `key=value` pairs. Keys may repeat and
    /// values may be comma separated; unparseable years are ignored.
    pub fn from_pairs(pairs: &[(String, String)]) -> Self {
        let mut query = DashboardQuery {
            page: 1,
            ..DashboardQuery::default()
        };

        for (key, value) in pairs {
            let parts = value
                .split(',')
                .map(str::trim)
                .filter(|part| !part.is_empty());
            match key.as_str() {
                "year" => query
                    .filters
                    .years
                    .extend(parts.filter_map(|p| p.parse::<i32>().ok())),
                "genre" => query.filters.genres.extend(parts.map(str::to_string)),
                "platform" => query.filters.platforms.extend(parts.map(str::to_string)),
                "page" => {
                    if let Ok(page) = value.trim().parse::<usize>() {
                        query.page = page.max(1);
                    }
                }
                _ => {}
            }
        }

        query
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryShare {
    pub label: String,
    pub sales: f64,
    pub share_pct: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct YearTotal {
    pub year: i32,
    pub sales: f64,
}

/// Summed sales per genre (rows) and platform (columns), zero-filled.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Heatmap {
    pub genres: Vec<String>,
    pub platforms: Vec<String>,
    pub cells: Vec<Vec<f64>>,
}

impl Heatmap {
    pub fn max_cell(&self) -> f64 {
        self.cells
            .iter()
            .flatten()
            .copied()
            .fold(0.0, f64::max)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DashboardSnapshot {
    pub filters: DashboardFilters,
    pub options: FilterOptions,
    pub matched_rows: usize,
    pub total_sales: f64,
    pub genre_shares: Vec<CategoryShare>,
    pub platform_shares: Vec<CategoryShare>,
    pub sales_by_year: Vec<YearTotal>,
    pub heatmap: Heatmap,
    pub top_titles: Vec<SalesRecord>,
    pub page: usize,
    pub page_count: usize,
    pub rows: Vec<SalesRecord>,
}

pub fn parse_sales_dataset(text: &str, opts: &SourceOptions) -> Result<SalesDataset, DashboardError> {
    sales_records(&RawTable::parse(TableKind::Sales, text, opts)?)
}

pub fn load_sales_dataset(path: &Path, opts: &SourceOptions) -> Result<SalesDataset, DashboardError> {
    sales_records(&RawTable::read(TableKind::Sales, path, opts)?)
}

fn sales_records(table: &RawTable) -> Result<SalesDataset, DashboardError> {
    let name_idx = table.column("Name")?;
    let platform_idx = table.column("Platform")?;
    let year_idx = table.column("Year")?;
    let genre_idx = table.column("Genre")?;
    let sales_idx = table.column("Global_Sales")?;
    let publisher_idx = table.column("Publisher")?;

    let rows = table
        .records()
        .iter()
        .map(|record| SalesRecord {
            name: cell(record, name_idx).unwrap_or_default(),
            platform: cell(record, platform_idx).unwrap_or_default(),
            year: coerce_number(cell(record, year_idx).as_deref())
                .filter(|y| y.fract() == 0.0)
                .map(|y| y as i32),
            genre: cell(record, genre_idx).unwrap_or_default(),
            publisher: cell(record, publisher_idx),
            global_sales: coerce_number(cell(record, sales_idx).as_deref()).unwrap_or(0.0),
        })
        .collect();

    Ok(SalesDataset { rows })
}

pub fn apply_filters(rows: &[SalesRecord], filters: &DashboardFilters) -> Vec<SalesRecord> {
    rows.iter()
        .filter(|row| filters.matches(row))
        .cloned()
        .collect()
}

pub fn build_snapshot(dataset: &SalesDataset, query: &DashboardQuery) -> DashboardSnapshot {
    let filtered = apply_filters(&dataset.rows, &query.filters);
    let total_sales = filtered.iter().fold(0.0, |acc, r| acc + r.global_sales);

    let page_count = filtered.len().div_ceil(TABLE_PAGE_SIZE).max(1);
    let page = query.page.clamp(1, page_count);
    let rows = filtered
        .iter()
        .skip((page - 1) * TABLE_PAGE_SIZE)
        .take(TABLE_PAGE_SIZE)
        .cloned()
        .collect();

    DashboardSnapshot {
        filters: query.filters.clone(),
        options: dataset.filter_options(),
        matched_rows: filtered.len(),
        total_sales,
        genre_shares: category_shares(&filtered, |r| &r.genre),
        platform_shares: category_shares(&filtered, |r| &r.platform),
        sales_by_year: sales_by_year(&filtered),
        heatmap: heatmap(&filtered),
        top_titles: top_titles(&filtered, TOP_TITLES),
        page,
        page_count,
        rows,
    }
}

/// Shares ordered by sales descending, ties by label.
pub fn category_shares(
    rows: &[SalesRecord],
    key: impl Fn(&SalesRecord) -> &String,
) -> Vec<CategoryShare> {
    let mut totals: BTreeMap<&str, f64> = BTreeMap::new();
    for row in rows {
        *totals.entry(key(row).as_str()).or_default() += row.global_sales;
    }
    let total = totals.values().fold(0.0, |acc, v| acc + v);

    let mut shares: Vec<CategoryShare> = totals
        .into_iter()
        .map(|(label, sales)| CategoryShare {
            label: label.to_string(),
            sales,
            share_pct: if total > 0.0 { sales / total * 100.0 } else { 0.0 },
        })
        .collect();
    shares.sort_by(|a, b| b.sales.total_cmp(&a.sales).then_with(|| a.label.cmp(&b.label)));
    shares
}

pub fn sales_by_year(rows: &[SalesRecord]) -> Vec<YearTotal> {
    let mut totals: BTreeMap<i32, f64> = BTreeMap::new();
    for row in rows {
        if let Some(year) = row.year {
            *totals.entry(year).or_default() += row.global_sales;
        }
    }
    totals
        .into_iter()
        .map(|(year, sales)| YearTotal { year, sales })
        .collect()
}

pub fn heatmap(rows: &[SalesRecord]) -> Heatmap {
    let genres: Vec<String> = rows
        .iter()
        .map(|r| r.genre.clone())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    let platforms: Vec<String> = rows
        .iter()
        .map(|r| r.platform.clone())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();

    let mut cells = vec![vec![0.0; platforms.len()]; genres.len()];
    for row in rows {
        let g = genres.binary_search(&row.genre);
        let p = platforms.binary_search(&row.platform);
        if let (Ok(g), Ok(p)) = (g, p) {
            cells[g][p] += row.global_sales;
        }
    }

    Heatmap {
        genres,
        platforms,
        cells,
    }
}

pub fn top_titles(rows: &[SalesRecord], limit: usize) -> Vec<SalesRecord> {
    let mut sorted = rows.to_vec();
    sorted.sort_by(|a, b| b.global_sales.total_cmp(&a.global_sales));
    sorted.truncate(limit);
    sorted
}

pub fn dashboard_router(dataset: Arc<SalesDataset>) -> Router {
    Router::new()
        .route("/dashboard", get(get_dashboard_html))
        .route("/dashboard/data", get(get_dashboard_data))
        .with_state(DashboardAppState { dataset })
}

pub fn render_dashboard_html(snapshot: &DashboardSnapshot) -> String {
    let mut out = String::new();
    out.push_str("<!DOCTYPE html><html><head><meta charset=\"utf-8\">\n");
    out.push_str("<meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">\n");
    out.push_str("<title>Gaming Sales Dashboard</title>\n");
    out.push_str("<style>:root{--bg:#f4f1ea;--card:#fff;--ink:#1b2329;--muted:#5f6a73;--line:#d7dce1;--head:#1d3b4a;--bar:#2f7d95;--bar2:#d9822b}*{box-sizing:border-box}body{margin:0;color:var(--ink);font-family:\"Avenir Next\",\"Segoe UI\",sans-serif;background:var(--bg)}.shell{max-width:1400px;margin:0 auto;padding:20px;display:grid;grid-template-columns:30% 1fr;gap:18px}.hero{grid-column:1/-1;background:var(--head);color:#f2f7f9;border-radius:14px;padding:16px 20px}.hero h1{margin:0 0 6px;font-size:1.5rem}.hero-meta{display:flex;gap:16px;flex-wrap:wrap;font-size:.9rem;color:#d3e3ea}.card{background:var(--card);border:1px solid var(--line);border-radius:14px;padding:14px 16px;box-shadow:0 8px 22px rgba(26,35,42,.08)}.card h2{margin:0 0 10px;font-size:1rem}.filters label{display:block;margin:10px 0 4px;font-weight:700;font-size:.85rem}.filters select{width:100%;min-height:110px}.bar-row{display:grid;grid-template-columns:120px 1fr 70px;gap:8px;align-items:center;font-size:.8rem;margin:3px 0}.bar{height:12px;background:var(--bar);border-radius:6px}.bar.alt{background:var(--bar2)}.heatmap td{width:40px;height:24px;text-align:center;font-size:.7rem}.full{grid-column:1/-1}table{border-collapse:collapse;width:100%}th{background:var(--head);color:#fff;font-size:.78rem;padding:8px;text-align:left}td{border-bottom:1px solid var(--line);padding:6px 8px;font-size:.82rem}.pager a{margin-right:8px}</style>\n");
    out.push_str("</head><body><main class=\"shell\">\n");
    out.push_str("<section class=\"hero\"><h1>Gaming Sales Dashboard</h1><div class=\"hero-meta\">");
    out.push_str(&format!("<span>Rows: {}</span>", snapshot.matched_rows));
    out.push_str(&format!(
        "<span>Global sales: {:.2}</span>",
        snapshot.total_sales
    ));
    out.push_str("</div></section>\n");

    render_filters(&mut out, snapshot);

    out.push_str("<section class=\"charts\">\n");
    render_share_chart(&mut out, "Sales share by genre", "pie-genre", &snapshot.genre_shares, "");
    render_share_chart(
        &mut out,
        "Sales share by platform",
        "pie-platform",
        &snapshot.platform_shares,
        " alt",
    );
    render_year_chart(&mut out, &snapshot.sales_by_year);
    render_heatmap(&mut out, &snapshot.heatmap);
    out.push_str("</section>\n");

    render_table(&mut out, snapshot);

    out.push_str("<script>const form=document.getElementById('filters-form');form.addEventListener('change',()=>{const p=form.querySelector('input[name=page]');if(p){p.value='1';}form.submit();});</script>\n");
    out.push_str("</main></body></html>\n");
    out
}

fn render_filters(out: &mut String, snapshot: &DashboardSnapshot) {
    out.push_str("<section class=\"card filters\"><h2>Filters</h2>");
    out.push_str("<form id=\"filters-form\" method=\"get\" action=\"/dashboard\">");
    out.push_str("<input type=\"hidden\" name=\"page\" value=\"1\">");

    let years: Vec<String> = snapshot.options.years.iter().map(|y| y.to_string()).collect();
    let selected_years: Vec<String> = snapshot.filters.years.iter().map(|y| y.to_string()).collect();
    render_select(out, "Year", "year", &years, &selected_years);
    render_select(
        out,
        "Genre",
        "genre",
        &snapshot.options.genres,
        &snapshot.filters.genres,
    );
    render_select(
        out,
        "Platform",
        "platform",
        &snapshot.options.platforms,
        &snapshot.filters.platforms,
    );

    out.push_str("<noscript><button type=\"submit\">Apply</button></noscript>");
    out.push_str("</form></section>\n");
}

fn render_select(out: &mut String, label: &str, name: &str, options: &[String], selected: &[String]) {
    out.push_str(&format!(
        "<label for=\"{name}-filter\">{}</label><select id=\"{name}-filter\" name=\"{name}\" multiple>",
        escape_html(label)
    ));
    for option in options {
        let flag = if selected.contains(option) {
            " selected"
        } else {
            ""
        };
        let value = escape_html(option);
        out.push_str(&format!("<option value=\"{value}\"{flag}>{value}</option>"));
    }
    out.push_str("</select>");
}

fn render_share_chart(
    out: &mut String,
    title: &str,
    id: &str,
    shares: &[CategoryShare],
    bar_class: &str,
) {
    out.push_str(&format!(
        "<div class=\"card\" id=\"{id}\"><h2>{}</h2>",
        escape_html(title)
    ));
    if shares.is_empty() {
        out.push_str("<p>No data for the current filters.</p>");
    }
    for share in shares {
        out.push_str(&format!(
            "<div class=\"bar-row\"><span>{}</span><div class=\"bar{bar_class}\" style=\"width:{:.1}%\"></div><span>{:.1}%</span></div>",
            escape_html(&share.label),
            share.share_pct,
            share.share_pct
        ));
    }
    out.push_str("</div>\n");
}

fn render_year_chart(out: &mut String, totals: &[YearTotal]) {
    const WIDTH: f64 = 600.0;
    const HEIGHT: f64 = 180.0;

    out.push_str("<div class=\"card\" id=\"sales-time\"><h2>Global sales per year</h2>");
    if totals.is_empty() {
        out.push_str("<p>No data for the current filters.</p></div>\n");
        return;
    }

    let max_sales = totals.iter().map(|t| t.sales).fold(0.0, f64::max);
    let step = if totals.len() > 1 {
        WIDTH / (totals.len() - 1) as f64
    } else {
        0.0
    };
    let points: Vec<String> = totals
        .iter()
        .enumerate()
        .map(|(idx, total)| {
            let x = idx as f64 * step;
            let y = if max_sales > 0.0 {
                HEIGHT - total.sales / max_sales * HEIGHT
            } else {
                HEIGHT
            };
            format!("{x:.1},{y:.1}")
        })
        .collect();

    out.push_str(&format!(
        "<svg viewBox=\"-10 -10 {} {}\" width=\"100%\" role=\"img\"><polyline fill=\"none\" stroke=\"#2f7d95\" stroke-width=\"2\" points=\"{}\"/></svg>",
        WIDTH + 20.0,
        HEIGHT + 20.0,
        points.join(" ")
    ));
    out.push_str(&format!(
        "<div class=\"hero-meta\" style=\"color:var(--muted)\"><span>{}</span><span>{}</span></div>",
        totals[0].year,
        totals[totals.len() - 1].year
    ));
    out.push_str("</div>\n");
}

fn render_heatmap(out: &mut String, heatmap: &Heatmap) {
    out.push_str("<div class=\"card\" id=\"heatmap\"><h2>Heatmap: genre vs. platform</h2>");
    out.push_str("<table class=\"heatmap\"><thead><tr><th></th>");
    for platform in &heatmap.platforms {
        out.push_str(&format!("<th>{}</th>", escape_html(platform)));
    }
    out.push_str("</tr></thead><tbody>");

    let max_cell = heatmap.max_cell();
    for (genre, row) in heatmap.genres.iter().zip(&heatmap.cells) {
        out.push_str(&format!("<tr><th>{}</th>", escape_html(genre)));
        for value in row {
            let alpha = if max_cell > 0.0 { value / max_cell } else { 0.0 };
            out.push_str(&format!(
                "<td style=\"background:rgba(47,125,149,{alpha:.2})\">{value:.1}</td>"
            ));
        }
        out.push_str("</tr>");
    }
    out.push_str("</tbody></table></div>\n");
}

fn render_table(out: &mut String, snapshot: &DashboardSnapshot) {
    out.push_str("<section class=\"card full\"><h2>Data table</h2>");
    out.push_str("<table id=\"datatable\"><thead><tr>");
    for header in TABLE_HEADERS {
        out.push_str("<th>");
        out.push_str(&escape_html(header));
        out.push_str("</th>");
    }
    out.push_str("</tr></thead><tbody>\n");

    for (idx, row) in snapshot.rows.iter().enumerate() {
        out.push_str(&format!("<tr data-row=\"{idx}\">"));
        for value in row.to_cell_text_values() {
            out.push_str("<td>");
            out.push_str(&escape_html(&value));
            out.push_str("</td>");
        }
        out.push_str("</tr>\n");
    }
    out.push_str("</tbody></table>");

    out.push_str(&format!(
        "<div class=\"pager\">Page {} of {} ",
        snapshot.page, snapshot.page_count
    ));
    let base = filter_query_string(&snapshot.filters);
    if snapshot.page > 1 {
        out.push_str(&format!(
            "<a href=\"/dashboard?{base}page={}\">Previous</a>",
            snapshot.page - 1
        ));
    }
    if snapshot.page < snapshot.page_count {
        out.push_str(&format!(
            "<a href=\"/dashboard?{base}page={}\">Next</a>",
            snapshot.page + 1
        ));
    }
    out.push_str("</div></section>\n");
}

fn filter_query_string(filters: &DashboardFilters) -> String {
    let mut out = String::new();
    for year in &filters.years {
        out.push_str(&format!("year={year}&amp;"));
    }
    for genre in &filters.genres {
        out.push_str(&format!("genre={}&amp;", escape_html(&encode_query_value(genre))));
    }
    for platform in &filters.platforms {
        out.push_str(&format!(
            "platform={}&amp;",
            escape_html(&encode_query_value(platform))
        ));
    }
    out
}

fn encode_query_value(value: &str) -> String {
    utf8_percent_encode(value, QUERY_VALUE_CHARSET).to_string()
}

fn escape_html(input: &str) -> String {
    input
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}

#[derive(Clone)]
struct DashboardAppState {
    dataset: Arc<SalesDataset>,
}

fn snapshot_for(state: &DashboardAppState, pairs: &[(String, String)], route: &'static str) -> DashboardSnapshot {
    let query = DashboardQuery::from_pairs(pairs);
    let snapshot = build_snapshot(&state.dataset, &query);
    info!(
        component = "dashboard",
        event = "http.dashboard.request",
        route,
        years = query.filters.years.len(),
        genres = query.filters.genres.len(),
        platforms = query.filters.platforms.len(),
        matched_rows = snapshot.matched_rows,
        page = snapshot.page
    );
    snapshot
}

async fn get_dashboard_html(
    State(state): State<DashboardAppState>,
    Query(pairs): Query<Vec<(String, String)>>,
) -> impl IntoResponse {
    let snapshot = snapshot_for(&state, &pairs, "/dashboard");
    Html(render_dashboard_html(&snapshot))
}

async fn get_dashboard_data(
    State(state): State<DashboardAppState>,
    Query(pairs): Query<Vec<(String, String)>>,
) -> impl IntoResponse {
    Json(snapshot_for(&state, &pairs, "/dashboard/data"))
}
