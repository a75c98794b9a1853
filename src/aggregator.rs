//! Per-customer summary statistics over basket lines.

use std::collections::{BTreeMap, HashSet};

use chrono::NaiveDate;
use tracing::info;

use crate::records::{AggregatedFeatures, EnrichedBasket};

#[derive(Debug, Default)]
struct CustomerAccumulator<'a> {
    dates: HashSet<NaiveDate>,
    products: HashSet<&'a str>,
    item_sum: f64,
    rows: u64,
    last_date: Option<NaiveDate>,
}

impl<'a> CustomerAccumulator<'a> {
    fn push(&mut self, row: &'a EnrichedBasket) {
        let basket = &row.basket;
        if let Some(date) = basket.basket_date {
            self.dates.insert(date);
            self.last_date = self.last_date.max(Some(date));
        }
        if !basket.product_id.is_empty() {
            self.products.insert(basket.product_id.as_str());
        }
        self.item_sum += basket.basket_count;
        self.rows += 1;
    }
}

/// Groups baskets by `customer_id`, one output row per customer ordered by id.
///
/// `days_since_last_basket` here is measured from the latest basket date in
/// the whole input, not from the configured reference date.
pub fn aggregate_features(baskets: &[EnrichedBasket]) -> Vec<AggregatedFeatures> {
    let mut groups: BTreeMap<&str, CustomerAccumulator<'_>> = BTreeMap::new();
    for row in baskets {
        groups
            .entry(row.basket.customer_id.as_str())
            .or_default()
            .push(row);
    }

    let global_max = latest_basket_date(baskets);
    let features: Vec<AggregatedFeatures> = groups
        .into_iter()
        .map(|(customer_id, acc)| AggregatedFeatures {
            customer_id: customer_id.to_string(),
            total_baskets: acc.dates.len() as u64,
            total_items: acc.item_sum,
            avg_basket_size: if acc.rows == 0 {
                0.0
            } else {
                acc.item_sum / acc.rows as f64
            },
            distinct_products: acc.products.len() as u64,
            last_basket_date: acc.last_date,
            days_since_last_basket: global_max
                .zip(acc.last_date)
                .map(|(max, last)| (max - last).num_days()),
        })
        .collect();

    info!(
        component = "aggregator",
        event = "aggregator.features.built",
        basket_rows = baskets.len(),
        customers = features.len(),
        global_max_date = ?global_max
    );

    features
}

pub fn latest_basket_date(baskets: &[EnrichedBasket]) -> Option<NaiveDate> {
    baskets.iter().filter_map(|row| row.basket.basket_date).max()
}
