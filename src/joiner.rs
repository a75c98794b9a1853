//! Left join of customers with their aggregated basket features.

use std::collections::{HashMap, HashSet};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::records::{AggregatedFeatures, CustomerFeatureRow, EnrichedCustomer, SEX_UNKNOWN};

/// Recency value for customers without any dated basket.
pub const NO_BASKET_SENTINEL: i64 = -1;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum JoinError {
    #[error("duplicate customer_id '{customer_id}' on the customer side of the join")]
    KeyCollision { customer_id: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinSummary {
    pub customers: u64,
    pub customers_with_baskets: u64,
    pub aggregates_without_customer: u64,
    /// Customers whose last basket is later than the reference date; their
    /// recency is clamped to 0.
    pub dated_after_reference: u64,
}

/// Joins every customer with its aggregate row, keeping customer order.
///
/// Customers without aggregates get zeroed counts and the `-1` recency
/// sentinel. Recency is recomputed against `reference_date`; a last basket
/// after that date counts as 0 days so `-1` keeps meaning "no basket".
pub fn join_features(
    customers: &[EnrichedCustomer],
    features: &[AggregatedFeatures],
    reference_date: NaiveDate,
) -> Result<(Vec<CustomerFeatureRow>, JoinSummary), JoinError> {
    let mut seen = HashSet::with_capacity(customers.len());
    for entry in customers {
        if !seen.insert(entry.customer.customer_id.as_str()) {
            return Err(JoinError::KeyCollision {
                customer_id: entry.customer.customer_id.clone(),
            });
        }
    }

    let by_id: HashMap<&str, &AggregatedFeatures> = features
        .iter()
        .map(|row| (row.customer_id.as_str(), row))
        .collect();

    let mut customers_with_baskets = 0u64;
    let mut dated_after_reference = 0u64;
    let rows: Vec<CustomerFeatureRow> = customers
        .iter()
        .map(|entry| {
            let customer = &entry.customer;
            let matched = by_id.get(customer.customer_id.as_str()).copied();
            if matched.is_some_and(|features| features.total_baskets > 0) {
                customers_with_baskets += 1;
            }

            let last_basket_date = matched.and_then(|features| features.last_basket_date);
            if last_basket_date.is_some_and(|last| last > reference_date) {
                dated_after_reference += 1;
            }
            CustomerFeatureRow {
                customer_id: customer.customer_id.clone(),
                customer_age: customer.customer_age.filter(|v| v.is_finite()),
                tenure: customer.tenure.filter(|v| v.is_finite()),
                sex: if customer.sex.is_empty() {
                    SEX_UNKNOWN.to_string()
                } else {
                    customer.sex.clone()
                },
                age_group: entry.age_group,
                tenure_group: entry.tenure_group,
                total_baskets: matched.map(|f| f.total_baskets).unwrap_or(0),
                total_items: matched.map(|f| zero_if_nan(f.total_items)).unwrap_or(0.0),
                avg_basket_size: matched
                    .map(|f| zero_if_nan(f.avg_basket_size))
                    .unwrap_or(0.0),
                distinct_products: matched.map(|f| f.distinct_products).unwrap_or(0),
                last_basket_date,
                days_since_last_basket: days_since(reference_date, last_basket_date),
            }
        })
        .collect();

    let aggregates_without_customer = features
        .iter()
        .filter(|row| !seen.contains(row.customer_id.as_str()))
        .count() as u64;

    let summary = JoinSummary {
        customers: customers.len() as u64,
        customers_with_baskets,
        aggregates_without_customer,
        dated_after_reference,
    };

    if dated_after_reference > 0 {
        warn!(
            component = "joiner",
            event = "joiner.recency.clamped",
            customers = dated_after_reference,
            reference_date = %reference_date
        );
    }

    info!(
        component = "joiner",
        event = "joiner.join.finish",
        customers = summary.customers,
        customers_with_baskets = summary.customers_with_baskets,
        aggregates_without_customer = summary.aggregates_without_customer,
        reference_date = %reference_date
    );

    Ok((rows, summary))
}

/// Whole days from `last` to `reference`; `-1` when there is no last date.
/// Dates after `reference` give 0.
pub fn days_since(reference: NaiveDate, last: Option<NaiveDate>) -> i64 {
    last.map(|date| (reference - date).num_days().max(0))
        .unwrap_or(NO_BASKET_SENTINEL)
}

fn zero_if_nan(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::{AgeGroup, CustomerRecord, TenureGroup};

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn customer(id: &str) -> EnrichedCustomer {
        EnrichedCustomer {
            customer: CustomerRecord {
                customer_id: id.to_string(),
                customer_age: Some(30.0),
                tenure: Some(5.0),
                sex: "M".to_string(),
            },
            age_group: AgeGroup::From25To34,
            tenure_group: TenureGroup::Neu,
        }
    }

    fn features(id: &str, last: Option<NaiveDate>) -> AggregatedFeatures {
        AggregatedFeatures {
            customer_id: id.to_string(),
            total_baskets: 2,
            total_items: 5.0,
            avg_basket_size: 2.5,
            distinct_products: 3,
            last_basket_date: last,
            days_since_last_basket: Some(0),
        }
    }

    #[test]
    fn reference_date_recency_overrides_preliminary_value() {
        let (rows, summary) = join_features(
            &[customer("1")],
            &[features("1", Some(date(2023, 6, 1)))],
            date(2023, 12, 31),
        )
        .unwrap();

        assert_eq!(rows[0].days_since_last_basket, 213);
        assert_eq!(rows[0].total_items, 5.0);
        assert_eq!(summary.customers_with_baskets, 1);
    }

    #[test]
    fn customers_without_baskets_get_zero_defaults() {
        let (rows, summary) = join_features(
            &[customer("1"), customer("2")],
            &[features("1", Some(date(2023, 1, 1))), features("9", None)],
            date(2023, 12, 31),
        )
        .unwrap();

        assert_eq!(rows.len(), 2);
        let lonely = &rows[1];
        assert_eq!(lonely.customer_id, "2");
        assert_eq!(lonely.total_baskets, 0);
        assert_eq!(lonely.total_items, 0.0);
        assert_eq!(lonely.avg_basket_size, 0.0);
        assert_eq!(lonely.distinct_products, 0);
        assert_eq!(lonely.last_basket_date, None);
        assert_eq!(lonely.days_since_last_basket, NO_BASKET_SENTINEL);
        assert_eq!(summary.aggregates_without_customer, 1);
    }

    #[test]
    fn duplicate_customer_ids_fail_fast() {
        let err = join_features(&[customer("1"), customer("1")], &[], date(2023, 12, 31))
            .unwrap_err();
        assert_eq!(
            err,
            JoinError::KeyCollision {
                customer_id: "1".to_string()
            }
        );
    }

    #[test]
    fn empty_sex_is_normalized_to_unknown() {
        let mut entry = customer("1");
        entry.customer.sex = String::new();
        let (rows, _) = join_features(&[entry], &[], date(2023, 12, 31)).unwrap();
        assert_eq!(rows[0].sex, "UNKNOWN");
    }

    #[test]
    fn days_since_handles_missing_dates() {
        assert_eq!(days_since(date(2023, 12, 31), None), -1);
        assert_eq!(days_since(date(2023, 12, 31), Some(date(2023, 12, 31))), 0);
    }

    #[test]
    fn baskets_after_reference_date_clamp_to_zero() {
        let (rows, summary) = join_features(
            &[customer("1"), customer("2"), customer("3")],
            &[
                features("1", Some(date(2024, 1, 1))),
                features("2", Some(date(2024, 2, 15))),
            ],
            date(2023, 12, 31),
        )
        .unwrap();

        assert_eq!(rows[0].days_since_last_basket, 0);
        assert_eq!(rows[1].days_since_last_basket, 0);
        assert_eq!(rows[2].days_since_last_basket, NO_BASKET_SENTINEL);
        assert_eq!(summary.dated_after_reference, 2);
        assert_eq!(days_since(date(2023, 12, 31), Some(date(2024, 1, 1))), 0);
    }
}
