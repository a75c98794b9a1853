//! Calendar parts for baskets and fixed-boundary buckets for customers.

use chrono::Datelike;

use crate::records::{
    AgeGroup, BasketRecord, CustomerRecord, EnrichedBasket, EnrichedCustomer, TenureGroup,
};

pub const AGE_BOUNDARIES: [f64; 5] = [0.0, 24.0, 34.0, 44.0, 120.0];
pub const TENURE_BOUNDARIES: [f64; 4] = [0.0, 12.0, 36.0, 120.0];

const AGE_LABELS: [AgeGroup; 4] = [
    AgeGroup::Under25,
    AgeGroup::From25To34,
    AgeGroup::From35To44,
    AgeGroup::From45,
];

const TENURE_LABELS: [TenureGroup; 3] = [TenureGroup::Neu, TenureGroup::Mittel, TenureGroup::Lang];

pub fn enrich_baskets(baskets: &[BasketRecord]) -> Vec<EnrichedBasket> {
    baskets
        .iter()
        .map(|basket| EnrichedBasket {
            basket_year: basket.basket_date.map(|date| date.year()),
            basket_month: basket.basket_date.map(|date| date.month()),
            basket_weekday: basket
                .basket_date
                .map(|date| date.weekday().num_days_from_monday()),
            basket: basket.clone(),
        })
        .collect()
}

pub fn enrich_customers(customers: &[CustomerRecord]) -> Vec<EnrichedCustomer> {
    customers
        .iter()
        .map(|customer| EnrichedCustomer {
            age_group: age_group(customer.customer_age),
            tenure_group: tenure_group(customer.tenure),
            customer: customer.clone(),
        })
        .collect()
}

pub fn age_group(age: Option<f64>) -> AgeGroup {
    age.and_then(|value| bucket_index(value, &AGE_BOUNDARIES))
        .map(|idx| AGE_LABELS[idx])
        .unwrap_or(AgeGroup::Unbucketed)
}

pub fn tenure_group(tenure: Option<f64>) -> TenureGroup {
    tenure
        .and_then(|value| bucket_index(value, &TENURE_BOUNDARIES))
        .map(|idx| TENURE_LABELS[idx])
        .unwrap_or(TenureGroup::Unbucketed)
}

/// Index of the right-closed interval `(b[i], b[i + 1]]` holding `value`.
/// The lowest boundary itself belongs to the first interval.
fn bucket_index(value: f64, boundaries: &[f64]) -> Option<usize> {
    let first = *boundaries.first()?;
    let last = *boundaries.last()?;
    if !value.is_finite() || value < first || value > last {
        return None;
    }
    if value == first {
        return Some(0);
    }

    boundaries
        .windows(2)
        .position(|edge| value > edge[0] && value <= edge[1])
}
