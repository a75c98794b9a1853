//! Type coercion, deduplication, imputation and categorical harmonization.
//!
//! Malformed individual values never fail a run: they become nulls and are
//! counted in [`CleanReport`].

use std::collections::HashSet;

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::records::{
    normalize_customer_id, BasketRecord, CustomerRecord, RawBasketRecord, RawCustomerRecord,
    SEX_FEMALE, SEX_MALE, SEX_UNKNOWN,
};

const DATE_LAYOUTS: [&str; 3] = ["%Y-%m-%d", "%Y/%m/%d", "%d.%m.%Y"];
const DATETIME_LAYOUTS: [&str; 3] = ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M"];

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CleanReport {
    pub input_rows: u64,
    pub output_rows: u64,
    pub duplicates_removed: u64,
    /// Present values that failed coercion, per field.
    pub parse_failures: Vec<(String, u64)>,
    /// Nulls replaced by an imputed value, per field.
    pub filled: Vec<(String, u64)>,
}

impl CleanReport {
    pub fn parse_failures_for(&self, field: &str) -> u64 {
        lookup(&self.parse_failures, field)
    }

    pub fn filled_for(&self, field: &str) -> u64 {
        lookup(&self.filled, field)
    }
}

fn lookup(entries: &[(String, u64)], field: &str) -> u64 {
    entries
        .iter()
        .find(|(name, _)| name == field)
        .map(|(_, count)| *count)
        .unwrap_or(0)
}

#[derive(Debug, Clone, PartialEq)]
pub struct CleanedCustomers {
    pub records: Vec<CustomerRecord>,
    pub age_median: Option<f64>,
    pub tenure_median: Option<f64>,
    pub report: CleanReport,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CleanedBaskets {
    pub records: Vec<BasketRecord>,
    pub report: CleanReport,
}

/// Cleans customer profiles.
///
/// Order of steps: dedup on `customer_id` (first row wins), numeric
/// coercion of the kept rows, median fill of `customer_age` and `tenure`,
/// then `sex` harmonization.
pub fn clean_customers(raw: &[RawCustomerRecord]) -> CleanedCustomers {
    let mut age_failures = 0u64;
    let mut tenure_failures = 0u64;
    let mut seen = HashSet::new();
    let mut records = Vec::with_capacity(raw.len());

    for row in raw {
        let customer_id = normalize_customer_id(&row.customer_id);
        if !seen.insert(customer_id.clone()) {
            continue;
        }
        let customer_age = coerce_counted(row.customer_age.as_deref(), &mut age_failures);
        let tenure = coerce_counted(row.tenure.as_deref(), &mut tenure_failures);

        records.push(CustomerRecord {
            customer_id,
            customer_age,
            tenure,
            sex: harmonize_sex(row.sex.as_deref()),
        });
    }

    let age_median = median(records.iter().filter_map(|r| r.customer_age));
    let tenure_median = median(records.iter().filter_map(|r| r.tenure));
    let mut ages_filled = 0u64;
    let mut tenures_filled = 0u64;

    for record in &mut records {
        if record.customer_age.is_none() && age_median.is_some() {
            record.customer_age = age_median;
            ages_filled += 1;
        }
        if record.tenure.is_none() && tenure_median.is_some() {
            record.tenure = tenure_median;
            tenures_filled += 1;
        }
    }

    let report = CleanReport {
        input_rows: raw.len() as u64,
        output_rows: records.len() as u64,
        duplicates_removed: (raw.len() - records.len()) as u64,
        parse_failures: vec![
            ("customer_age".to_string(), age_failures),
            ("tenure".to_string(), tenure_failures),
        ],
        filled: vec![
            ("customer_age".to_string(), ages_filled),
            ("tenure".to_string(), tenures_filled),
        ],
    };

    info!(
        component = "cleaner",
        event = "cleaner.customers.cleaned",
        input_rows = report.input_rows,
        output_rows = report.output_rows,
        duplicates_removed = report.duplicates_removed,
        age_median = ?age_median,
        tenure_median = ?tenure_median,
        ages_filled,
        tenures_filled
    );

    CleanedCustomers {
        records,
        age_median,
        tenure_median,
        report,
    }
}

/// Cleans basket lines.
///
/// Rows are coerced first and then collapsed on full-row equality, so `3`
/// and `3.0` are the same count and two missing values are equal. Missing
/// counts are filled with 0 after deduplication.
pub fn clean_baskets(raw: &[RawBasketRecord], date_format: Option<&str>) -> CleanedBaskets {
    let mut date_failures = 0u64;
    let mut count_failures = 0u64;
    let mut seen = HashSet::new();
    let mut records = Vec::with_capacity(raw.len());
    let mut counts_filled = 0u64;

    for row in raw {
        let basket_date = match row.basket_date.as_deref() {
            Some(text) => {
                let parsed = parse_date(text, date_format);
                if parsed.is_none() {
                    date_failures += 1;
                    debug!(
                        component = "cleaner",
                        event = "cleaner.parse.failed",
                        field = "basket_date",
                        value = text
                    );
                }
                parsed
            }
            None => None,
        };
        let basket_count = coerce_counted(row.basket_count.as_deref(), &mut count_failures);
        let customer_id = normalize_customer_id(&row.customer_id);

        let key = BasketKey {
            customer_id: customer_id.clone(),
            basket_date,
            basket_count: basket_count.map(canonical_bits),
            product_id: row.product_id.clone(),
        };
        if !seen.insert(key) {
            continue;
        }

        if basket_count.is_none() {
            counts_filled += 1;
        }
        records.push(BasketRecord {
            customer_id,
            basket_date,
            basket_count: basket_count.unwrap_or(0.0),
            product_id: row.product_id.clone(),
        });
    }

    let report = CleanReport {
        input_rows: raw.len() as u64,
        output_rows: records.len() as u64,
        duplicates_removed: (raw.len() - records.len()) as u64,
        parse_failures: vec![
            ("basket_date".to_string(), date_failures),
            ("basket_count".to_string(), count_failures),
        ],
        filled: vec![("basket_count".to_string(), counts_filled)],
    };

    info!(
        component = "cleaner",
        event = "cleaner.baskets.cleaned",
        input_rows = report.input_rows,
        output_rows = report.output_rows,
        duplicates_removed = report.duplicates_removed,
        date_parse_failures = date_failures,
        count_parse_failures = count_failures,
        counts_filled
    );

    CleanedBaskets { records, report }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct BasketKey {
    customer_id: String,
    basket_date: Option<NaiveDate>,
    basket_count: Option<u64>,
    product_id: String,
}

fn canonical_bits(value: f64) -> u64 {
    // -0.0 and 0.0 compare equal, so they must hash equal.
    (value + 0.0).to_bits()
}

/// Permissive numeric parse: surrounding whitespace is ignored, anything that
/// is not a finite number becomes `None`.
pub fn coerce_number(raw: Option<&str>) -> Option<f64> {
    let value = raw?.trim().parse::<f64>().ok()?;
    value.is_finite().then_some(value)
}

fn coerce_counted(raw: Option<&str>, failures: &mut u64) -> Option<f64> {
    let parsed = coerce_number(raw);
    if raw.is_some() && parsed.is_none() {
        *failures += 1;
    }
    parsed
}

/// Parses a calendar date. With an explicit `format` only that layout is
/// accepted (as a date, or as a datetime whose date part is kept); otherwise
/// the ISO-style layouts and RFC 3339 are tried in turn.
pub fn parse_date(raw: &str, format: Option<&str>) -> Option<NaiveDate> {
    let text = raw.trim();
    if text.is_empty() {
        return None;
    }

    if let Some(format) = format {
        return NaiveDate::parse_from_str(text, format)
            .ok()
            .or_else(|| {
                NaiveDateTime::parse_from_str(text, format)
                    .ok()
                    .map(|dt| dt.date())
            });
    }

    DATE_LAYOUTS
        .iter()
        .find_map(|layout| NaiveDate::parse_from_str(text, layout).ok())
        .or_else(|| {
            DATETIME_LAYOUTS
                .iter()
                .find_map(|layout| NaiveDateTime::parse_from_str(text, layout).ok())
                .map(|dt| dt.date())
        })
        .or_else(|| {
            DateTime::parse_from_rfc3339(text)
                .ok()
                .map(|dt| dt.date_naive())
        })
}

/// Maps free-text sex values onto `M`, `F` or `UNKNOWN`.
pub fn harmonize_sex(raw: Option<&str>) -> String {
    let Some(raw) = raw else {
        return SEX_UNKNOWN.to_string();
    };

    match raw.trim().to_uppercase().as_str() {
        "F" | "FEMALE" => SEX_FEMALE.to_string(),
        "M" | "MALE" => SEX_MALE.to_string(),
        "" | SEX_UNKNOWN => SEX_UNKNOWN.to_string(),
        other => {
            debug!(
                component = "cleaner",
                event = "cleaner.sex.unmapped",
                value = other
            );
            SEX_UNKNOWN.to_string()
        }
    }
}

/// Median of the values; the mean of the two middle values for an even count.
pub fn median(values: impl Iterator<Item = f64>) -> Option<f64> {
    let mut sorted: Vec<f64> = values.collect();
    if sorted.is_empty() {
        return None;
    }
    sorted.sort_by(f64::total_cmp);

    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 1 {
        Some(sorted[mid])
    } else {
        Some((sorted[mid - 1] + sorted[mid]) / 2.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn customer(id: &str, age: Option<&str>, tenure: Option<&str>, sex: Option<&str>) -> RawCustomerRecord {
        RawCustomerRecord {
            customer_id: id.to_string(),
            customer_age: age.map(str::to_string),
            tenure: tenure.map(str::to_string),
            sex: sex.map(str::to_string),
        }
    }

    fn basket(id: &str, date: Option<&str>, count: Option<&str>, product: &str) -> RawBasketRecord {
        RawBasketRecord {
            customer_id: id.to_string(),
            basket_date: date.map(str::to_string),
            basket_count: count.map(str::to_string),
            product_id: product.to_string(),
        }
    }

    #[test]
    fn customer_dedup_keeps_first_occurrence_after_trimming() {
        let raw = vec![
            customer(" 1", Some("30"), Some("5"), Some("male")),
            customer("1 ", Some("99"), Some("99"), Some("female")),
            customer("2", Some("40"), Some("7"), Some("F")),
        ];

        let cleaned = clean_customers(&raw);
        assert_eq!(cleaned.records.len(), 2);
        assert_eq!(cleaned.records[0].customer_id, "1");
        assert_eq!(cleaned.records[0].customer_age, Some(30.0));
        assert_eq!(cleaned.records[0].sex, "M");
        assert_eq!(cleaned.report.duplicates_removed, 1);
    }

    #[test]
    fn median_fill_uses_post_dedup_values_exactly() {
        let raw = vec![
            customer("1", Some("20"), Some("1"), None),
            customer("2", None, Some("oops"), None),
            customer("3", Some("31"), None, None),
            customer("3", Some("1000"), Some("1000"), None),
        ];

        let cleaned = clean_customers(&raw);
        assert_eq!(cleaned.age_median, Some(25.5));
        assert_eq!(cleaned.tenure_median, Some(1.0));
        assert!(cleaned.records.iter().all(|r| r.customer_age.is_some()));
        assert_eq!(cleaned.records[1].customer_age, Some(25.5));
        assert_eq!(cleaned.records[1].tenure, Some(1.0));
        assert_eq!(cleaned.records[2].tenure, Some(1.0));
        assert_eq!(cleaned.report.parse_failures_for("tenure"), 1);
        assert_eq!(cleaned.report.filled_for("customer_age"), 1);
        assert_eq!(cleaned.report.filled_for("tenure"), 2);
    }

    #[test]
    fn dropped_duplicates_do_not_count_as_parse_failures() {
        let raw = vec![
            customer("1", Some("30"), Some("5"), None),
            customer("1", Some("thirty"), Some("n/a-ish"), None),
        ];

        let cleaned = clean_customers(&raw);
        assert_eq!(cleaned.report.duplicates_removed, 1);
        assert_eq!(cleaned.report.parse_failures_for("customer_age"), 0);
        assert_eq!(cleaned.report.parse_failures_for("tenure"), 0);
    }

    #[test]
    fn all_null_column_stays_null() {
        let raw = vec![customer("1", None, None, None), customer("2", Some("x"), None, None)];
        let cleaned = clean_customers(&raw);

        assert_eq!(cleaned.age_median, None);
        assert!(cleaned.records.iter().all(|r| r.customer_age.is_none()));
        assert_eq!(cleaned.report.filled_for("customer_age"), 0);
    }

    #[test]
    fn sex_is_harmonized_into_three_values() {
        assert_eq!(harmonize_sex(Some(" female ")), "F");
        assert_eq!(harmonize_sex(Some("Male")), "M");
        assert_eq!(harmonize_sex(Some("m")), "M");
        assert_eq!(harmonize_sex(Some("unknown")), "UNKNOWN");
        assert_eq!(harmonize_sex(Some("   ")), "UNKNOWN");
        assert_eq!(harmonize_sex(Some("diverse")), "UNKNOWN");
        assert_eq!(harmonize_sex(None), "UNKNOWN");
    }

    #[test]
    fn basket_dedup_compares_coerced_rows() {
        let raw = vec![
            basket("7", Some("2023-01-01"), Some("3"), "p1"),
            basket("7 ", Some("2023-01-01"), Some("3.0"), "p1"),
            basket("7", Some("2023-01-01"), None, "p1"),
            basket("7", Some("2023-01-01"), Some("bad"), "p1"),
            basket("7", Some("2023-01-02"), Some("3"), "p1"),
        ];

        let cleaned = clean_baskets(&raw, None);
        assert_eq!(cleaned.records.len(), 3);
        assert_eq!(cleaned.records[1].basket_count, 0.0);
        assert_eq!(cleaned.report.duplicates_removed, 2);
        assert_eq!(cleaned.report.parse_failures_for("basket_count"), 1);
        assert_eq!(cleaned.report.filled_for("basket_count"), 1);
    }

    #[test]
    fn unparseable_dates_become_null_without_failing() {
        let raw = vec![
            basket("1", Some("2023-13-45"), Some("1"), "p"),
            basket("1", Some("2023-02-03 10:11:12"), Some("1"), "p"),
        ];

        let cleaned = clean_baskets(&raw, None);
        assert_eq!(cleaned.records[0].basket_date, None);
        assert_eq!(
            cleaned.records[1].basket_date,
            NaiveDate::from_ymd_opt(2023, 2, 3)
        );
        assert_eq!(cleaned.report.parse_failures_for("basket_date"), 1);
    }

    #[test]
    fn explicit_date_format_is_the_only_layout_accepted() {
        let expected = NaiveDate::from_ymd_opt(2023, 4, 5);
        assert_eq!(parse_date("05/04/2023", Some("%d/%m/%Y")), expected);
        assert_eq!(parse_date("2023-04-05", Some("%d/%m/%Y")), None);
        assert_eq!(parse_date("2023-04-05", None), expected);
        assert_eq!(parse_date("2023-04-05T23:30:00+02:00", None), expected);
    }

    #[test]
    fn numbers_are_coerced_permissively() {
        assert_eq!(coerce_number(Some(" 42 ")), Some(42.0));
        assert_eq!(coerce_number(Some("4.5")), Some(4.5));
        assert_eq!(coerce_number(Some("forty")), None);
        assert_eq!(coerce_number(Some("inf")), None);
        assert_eq!(coerce_number(None), None);
    }

    #[test]
    fn median_of_even_and_odd_counts() {
        assert_eq!(median([3.0, 1.0, 2.0].into_iter()), Some(2.0));
        assert_eq!(median([4.0, 1.0, 3.0, 2.0].into_iter()), Some(2.5));
        assert_eq!(median(std::iter::empty()), None);
    }
}
