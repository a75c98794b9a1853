//! Typed rows flowing between the pipeline stages.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

pub const SEX_FEMALE: &str = "F";
pub const SEX_MALE: &str = "M";
pub const SEX_UNKNOWN: &str = "UNKNOWN";

/// Raw basket line as read from the source; every field is still text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawBasketRecord {
    pub customer_id: String,
    pub basket_date: Option<String>,
    pub basket_count: Option<String>,
    pub product_id: String,
}

/// Raw customer profile as read from the source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawCustomerRecord {
    pub customer_id: String,
    pub customer_age: Option<String>,
    pub tenure: Option<String>,
    pub sex: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BasketRecord {
    pub customer_id: String,
    pub basket_date: Option<NaiveDate>,
    pub basket_count: f64,
    pub product_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomerRecord {
    pub customer_id: String,
    pub customer_age: Option<f64>,
    pub tenure: Option<f64>,
    pub sex: String,
}

/// Basket row with calendar parts derived from `basket_date`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichedBasket {
    pub basket: BasketRecord,
    pub basket_year: Option<i32>,
    pub basket_month: Option<u32>,
    /// 0 = Monday .. 6 = Sunday.
    pub basket_weekday: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AgeGroup {
    Under25,
    From25To34,
    From35To44,
    From45,
    Unbucketed,
}

impl AgeGroup {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Under25 => "<25",
            Self::From25To34 => "25-34",
            Self::From35To44 => "35-44",
            Self::From45 => "45+",
            Self::Unbucketed => UNBUCKETED_LABEL,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TenureGroup {
    Neu,
    Mittel,
    Lang,
    Unbucketed,
}

impl TenureGroup {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Neu => "neu",
            Self::Mittel => "mittel",
            Self::Lang => "lang",
            Self::Unbucketed => UNBUCKETED_LABEL,
        }
    }
}

pub const UNBUCKETED_LABEL: &str = "unbucketed";

/// Customer profile with its bucket labels attached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichedCustomer {
    pub customer: CustomerRecord,
    pub age_group: AgeGroup,
    pub tenure_group: TenureGroup,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatedFeatures {
    pub customer_id: String,
    pub total_baskets: u64,
    pub total_items: f64,
    pub avg_basket_size: f64,
    pub distinct_products: u64,
    pub last_basket_date: Option<NaiveDate>,
    /// Days between the latest basket date in the whole batch and this
    /// customer's last basket. Replaced by the joiner's reference-date value.
    pub days_since_last_basket: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomerFeatureRow {
    pub customer_id: String,
    pub customer_age: Option<f64>,
    pub tenure: Option<f64>,
    pub sex: String,
    pub age_group: AgeGroup,
    pub tenure_group: TenureGroup,
    pub total_baskets: u64,
    pub total_items: f64,
    pub avg_basket_size: f64,
    pub distinct_products: u64,
    pub last_basket_date: Option<NaiveDate>,
    pub days_since_last_basket: i64,
}

pub const OUTPUT_COLUMNS: [&str; 12] = [
    "customer_id",
    "customer_age",
    "tenure",
    "sex",
    "age_group",
    "tenure_group",
    "total_baskets",
    "total_items",
    "avg_basket_size",
    "distinct_products",
    "last_basket_date",
    "days_since_last_basket",
];

impl CustomerFeatureRow {
    /// Cell text in `OUTPUT_COLUMNS` order. Nulls render as empty cells.
    pub fn to_cell_text_values(&self) -> Vec<String> {
        vec![
            self.customer_id.clone(),
            display_number(self.customer_age),
            display_number(self.tenure),
            self.sex.clone(),
            self.age_group.as_str().to_string(),
            self.tenure_group.as_str().to_string(),
            self.total_baskets.to_string(),
            self.total_items.to_string(),
            self.avg_basket_size.to_string(),
            self.distinct_products.to_string(),
            self.last_basket_date
                .map(|date| date.format("%Y-%m-%d").to_string())
                .unwrap_or_default(),
            self.days_since_last_basket.to_string(),
        ]
    }
}

fn display_number(value: Option<f64>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

/// Canonical join key: surrounding whitespace removed.
pub fn normalize_customer_id(raw: &str) -> String {
    raw.trim().to_string()
}
