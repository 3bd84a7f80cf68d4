use serde::{Deserialize, Deserializer};

use crate::models::FoodFacts;

pub const UNKNOWN_PRODUCT: &str = "Unknown product";

#[derive(Debug, Deserialize)]
pub struct ProductResponse {
    #[serde(default)]
    pub status: i32,
    pub product: Option<ProductData>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ProductData {
    pub product_name: Option<String>,
    pub serving_size: Option<String>,
    pub nutriments: Option<Nutriments>,
}

#[derive(Debug, Default, Deserialize)]
#[allow(clippy::struct_field_names)]
pub struct Nutriments {
    #[serde(rename = "energy-kcal_100g", default, deserialize_with = "lenient_f64")]
    pub energy_kcal_100g: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub proteins_100g: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub carbohydrates_100g: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub fat_100g: Option<f64>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum NumberOrString {
    Number(f64),
    Text(String),
}

// Nutriment values show up as integers, floats or numeric strings.
fn lenient_f64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<f64>, D::Error> {
    Ok(match Option::<NumberOrString>::deserialize(deserializer)? {
        Some(NumberOrString::Number(n)) => Some(n),
        Some(NumberOrString::Text(s)) => s.trim().parse().ok(),
        None => None,
    })
}

impl ProductResponse {
    /// The product's facts, or `None` when the lookup reported no match.
    #[must_use]
    pub fn into_facts(self, barcode: &str) -> Option<FoodFacts> {
        if self.status != 1 {
            return None;
        }
        self.product.map(|p| product_to_facts(barcode, p))
    }
}

/// Missing macros count as zero; a missing name becomes [`UNKNOWN_PRODUCT`].
#[must_use]
pub fn product_to_facts(barcode: &str, p: ProductData) -> FoodFacts {
    let nutriments = p.nutriments.unwrap_or_default();
    FoodFacts {
        barcode: barcode.to_string(),
        name: p
            .product_name
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| UNKNOWN_PRODUCT.to_string()),
        carbs: nutriments.carbohydrates_100g.unwrap_or(0.0),
        protein: nutriments.proteins_100g.unwrap_or(0.0),
        fat: nutriments.fat_100g.unwrap_or(0.0),
        calories: nutriments.energy_kcal_100g,
        serving_size: p.serving_size.filter(|s| !s.trim().is_empty()),
    }
}
