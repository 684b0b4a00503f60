use serde::Deserialize;

use crate::wire::WireFoodItem;

pub const OFF_SOURCE: &str = "openfoodfacts";

#[derive(Debug, Deserialize)]
pub struct SearchResponse {
    pub products: Vec<ProductData>,
}

#[derive(Debug, Deserialize)]
pub struct ProductResponse {
    pub status: i32,
    pub product: Option<ProductData>,
}

#[derive(Debug, Deserialize)]
pub struct ProductData {
    pub product_name: Option<String>,
    pub brands: Option<String>,
    pub code: Option<String>,
    pub nutriments: Option<Nutriments>,
}

#[derive(Debug, Deserialize)]
#[allow(clippy::struct_field_names)]
pub struct Nutriments {
    #[serde(rename = "energy-kcal_100g")]
    pub energy_kcal_100g: Option<f64>,
    pub proteins_100g: Option<f64>,
    pub carbohydrates_100g: Option<f64>,
    pub fat_100g: Option<f64>,
}

/// Stable food id for an `OpenFoodFacts` barcode.
#[must_use]
pub fn food_id_for_code(code: &str) -> String {
    format!("off:{code}")
}

/// Strip the `off:` prefix, if any, to get back the barcode.
#[must_use]
pub fn code_for_food_id(id: &str) -> &str {
    id.strip_prefix("off:").unwrap_or(id)
}

/// Products without a barcode are dropped: the barcode is the only identity
/// that stays stable across searches.
#[must_use]
pub fn product_to_wire(p: ProductData) -> Option<WireFoodItem> {
    let name = p.product_name.filter(|n| !n.is_empty())?;
    let code = p.code.filter(|c| !c.is_empty())?;
    let nutriments = p.nutriments?;
    let calories = nutriments.energy_kcal_100g?;

    Some(WireFoodItem {
        id: food_id_for_code(&code),
        name,
        brand: p.brands.filter(|b| !b.is_empty()),
        calories,
        carbohydrates: nutriments.carbohydrates_100g.unwrap_or(0.0),
        protein: nutriments.proteins_100g.unwrap_or(0.0),
        fat: nutriments.fat_100g.unwrap_or(0.0),
        servings: Some(1),
        serving_size_g: Some(100.0),
        source: Some(OFF_SOURCE.to_string()),
    })
}
