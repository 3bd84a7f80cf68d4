use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::debug;

use macrotrack_core::models::FoodFacts;
use macrotrack_core::openfoodfacts::ProductResponse;
use macrotrack_core::service::FoodLookupProvider;

const PRODUCT_URL: &str = "https://world.openfoodfacts.org/api/v2/product";

pub struct OpenFoodFactsClient {
    client: reqwest::Client,
}

impl OpenFoodFactsClient {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(format!(
                "macrotrack/{} (macro tracker)",
                env!("CARGO_PKG_VERSION")
            ))
            .timeout(Duration::from_secs(10))
            .connect_timeout(Duration::from_secs(5))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self { client })
    }
}

fn product_url(barcode: &str) -> String {
    format!("{PRODUCT_URL}/{barcode}.json")
}

#[async_trait]
impl FoodLookupProvider for OpenFoodFactsClient {
    async fn lookup_barcode(&self, barcode: &str) -> Result<Option<FoodFacts>> {
        let url = product_url(barcode);
        debug!(%url, "looking up barcode");
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .context("Failed to reach OpenFoodFacts API")?;

        // v2 answers unknown codes with 404 and a status-0 body
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let data: ProductResponse = resp
            .error_for_status()
            .context("OpenFoodFacts lookup failed")?
            .json()
            .await
            .context("Failed to parse OpenFoodFacts barcode response")?;

        Ok(data.into_facts(barcode))
    }
}
