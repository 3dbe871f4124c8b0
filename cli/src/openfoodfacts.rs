use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use tracing::debug;

use macrotrack_core::openfoodfacts::{
    ProductFacts, ProductResponse, SearchResponse, product_to_facts, search_result_to_facts,
};
use macrotrack_core::service::ProductLookup;

pub struct OpenFoodFactsClient {
    client: reqwest::Client,
    base_url: String,
}

impl OpenFoodFactsClient {
    pub fn new(base_url: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(format!(
                "macrotrack/{} (nutrition tracker)",
                env!("CARGO_PKG_VERSION")
            ))
            .timeout(std::time::Duration::from_secs(10))
            .connect_timeout(std::time::Duration::from_secs(5))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub async fn search_async(
        &self,
        query: &str,
        page_size: u32,
        page: u32,
    ) -> Result<Vec<ProductFacts>> {
        let url = format!("{}/cgi/search.pl", self.base_url);
        let page_size = page_size.to_string();
        let page = page.to_string();
        let resp = self
            .client
            .get(&url)
            .query(&[
                ("search_terms", query),
                ("search_simple", "1"),
                ("action", "process"),
                ("json", "1"),
                ("page_size", page_size.as_str()),
                ("page", page.as_str()),
            ])
            .send()
            .await
            .context("Failed to reach OpenFoodFacts API")?
            .error_for_status()
            .context("OpenFoodFacts search returned an error status")?;

        let data: SearchResponse = resp
            .json()
            .await
            .context("Failed to parse OpenFoodFacts search response")?;

        let products: Vec<ProductFacts> = data
            .products
            .into_iter()
            .filter_map(search_result_to_facts)
            .collect();
        debug!(query, count = products.len(), "OpenFoodFacts search");

        Ok(products)
    }

    pub async fn lookup_barcode_async(&self, barcode: &str) -> Result<Option<ProductFacts>> {
        let url = format!("{}/api/v2/product/{barcode}.json", self.base_url);
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .context("Failed to reach OpenFoodFacts API")?;

        // v2 answers unknown barcodes with 404 and a status-0 body
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let data: ProductResponse = resp
            .error_for_status()
            .context("OpenFoodFacts barcode lookup returned an error status")?
            .json()
            .await
            .context("Failed to parse OpenFoodFacts barcode response")?;

        if data.status != 1 {
            return Ok(None);
        }

        Ok(data.product.map(product_to_facts))
    }
}

#[async_trait]
impl ProductLookup for OpenFoodFactsClient {
    async fn search(&self, query: &str, page_size: u32, page: u32) -> Result<Vec<ProductFacts>> {
        self.search_async(query, page_size, page).await
    }

    async fn lookup_barcode(&self, barcode: &str) -> Result<Option<ProductFacts>> {
        self.lookup_barcode_async(barcode).await
    }
}
