use async_trait::async_trait;
use larder_core::error::{SyncError, SyncResult};
use larder_core::models::EntityKind;
use larder_core::openfoodfacts::{
    ProductResponse, SearchResponse, code_for_food_id, product_to_wire,
};
use larder_core::remote::{Ack, RemoteLookupService};
use larder_core::wire::WireEntity;

use crate::remote::{build_client, decode, transport_error};

const SEARCH_URL: &str = "https://world.openfoodfacts.org/cgi/search.pl";
const PRODUCT_URL: &str = "https://world.openfoodfacts.org/api/v0/product";

const METHOD_NOT_ALLOWED: u16 = 405;

/// Read-only food lookup against `OpenFoodFacts`. Recipes are not served.
pub struct OpenFoodFactsClient {
    client: reqwest::Client,
}

impl OpenFoodFactsClient {
    pub fn new(timeout: std::time::Duration) -> anyhow::Result<Self> {
        Ok(Self {
            client: build_client(timeout)?,
        })
    }
}

#[async_trait]
impl RemoteLookupService for OpenFoodFactsClient {
    async fn search(
        &self,
        query: &str,
        kind: EntityKind,
        locale: &str,
    ) -> SyncResult<Vec<WireEntity>> {
        if kind == EntityKind::Recipe {
            return Ok(Vec::new());
        }
        let resp = self
            .client
            .get(SEARCH_URL)
            .query(&[
                ("search_terms", query),
                ("json", "1"),
                ("page_size", "10"),
                ("lc", locale),
            ])
            .send()
            .await
            .map_err(|e| transport_error("Failed to reach OpenFoodFacts API", &e))?;

        let data: SearchResponse = decode("OpenFoodFacts search failed", resp).await?;
        Ok(data
            .products
            .into_iter()
            .filter_map(product_to_wire)
            .map(WireEntity::FoodItem)
            .collect())
    }

    async fn fetch_by_id(&self, kind: EntityKind, id: &str) -> SyncResult<WireEntity> {
        if kind == EntityKind::Recipe {
            return Err(SyncError::remote(404, "OpenFoodFacts has no recipes"));
        }
        let code = code_for_food_id(id);
        let resp = self
            .client
            .get(format!("{PRODUCT_URL}/{code}.json"))
            .send()
            .await
            .map_err(|e| transport_error("Failed to reach OpenFoodFacts API", &e))?;

        let data: ProductResponse = decode("OpenFoodFacts lookup failed", resp).await?;
        if data.status != 1 {
            return Err(SyncError::remote(404, format!("Product {code} not found")));
        }
        data.product
            .and_then(product_to_wire)
            .map(WireEntity::FoodItem)
            .ok_or_else(|| SyncError::remote(404, format!("Product {code} has no usable data")))
    }

    async fn upload(&self, _entity: &WireEntity) -> SyncResult<WireEntity> {
        Err(SyncError::remote(
            METHOD_NOT_ALLOWED,
            "Uploading to OpenFoodFacts is not supported",
        ))
    }

    async fn report(&self, _kind: EntityKind, _id: &str, _reason: &str) -> SyncResult<Ack> {
        Err(SyncError::remote(
            METHOD_NOT_ALLOWED,
            "Reporting to OpenFoodFacts is not supported",
        ))
    }
}
