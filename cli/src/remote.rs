use async_trait::async_trait;
use larder_core::error::{SyncError, SyncResult, TRANSPORT_FAILURE_STATUS};
use larder_core::models::EntityKind;
use larder_core::remote::{Ack, RemoteLookupService};
use larder_core::wire::WireEntity;
use serde::Serialize;
use serde::de::DeserializeOwned;

const BAD_GATEWAY: u16 = 502;

pub fn build_client(timeout: std::time::Duration) -> anyhow::Result<reqwest::Client> {
    let client = reqwest::Client::builder()
        .user_agent(format!(
            "larder-cli/{} (food and recipe lookup)",
            env!("CARGO_PKG_VERSION")
        ))
        .timeout(timeout)
        .connect_timeout(std::time::Duration::from_secs(5))
        .build()?;
    Ok(client)
}

/// Transport failure, or the status if the error carries one.
pub fn transport_error(context: &str, err: &reqwest::Error) -> SyncError {
    let code = err
        .status()
        .map_or(TRANSPORT_FAILURE_STATUS, |s| s.as_u16());
    SyncError::remote(code, format!("{context}: {err}"))
}

/// Non-2xx responses become `SyncError::Remote` with the response body, or
/// the status reason when the body is empty.
pub async fn decode<T: DeserializeOwned>(
    context: &str,
    resp: reqwest::Response,
) -> SyncResult<T> {
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        let message = match body.trim() {
            "" => status.canonical_reason().unwrap_or("request failed").to_string(),
            text => text.to_string(),
        };
        return Err(SyncError::remote(status.as_u16(), format!("{context}: {message}")));
    }
    resp.json().await.map_err(|e| {
        SyncError::remote(BAD_GATEWAY, format!("{context}: invalid response body: {e}"))
    })
}

/// Client for a JSON lookup service exposing `/{kind}s` collections.
pub struct HttpLookupClient {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Serialize)]
struct ReportBody<'a> {
    reason: &'a str,
}

impl HttpLookupClient {
    pub fn new(base_url: &str, timeout: std::time::Duration) -> anyhow::Result<Self> {
        Ok(Self {
            client: build_client(timeout)?,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn collection(&self, kind: EntityKind) -> String {
        format!("{}/{}s", self.base_url, kind.as_str())
    }
}

#[async_trait]
impl RemoteLookupService for HttpLookupClient {
    async fn search(
        &self,
        query: &str,
        kind: EntityKind,
        locale: &str,
    ) -> SyncResult<Vec<WireEntity>> {
        let resp = self
            .client
            .get(format!("{}/search", self.collection(kind)))
            .query(&[("q", query), ("locale", locale)])
            .send()
            .await
            .map_err(|e| transport_error("Failed to reach lookup service", &e))?;
        decode("Search failed", resp).await
    }

    async fn fetch_by_id(&self, kind: EntityKind, id: &str) -> SyncResult<WireEntity> {
        let resp = self
            .client
            .get(format!("{}/{id}", self.collection(kind)))
            .send()
            .await
            .map_err(|e| transport_error("Failed to reach lookup service", &e))?;
        decode("Fetch failed", resp).await
    }

    async fn upload(&self, entity: &WireEntity) -> SyncResult<WireEntity> {
        let kind = match entity {
            WireEntity::FoodItem(_) => EntityKind::FoodItem,
            WireEntity::Recipe(_) => EntityKind::Recipe,
        };
        let resp = self
            .client
            .post(self.collection(kind))
            .json(entity)
            .send()
            .await
            .map_err(|e| transport_error("Failed to reach lookup service", &e))?;
        decode("Upload failed", resp).await
    }

    async fn report(&self, kind: EntityKind, id: &str, reason: &str) -> SyncResult<Ack> {
        let resp = self
            .client
            .post(format!("{}/{id}/report", self.collection(kind)))
            .json(&ReportBody { reason })
            .send()
            .await
            .map_err(|e| transport_error("Failed to reach lookup service", &e))?;
        decode("Report failed", resp).await
    }
}
