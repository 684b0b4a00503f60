use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::SyncResult;
use crate::models::EntityKind;
use crate::wire::WireEntity;

/// Acknowledgement returned by the remote service for a report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ack {
    pub accepted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Remote catalogue of food items and recipes.
///
/// Implementations map non-2xx responses to `SyncError::Remote` carrying the
/// HTTP status, and transport failures to status 503.
#[async_trait]
pub trait RemoteLookupService: Send + Sync {
    async fn search(
        &self,
        query: &str,
        kind: EntityKind,
        locale: &str,
    ) -> SyncResult<Vec<WireEntity>>;

    async fn fetch_by_id(&self, kind: EntityKind, id: &str) -> SyncResult<WireEntity>;

    /// Returns the entity as stored by the remote.
    async fn upload(&self, entity: &WireEntity) -> SyncResult<WireEntity>;

    async fn report(&self, kind: EntityKind, id: &str, reason: &str) -> SyncResult<Ack>;
}
