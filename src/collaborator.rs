//! Narrow contracts through which the connector reaches the task/annotation
//! domain model it does not own.

use crate::base::{EntityId, ProjectId};
use crate::prelude::*;

/// Creates internal tasks out of raw remote payloads.
#[async_trait]
pub trait TaskSink: Send + Sync {
    async fn create_task(
        &self,
        project_id: ProjectId,
        payload: serde_json::Value,
    ) -> anyhow::Result<EntityId>;
}

/// An internal annotation, as far as the connector needs to know it.
pub trait Annotation: Send + Sync {
    fn id(&self) -> EntityId;
    fn project_id(&self) -> ProjectId;
}

/// Turns annotations into remote documents.
pub trait AnnotationSerializer<A: Annotation>: Send + Sync {
    fn serialize(&self, annotation: &A) -> anyhow::Result<serde_json::Value>;

    /// Remote key of `annotation`. Must be stable: exporting the same
    /// annotation twice targets the same key.
    fn derive_key(&self, annotation: &A) -> String {
        annotation.id().to_string()
    }
}
