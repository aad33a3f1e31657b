use crate::base::{ProjectId, StorageId, StorageKind};
use crate::collaborator::{Annotation, AnnotationSerializer};
use crate::execution::events::ExportHandler;
use crate::execution::stats::SyncStats;
use crate::links::{LinkOutcome, LinkRegistry};
use crate::ops::interface::KeyValueStore;
use crate::prelude::*;
use crate::settings::StorageConfig;

/// A remote collection that annotations of one project are written to.
pub struct ExportStorage<A: Annotation> {
    id: StorageId,
    project_id: ProjectId,
    config: StorageConfig,
    kind: StorageKind,
    store: Arc<dyn KeyValueStore>,
    links: Arc<dyn LinkRegistry>,
    serializer: Arc<dyn AnnotationSerializer<A>>,
}

impl<A: Annotation> ExportStorage<A> {
    pub fn new(
        id: StorageId,
        project_id: ProjectId,
        config: StorageConfig,
        store: Arc<dyn KeyValueStore>,
        links: Arc<dyn LinkRegistry>,
        serializer: Arc<dyn AnnotationSerializer<A>>,
    ) -> Self {
        let kind = StorageKind::export(store.backend());
        Self {
            id,
            project_id,
            config,
            kind,
            store,
            links,
            serializer,
        }
    }

    pub fn id(&self) -> StorageId {
        self.id
    }

    pub fn project_id(&self) -> ProjectId {
        self.project_id
    }

    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    pub fn kind(&self) -> &StorageKind {
        &self.kind
    }

    /// Writes one annotation to the remote store and links it to its key.
    ///
    /// Writing an annotation that is already linked overwrites the remote
    /// document and keeps the existing link.
    pub async fn save_annotation(&self, annotation: &A) -> Result<LinkOutcome> {
        let document = self
            .serializer
            .serialize(annotation)
            .map_err(Error::collaborator)?;
        let key = self.serializer.derive_key(annotation);
        let revision = self.store.set(&key, document).await?;
        trace!(
            "Exported annotation {} to key `{key}` (revision {:?})",
            annotation.id(),
            revision.as_ref().map(|rev| rev.0.as_str())
        );
        self.links
            .create(&self.kind, self.id, annotation.id(), &key)
            .await
    }

    /// Re-exports a set of annotations, stopping at the first failure.
    pub async fn sync<'a, I>(&self, annotations: I) -> Result<SyncStats>
    where
        I: IntoIterator<Item = &'a A>,
        A: 'a,
    {
        let stats = SyncStats::default();
        self.sync_into(annotations, &stats).await?;
        Ok(stats)
    }

    /// Like [`Self::sync`], but counts into `stats` so that callers keep the
    /// partial counters of a run that failed midway.
    pub async fn sync_into<'a, I>(&self, annotations: I, stats: &SyncStats) -> Result<()>
    where
        I: IntoIterator<Item = &'a A>,
        A: 'a,
    {
        info!(
            "Syncing export storage {} ({}) of project {}",
            self.id, self.kind, self.project_id
        );
        for annotation in annotations {
            stats.num_scanned.inc(1);
            if annotation.project_id() != self.project_id {
                stats.num_filtered.inc(1);
                continue;
            }
            match self.save_annotation(annotation).await {
                Ok(_) => stats.num_synced.inc(1),
                Err(err) => {
                    stats.num_errors.inc(1);
                    warn!(
                        "Export storage {} failed on annotation {}: {err}",
                        self.id,
                        annotation.id()
                    );
                    return Err(err);
                }
            }
        }
        info!("Export storage {} synced: {stats}", self.id);
        Ok(())
    }
}

#[async_trait]
impl<A: Annotation + 'static> ExportHandler<A> for ExportStorage<A> {
    fn storage_id(&self) -> StorageId {
        self.id
    }

    async fn handle(&self, annotation: &A) -> Result<()> {
        self.save_annotation(annotation).await.map(|_| ())
    }
}
