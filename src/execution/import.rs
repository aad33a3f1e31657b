use crate::base::{ProjectId, StorageId, StorageKind};
use crate::collaborator::TaskSink;
use crate::execution::stats::SyncStats;
use crate::links::{LinkOutcome, LinkRegistry};
use crate::ops::interface::KeyValueStore;
use crate::prelude::*;
use crate::settings::StorageConfig;

/// A remote collection that tasks of one project are imported from.
pub struct ImportStorage {
    id: StorageId,
    project_id: ProjectId,
    config: StorageConfig,
    kind: StorageKind,
    store: Arc<dyn KeyValueStore>,
    links: Arc<dyn LinkRegistry>,
}

impl ImportStorage {
    pub fn new(
        id: StorageId,
        project_id: ProjectId,
        config: StorageConfig,
        store: Arc<dyn KeyValueStore>,
        links: Arc<dyn LinkRegistry>,
    ) -> Self {
        let kind = StorageKind::import(store.backend());
        Self {
            id,
            project_id,
            config,
            kind,
            store,
            links,
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

    /// Keys of the remote collection that pass the prefix filter.
    pub fn iter_keys(&self) -> BoxStream<'_, Result<String>> {
        self.filtered_keys(None)
    }

    fn filtered_keys<'a>(&'a self, stats: Option<&'a SyncStats>) -> BoxStream<'a, Result<String>> {
        self.store
            .keys()
            .filter(move |key| {
                let keep = match key {
                    Ok(key) => {
                        let accepted = self.config.accepts_key(key);
                        if let Some(stats) = stats {
                            stats.num_scanned.inc(1);
                            if !accepted {
                                stats.num_filtered.inc(1);
                            }
                        }
                        accepted
                    }
                    Err(_) => true,
                };
                futures::future::ready(keep)
            })
            .boxed()
    }

    /// Payload stored at `key`, or `None` when the key is gone or holds an
    /// empty document.
    pub async fn get_data(&self, key: &str) -> Result<Option<serde_json::Value>> {
        Ok(self.fetch(key).await?.into_payload())
    }

    async fn fetch(&self, key: &str) -> Result<RemoteData> {
        Ok(match self.store.get(key).await? {
            None => RemoteData::Missing,
            Some(value) if is_empty(&value) => RemoteData::Empty,
            Some(value) => RemoteData::Payload(value),
        })
    }

    /// Imports every key not linked yet as a new task and links it.
    ///
    /// Safe to re-run: keys linked by an earlier run are skipped. A task the
    /// sink refuses to create is logged and counted; remote and registry
    /// failures end the run.
    pub async fn scan_and_create_links(&self, sink: &dyn TaskSink) -> Result<SyncStats> {
        let stats = SyncStats::default();
        self.scan_into(sink, &stats).await?;
        Ok(stats)
    }

    /// Same as [`scan_and_create_links`](Self::scan_and_create_links), but
    /// counts into `stats` so progress survives a failed run.
    pub async fn scan_into(&self, sink: &dyn TaskSink, stats: &SyncStats) -> Result<()> {
        info!(
            "Syncing import storage {} ({}) of project {}",
            self.id, self.kind, self.project_id
        );

        let mut linked = self.links.linked_keys(&self.kind, self.id).await?;
        let mut keys = self.filtered_keys(Some(stats));
        while let Some(key) = keys.next().await {
            let key = key?;
            if linked.contains(&key) {
                stats.num_already_linked.inc(1);
                continue;
            }

            let value = match self.fetch(&key).await? {
                RemoteData::Payload(value) => value,
                RemoteData::Missing => {
                    debug!("Key `{key}` disappeared before it could be fetched, skipping");
                    stats.num_missing.inc(1);
                    continue;
                }
                RemoteData::Empty => {
                    debug!("Key `{key}` holds an empty document, skipping");
                    stats.num_empty.inc(1);
                    continue;
                }
            };

            let task_id = match sink.create_task(self.project_id, value).await {
                Ok(task_id) => task_id,
                Err(err) => {
                    error!("Failed to create task from key `{key}`: {err:#}");
                    stats.num_errors.inc(1);
                    continue;
                }
            };
            match self.links.create(&self.kind, self.id, task_id, &key).await? {
                LinkOutcome::Created(_) => stats.num_synced.inc(1),
                LinkOutcome::AlreadyLinked => stats.num_already_linked.inc(1),
            }
            linked.insert(key);
        }

        info!("Import storage {} synced: {stats}", self.id);
        Ok(())
    }
}

enum RemoteData {
    Missing,
    Empty,
    Payload(serde_json::Value),
}

impl RemoteData {
    fn into_payload(self) -> Option<serde_json::Value> {
        match self {
            RemoteData::Payload(value) => Some(value),
            RemoteData::Missing | RemoteData::Empty => None,
        }
    }
}

fn is_empty(value: &serde_json::Value) -> bool {
    match value {
        serde_json::Value::Null => true,
        serde_json::Value::Object(map) => map.is_empty(),
        _ => false,
    }
}
