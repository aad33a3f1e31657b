use std::sync::RwLock;

use crate::base::{ProjectId, StorageId};
use crate::collaborator::Annotation;
use crate::prelude::*;

/// Reacts to a newly created annotation.
#[async_trait]
pub trait ExportHandler<A: Annotation>: Send + Sync {
    fn storage_id(&self) -> StorageId;

    async fn handle(&self, annotation: &A) -> Result<()>;
}

/// Routes annotation-created events to the export handlers of the
/// annotation's project.
pub struct ExportDispatcher<A: Annotation> {
    handlers: RwLock<HashMap<ProjectId, Vec<Arc<dyn ExportHandler<A>>>>>,
}

impl<A: Annotation> Default for ExportDispatcher<A> {
    fn default() -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
        }
    }
}

impl<A: Annotation> ExportDispatcher<A> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `handler` for `project_id`, replacing any handler registered for
    /// the same storage.
    pub fn register(&self, project_id: ProjectId, handler: Arc<dyn ExportHandler<A>>) {
        let mut handlers = self
            .handlers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let project_handlers = handlers.entry(project_id).or_default();
        let storage_id = handler.storage_id();
        match project_handlers
            .iter_mut()
            .find(|h| h.storage_id() == storage_id)
        {
            Some(existing) => *existing = handler,
            None => project_handlers.push(handler),
        }
    }

    /// Returns whether a handler was removed.
    pub fn unregister(&self, project_id: ProjectId, storage_id: StorageId) -> bool {
        let mut handlers = self
            .handlers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let Some(project_handlers) = handlers.get_mut(&project_id) else {
            return false;
        };
        let before = project_handlers.len();
        project_handlers.retain(|h| h.storage_id() != storage_id);
        let removed = project_handlers.len() != before;
        if project_handlers.is_empty() {
            handlers.remove(&project_id);
        }
        removed
    }

    pub fn handler_count(&self, project_id: ProjectId) -> usize {
        self.handlers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&project_id)
            .map_or(0, Vec::len)
    }

    /// Runs every handler of the annotation's project in registration order.
    ///
    /// All handlers are attempted; the first failure is returned once the
    /// rest have run.
    pub async fn publish(&self, annotation: &A) -> Result<()> {
        let handlers = self
            .handlers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&annotation.project_id())
            .cloned()
            .unwrap_or_default();

        let mut first_error = None;
        for handler in handlers {
            if let Err(err) = handler.handle(annotation).await {
                error!(
                    "Export storage {} failed to handle annotation {}: {err}",
                    handler.storage_id(),
                    annotation.id()
                );
                first_error.get_or_insert(err);
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base::EntityId;
    use std::sync::Mutex;

    struct Note(EntityId, ProjectId);

    impl Annotation for Note {
        fn id(&self) -> EntityId {
            self.0
        }

        fn project_id(&self) -> ProjectId {
            self.1
        }
    }

    struct Recorder {
        storage_id: StorageId,
        fail: bool,
        log: Arc<Mutex<Vec<(StorageId, EntityId)>>>,
    }

    #[async_trait]
    impl ExportHandler<Note> for Recorder {
        fn storage_id(&self) -> StorageId {
            self.storage_id
        }

        async fn handle(&self, note: &Note) -> Result<()> {
            self.log.lock().unwrap().push((self.storage_id, note.id()));
            if self.fail {
                return Err(Error::connection(format!("storage {} down", self.storage_id)));
            }
            Ok(())
        }
    }

    fn recorder(
        storage_id: StorageId,
        fail: bool,
        log: &Arc<Mutex<Vec<(StorageId, EntityId)>>>,
    ) -> Arc<dyn ExportHandler<Note>> {
        Arc::new(Recorder {
            storage_id,
            fail,
            log: log.clone(),
        })
    }

    #[tokio::test]
    async fn publish_runs_project_handlers_in_order() -> Result<()> {
        let log = Arc::new(Mutex::new(Vec::new()));
        let dispatcher = ExportDispatcher::new();
        dispatcher.register(1, recorder(10, false, &log));
        dispatcher.register(1, recorder(11, false, &log));
        dispatcher.register(2, recorder(20, false, &log));

        dispatcher.publish(&Note(5, 1)).await?;
        assert_eq!(*log.lock().unwrap(), vec![(10, 5), (11, 5)]);

        dispatcher.publish(&Note(6, 3)).await?;
        assert_eq!(log.lock().unwrap().len(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn every_handler_runs_and_first_error_wins() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let dispatcher = ExportDispatcher::new();
        dispatcher.register(1, recorder(10, true, &log));
        dispatcher.register(1, recorder(11, true, &log));
        dispatcher.register(1, recorder(12, false, &log));

        let err = dispatcher.publish(&Note(5, 1)).await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "connection to remote store failed: storage 10 down"
        );
        assert_eq!(log.lock().unwrap().len(), 3);
    }

    #[test]
    fn register_replaces_and_unregister_removes() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let dispatcher = ExportDispatcher::new();
        dispatcher.register(1, recorder(10, false, &log));
        dispatcher.register(1, recorder(10, true, &log));
        assert_eq!(dispatcher.handler_count(1), 1);

        assert!(dispatcher.unregister(1, 10));
        assert!(!dispatcher.unregister(1, 10));
        assert_eq!(dispatcher.handler_count(1), 0);
    }
}
