use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::store::{TaskQuery, TaskStore, UpdateOptions};
use crate::task::{Task, TaskPatch};

use super::{SourceError, SourceEvent, SourceKind, TaskSource, LOCAL_SOURCE_ID};

/// Presents the local store through the [`TaskSource`] contract so the sync
/// engine sees one uniform adapter shape.
pub struct LocalSource {
    store: TaskStore,
    events: broadcast::Sender<SourceEvent>,
}

impl LocalSource {
    pub fn new(store: TaskStore) -> Self {
        let (events, _) = broadcast::channel(256);

        // Re-shape store notifications into adapter change events.
        let mut store_rx = store.subscribe();
        let tx = events.clone();
        tokio::spawn(async move {
            loop {
                match store_rx.recv().await {
                    Ok(_) => {
                        let _ = tx.send(SourceEvent {
                            source_id: LOCAL_SOURCE_ID.to_string(),
                        });
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        Self { store, events }
    }

    pub fn store(&self) -> &TaskStore {
        &self.store
    }
}

#[async_trait]
impl TaskSource for LocalSource {
    fn id(&self) -> &str {
        LOCAL_SOURCE_ID
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Local
    }

    async fn get_tasks(&self) -> Result<Vec<Task>, SourceError> {
        Ok(self.store.get_all_tasks(&TaskQuery::default()).await)
    }

    async fn create_task(&self, task: &Task) -> Result<String, SourceError> {
        let imported = self.store.import_task(task).await?;
        Ok(imported.id)
    }

    async fn update_task(&self, external_id: &str, patch: &TaskPatch) -> Result<(), SourceError> {
        self.store
            .update_task(external_id, patch.clone(), UpdateOptions::default())
            .await?;
        Ok(())
    }

    async fn delete_task(&self, external_id: &str) -> Result<(), SourceError> {
        self.store.delete_task(external_id).await?;
        Ok(())
    }

    fn subscribe(&self) -> Option<broadcast::Receiver<SourceEvent>> {
        Some(self.events.subscribe())
    }
}
