//! The lenient bulk pipeline.

use crate::client::RefreshPolicy;
use crate::error::StorageResult;
use crate::mapper::Elastic;
use crate::schema::Entity;

use super::command::CommandBuffer;
use super::result::BulkResult;

/// Collects writes and deletes and submits them in batches, reporting failures only as a flag.
///
/// The buffer is flushed whenever it reaches the configured batch size. Errors of a
/// flush are logged and never returned.
#[derive(Debug)]
pub struct BatchContext {
    elastic: Elastic,
    buffer: CommandBuffer,
    refresh: RefreshPolicy,
    batch_size: usize,
    failed_flushes: usize,
}

impl BatchContext {
    pub(crate) fn new(elastic: Elastic) -> Self {
        let batch_size = elastic.config().bulk_batch_size.max(1);
        Self {
            elastic,
            buffer: CommandBuffer::default(),
            refresh: RefreshPolicy::None,
            batch_size,
            failed_flushes: 0,
        }
    }

    /// Sets the refresh policy of all subsequent flushes.
    pub fn with_refresh(mut self, refresh: RefreshPolicy) -> Self {
        self.refresh = refresh;
        self
    }

    /// Queues a conditional write.
    pub async fn try_update<E: Entity>(&mut self, entity: &mut E) -> StorageResult<()> {
        self.buffer.queue_update(&self.elastic, entity, false)?;
        self.auto_commit().await;
        Ok(())
    }

    /// Queues an unconditional write.
    pub async fn overwrite<E: Entity>(&mut self, entity: &mut E) -> StorageResult<()> {
        self.buffer.queue_update(&self.elastic, entity, true)?;
        self.auto_commit().await;
        Ok(())
    }

    /// Queues a conditional delete.
    pub async fn try_delete<E: Entity>(&mut self, entity: &E) -> StorageResult<()> {
        self.buffer.queue_delete(&self.elastic, entity, false)?;
        self.auto_commit().await;
        Ok(())
    }

    /// Queues an unconditional delete.
    pub async fn force_delete<E: Entity>(&mut self, entity: &E) -> StorageResult<()> {
        self.buffer.queue_delete(&self.elastic, entity, true)?;
        self.auto_commit().await;
        Ok(())
    }

    /// Returns true if no commands are queued.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Returns the number of flushes which failed so far, implicit ones included.
    pub fn failed_flushes(&self) -> usize {
        self.failed_flushes
    }

    async fn auto_commit(&mut self) {
        if self.buffer.len() >= self.batch_size {
            self.commit().await;
        }
    }

    /// Submits all queued commands. Returns true if every command succeeded.
    ///
    /// The buffer is empty afterwards, whether the request succeeded or not.
    pub async fn commit(&mut self) -> bool {
        if self.buffer.is_empty() {
            return true;
        }

        let lines = self.buffer.take();
        let succeeded = match self.elastic.client().bulk(&lines, self.refresh).await {
            Ok(response) => {
                tracing::debug!("Bulk response: {}", response);
                let result = BulkResult::new(response);
                if !result.is_successful() {
                    tracing::warn!(
                        "Bulk update against Elasticsearch reported failures: {}",
                        result.failure_message().unwrap_or("unknown item type in response")
                    );
                }
                result.is_successful()
            }
            Err(e) => {
                tracing::error!(
                    "An error occurred while executing a bulk update against Elasticsearch: {}",
                    e
                );
                false
            }
        };

        if !succeeded {
            self.failed_flushes += 1;
        }
        succeeded
    }

    /// Submits all remaining commands. Returns true if every command succeeded.
    pub async fn close(mut self) -> bool {
        self.commit().await
    }
}

impl Drop for BatchContext {
    fn drop(&mut self) {
        if !self.buffer.is_empty() {
            tracing::warn!(
                "A batch context was dropped with {} uncommitted commands",
                self.buffer.len()
            );
        }
    }
}
