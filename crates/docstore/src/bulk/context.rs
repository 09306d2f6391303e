//! The strict bulk pipeline.

use crate::client::RefreshPolicy;
use crate::error::StorageResult;
use crate::mapper::Elastic;
use crate::schema::Entity;

use super::command::CommandBuffer;
use super::result::BulkResult;

/// Queued commands beyond this multiple of the batch size are flushed implicitly.
const HARD_LIMIT_FACTOR: usize = 4;

/// Collects writes and deletes and submits them as bulk requests.
///
/// Not meant to be shared between tasks. Poll [`should_commit`](Self::should_commit)
/// and [`commit`](Self::commit) to handle failures per flush. Once the buffer reaches
/// four times the configured batch size it is flushed implicitly and any failure is
/// returned from the call which queued the last command.
///
/// Queued entities receive their ids right away. Pass them to
/// [`BulkResult::acknowledge`] after a commit to pick up their concurrency tokens.
///
/// ```no_run
/// # use helios_docstore::Elastic;
/// # use helios_docstore::schema::Entity;
/// # async fn run<E: Entity>(elastic: &Elastic, mut entities: Vec<E>) -> helios_docstore::StorageResult<()> {
/// let mut bulk = elastic.batch();
/// for entity in entities.iter_mut() {
///     bulk.try_update(entity).await?;
///     if bulk.should_commit() {
///         bulk.commit().await?.throw_failures()?;
///     }
/// }
/// bulk.close().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct BulkContext {
    elastic: Elastic,
    buffer: CommandBuffer,
    refresh: RefreshPolicy,
    batch_size: usize,
}

impl BulkContext {
    pub(crate) fn new(elastic: Elastic) -> Self {
        let batch_size = elastic.config().bulk_batch_size.max(1);
        Self {
            elastic,
            buffer: CommandBuffer::default(),
            refresh: RefreshPolicy::None,
            batch_size,
        }
    }

    /// Sets the refresh policy of all subsequent flushes.
    pub fn with_refresh(mut self, refresh: RefreshPolicy) -> Self {
        self.refresh = refresh;
        self
    }

    /// Queues a conditional write. Unchanged entities are skipped.
    pub async fn try_update<E: Entity>(&mut self, entity: &mut E) -> StorageResult<()> {
        self.buffer.queue_update(&self.elastic, entity, false)?;
        self.auto_commit().await
    }

    /// Queues an unconditional write. Unchanged entities are skipped.
    pub async fn overwrite<E: Entity>(&mut self, entity: &mut E) -> StorageResult<()> {
        self.buffer.queue_update(&self.elastic, entity, true)?;
        self.auto_commit().await
    }

    /// Queues a conditional delete.
    pub async fn try_delete<E: Entity>(&mut self, entity: &E) -> StorageResult<()> {
        self.buffer.queue_delete(&self.elastic, entity, false)?;
        self.auto_commit().await
    }

    /// Queues an unconditional delete.
    pub async fn force_delete<E: Entity>(&mut self, entity: &E) -> StorageResult<()> {
        self.buffer.queue_delete(&self.elastic, entity, true)?;
        self.auto_commit().await
    }

    /// Returns true once enough commands are queued to warrant a flush.
    pub fn should_commit(&self) -> bool {
        self.buffer.len() >= self.batch_size
    }

    /// Returns the number of queued commands.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Returns true if no commands are queued.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    async fn auto_commit(&mut self) -> StorageResult<()> {
        if self.buffer.len() >= self.batch_size * HARD_LIMIT_FACTOR {
            tracing::debug!(
                "Flushing {} queued bulk commands implicitly",
                self.buffer.len()
            );
            self.commit().await?.throw_failures()?;
        }
        Ok(())
    }

    /// Submits all queued commands.
    ///
    /// The buffer is empty afterwards, whether the request succeeded or not.
    pub async fn commit(&mut self) -> StorageResult<BulkResult> {
        if self.buffer.is_empty() {
            return Ok(BulkResult::empty());
        }

        let lines = self.buffer.take();
        let response = self
            .elastic
            .client()
            .bulk(&lines, self.refresh)
            .await
            .inspect_err(|e| {
                tracing::error!(
                    "An error occurred while executing a bulk update against Elasticsearch: {}",
                    e
                )
            })?;
        tracing::debug!("Bulk response: {}", response);

        Ok(BulkResult::new(response))
    }

    /// Submits all remaining commands, failing if any of them failed.
    pub async fn close(mut self) -> StorageResult<()> {
        self.commit().await?.throw_failures()
    }
}

impl Drop for BulkContext {
    fn drop(&mut self) {
        if !self.buffer.is_empty() {
            tracing::warn!(
                "A bulk context was dropped with {} uncommitted commands",
                self.buffer.len()
            );
        }
    }
}
