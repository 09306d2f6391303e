//! Block-wise streaming over a point-in-time cursor.

use std::collections::VecDeque;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value, json};

use crate::config::es_time_value;
use crate::error::StorageResult;
use crate::mapper::Elastic;
use crate::schema::entity::load_hit;
use crate::schema::{DOCUMENT_ID_FIELD, Entity, EntityDescriptor};
use crate::task::TaskContext;

use super::filters::ID_FIELD;

/// Block size when a single shard is pinned via routing.
pub(crate) const BLOCK_SIZE_FOR_SINGLE_SHARD: usize = 50;
/// Block size per shard when a search fans out across all shards.
pub(crate) const BLOCK_SIZE_PER_SHARD: usize = 10;

const KEY_PIT: &str = "pit";
const KEY_PIT_ID: &str = "pit_id";
const KEY_SORT: &str = "sort";
const KEY_SEARCH_AFTER: &str = "search_after";

/// What a stream is opened for.
pub(crate) struct StreamRequest {
    pub(crate) index: String,
    pub(crate) routing: Option<String>,
    pub(crate) payload: Map<String, Value>,
    pub(crate) block_size: usize,
    pub(crate) limit: Option<usize>,
}

/// Yields all entities matching a query, fetched in blocks within a point-in-time cursor.
///
/// Entities are ordered by the sorts of the query, ties broken by ascending id. The
/// cursor sees the index as it was when the stream was opened. The stream stops early
/// once its [`TaskContext`] becomes inactive.
///
/// The cursor is released when the stream is exhausted or [`close`](Self::close)d. A
/// stream dropped while still open releases it in the background.
///
/// ```no_run
/// # use helios_docstore::{Elastic, StorageResult, TaskContext};
/// # use helios_docstore::schema::Entity;
/// # async fn example<E: Entity>(elastic: &Elastic) -> StorageResult<()> {
/// let mut stream = elastic.select::<E>()?.stream(TaskContext::unbounded()).await?;
/// while let Some(entity) = stream.next().await? {
///     println!("{:?}", entity.id());
/// }
/// # Ok(())
/// # }
/// ```
pub struct EntityStream<E: Entity> {
    elastic: Elastic,
    descriptor: Arc<EntityDescriptor>,
    payload: Map<String, Value>,
    block_size: usize,
    keep_alive: Duration,
    task: TaskContext,
    pit_id: Option<String>,
    search_after: Option<Value>,
    buffer: VecDeque<E>,
    last_id: Option<String>,
    exhausted: bool,
    remaining: Option<usize>,
    _marker: PhantomData<fn() -> E>,
}

impl<E: Entity> std::fmt::Debug for EntityStream<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityStream")
            .field("entity", &self.descriptor.type_name())
            .field("block_size", &self.block_size)
            .field("open", &self.pit_id.is_some())
            .field("buffered", &self.buffer.len())
            .field("exhausted", &self.exhausted)
            .finish()
    }
}

impl<E: Entity> EntityStream<E> {
    pub(crate) async fn open(
        elastic: Elastic,
        descriptor: Arc<EntityDescriptor>,
        request: StreamRequest,
        task: TaskContext,
    ) -> StorageResult<Self> {
        let keep_alive = elastic.config().stream_keep_alive()?;

        let mut payload = request.payload;
        let mut sorts = match payload.remove(KEY_SORT) {
            Some(Value::Array(sorts)) => sorts,
            _ => Vec::new(),
        };
        sorts.push(json!({ DOCUMENT_ID_FIELD: {"order": "asc"} }));
        payload.insert(KEY_SORT.to_string(), Value::Array(sorts));
        payload.insert("size".to_string(), json!(request.block_size));
        payload.insert("track_total_hits".to_string(), json!(false));

        let mut stream = Self {
            elastic,
            descriptor,
            payload,
            block_size: request.block_size,
            keep_alive,
            task,
            pit_id: None,
            search_after: None,
            buffer: VecDeque::new(),
            last_id: None,
            exhausted: false,
            remaining: request.limit,
            _marker: PhantomData,
        };

        if !stream.task.is_active() {
            stream.exhausted = true;
            return Ok(stream);
        }

        let pit_id = stream
            .elastic
            .client()
            .open_point_in_time(&request.index, request.routing.as_deref(), keep_alive)
            .await?;
        tracing::debug!(
            "Opened point in time on {} for streaming {}",
            request.index,
            stream.descriptor.type_name()
        );
        stream.pit_id = Some(pit_id);

        Ok(stream)
    }

    /// Returns the next entity, `None` once all were consumed or the task was cancelled.
    pub async fn next(&mut self) -> StorageResult<Option<E>> {
        loop {
            if self.remaining == Some(0) {
                self.close().await?;
                return Ok(None);
            }

            if let Some(entity) = self.buffer.pop_front() {
                if let Some(remaining) = self.remaining.as_mut() {
                    *remaining -= 1;
                }
                return Ok(Some(entity));
            }

            if self.exhausted {
                self.close().await?;
                return Ok(None);
            }

            if !self.task.is_active() {
                tracing::debug!(
                    "Stopping stream of {} as its task is no longer active",
                    self.descriptor.type_name()
                );
                self.close().await?;
                return Ok(None);
            }

            self.fetch_block().await?;
        }
    }

    async fn fetch_block(&mut self) -> StorageResult<()> {
        let Some(pit_id) = self.pit_id.clone() else {
            self.exhausted = true;
            return Ok(());
        };

        let mut payload = self.payload.clone();
        payload.insert(
            KEY_PIT.to_string(),
            json!({"id": pit_id, "keep_alive": es_time_value(self.keep_alive)}),
        );
        if let Some(ref search_after) = self.search_after {
            payload.insert(KEY_SEARCH_AFTER.to_string(), search_after.clone());
        }

        let response = self
            .elastic
            .client()
            .search_point_in_time(Value::Object(payload))
            .await?;

        if let Some(pit_id) = response.get(KEY_PIT_ID).and_then(Value::as_str) {
            self.pit_id = Some(pit_id.to_string());
        }

        let hits = response
            .pointer("/hits/hits")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        if hits.len() < self.block_size {
            self.exhausted = true;
        }

        for hit in &hits {
            let id = hit.get(ID_FIELD).and_then(Value::as_str);
            if id.is_some() && id == self.last_id.as_deref() {
                continue;
            }
            self.last_id = id.map(str::to_string);
            self.buffer.push_back(load_hit(&self.descriptor, hit)?);
        }

        match hits.last().and_then(|hit| hit.get(KEY_SORT)) {
            Some(sort) => self.search_after = Some(sort.clone()),
            None => self.exhausted = true,
        }

        Ok(())
    }

    /// Releases the cursor. Closing twice is a no-op.
    pub async fn close(&mut self) -> StorageResult<()> {
        self.exhausted = true;
        self.buffer.clear();
        if let Some(pit_id) = self.pit_id.take() {
            self.elastic.client().close_point_in_time(&pit_id).await?;
        }
        Ok(())
    }

    /// Returns true until the cursor was released.
    pub fn is_open(&self) -> bool {
        self.pit_id.is_some()
    }
}

impl<E: Entity> Drop for EntityStream<E> {
    fn drop(&mut self) {
        let Some(pit_id) = self.pit_id.take() else {
            return;
        };

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let elastic = self.elastic.clone();
                handle.spawn(async move {
                    if let Err(e) = elastic.client().close_point_in_time(&pit_id).await {
                        tracing::warn!("Failed to release a point in time: {}", e);
                    }
                });
            }
            Err(_) => tracing::warn!(
                "A stream of {} was dropped outside of a runtime, its point in time expires after {}",
                self.descriptor.type_name(),
                es_time_value(self.keep_alive)
            ),
        }
    }
}
