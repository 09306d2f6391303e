//! Fluent queries against the read alias of an entity type.

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use serde_json::{Map, Value, json};

use crate::client::call_site;
use crate::error::{BackendError, ConcurrencyError, QueryError, StorageResult};
use crate::mapper::Elastic;
use crate::routing::AccessMode;
use crate::schema::entity::load_hit;
use crate::schema::{DEFAULT_INNER_HITS, Entity, EntityDescriptor};
use crate::task::TaskContext;

use super::aggregation::{AggregationBuilder, DEFAULT_TERM_AGGREGATION_BUCKET_COUNT, DateRange};
use super::bool_query::BoolQueryBuilder;
use super::inner_hits::InnerHitsBuilder;
use super::knn::NearestNeighborsSearch;
use super::results::AggregationResult;
use super::scoring::{FunctionScoreBuilder, ScriptScoreBuilder};
use super::sort::{SortBuilder, SortOrder};
use super::stream::{BLOCK_SIZE_FOR_SINGLE_SHARD, BLOCK_SIZE_PER_SHARD, EntityStream, StreamRequest};
use super::suggest::{
    KEY_SUGGEST, SuggestBuilder, SuggestOption, TermSuggestion, build_suggest_section,
    parse_suggestions,
};

const KEY_QUERY: &str = "query";
const KEY_KNN: &str = "knn";
const KEY_SORT: &str = "sort";
const KEY_AGGS: &str = "aggs";
const KEY_POST_FILTER: &str = "post_filter";
const KEY_COLLAPSE: &str = "collapse";
const KEY_INNER_HITS: &str = "inner_hits";
const KEY_EXPLAIN: &str = "explain";
const KEY_SEQ_NO_PRIMARY_TERM: &str = "seq_no_primary_term";
const KEY_AGGREGATIONS: &str = "aggregations";
const FIELD_SCORE: &str = "_score";

#[derive(Debug, Clone, Default)]
enum QueryState {
    #[default]
    Unexecuted,
    Paged(Value),
    Aggregated(Value),
    Streaming,
}

/// A query for entities of type `E`.
///
/// Filters, sorts, aggregations and scoring are collected by the builder methods and
/// compiled into one search request when the query is executed. Depending on `limit`
/// a query is executed in one of several modes:
///
/// * `limit` within `max_page_size`: one page of hits is fetched via
///   [`query_list`](Self::query_list) or [`iterate`](Self::iterate).
/// * `limit` of zero or above `max_page_size`: all matches are streamed block-wise
///   within a point-in-time cursor. `skip` is not supported then.
/// * [`compute_aggregations`](Self::compute_aggregations) fetches no hits at all.
///
/// A query is meant to be built and executed once. Use [`copy`](Self::copy) to branch
/// variants from a common base.
pub struct ElasticQuery<E: Entity> {
    elastic: Elastic,
    descriptor: Arc<EntityDescriptor>,
    additional_descriptors: Vec<Arc<EntityDescriptor>>,
    query: BoolQueryBuilder,
    post_filters: BoolQueryBuilder,
    sorts: Vec<Value>,
    aggregations: Vec<AggregationBuilder>,
    suggesters: Vec<SuggestBuilder>,
    collapse_by: Option<String>,
    inner_hits: Vec<InnerHitsBuilder>,
    function_score: Option<FunctionScoreBuilder>,
    script_score: Option<ScriptScoreBuilder>,
    knn: Option<NearestNeighborsSearch>,
    routing: Option<String>,
    unrouted: bool,
    explain: bool,
    limit: usize,
    skip: usize,
    task: TaskContext,
    state: QueryState,
    _marker: PhantomData<fn() -> E>,
}

impl<E: Entity> ElasticQuery<E> {
    pub(crate) fn new(elastic: Elastic, descriptor: Arc<EntityDescriptor>) -> Self {
        Self {
            elastic,
            descriptor,
            additional_descriptors: Vec::new(),
            query: BoolQueryBuilder::new(),
            post_filters: BoolQueryBuilder::new(),
            sorts: Vec::new(),
            aggregations: Vec::new(),
            suggesters: Vec::new(),
            collapse_by: None,
            inner_hits: Vec::new(),
            function_score: None,
            script_score: None,
            knn: None,
            routing: None,
            unrouted: false,
            explain: false,
            limit: 0,
            skip: 0,
            task: TaskContext::unbounded(),
            state: QueryState::Unexecuted,
            _marker: PhantomData,
        }
    }

    /// Creates an unexecuted copy with all filters, sorts, aggregations and settings.
    ///
    /// Every nested builder is copied, so both queries can be modified independently.
    pub fn copy(&self) -> Self {
        Self {
            elastic: self.elastic.clone(),
            descriptor: self.descriptor.clone(),
            additional_descriptors: self.additional_descriptors.clone(),
            query: self.query.clone(),
            post_filters: self.post_filters.clone(),
            sorts: self.sorts.clone(),
            aggregations: self.aggregations.clone(),
            suggesters: self.suggesters.clone(),
            collapse_by: self.collapse_by.clone(),
            inner_hits: self.inner_hits.clone(),
            function_score: self.function_score.clone(),
            script_score: self.script_score.clone(),
            knn: self.knn.clone(),
            routing: self.routing.clone(),
            unrouted: self.unrouted,
            explain: self.explain,
            limit: self.limit,
            skip: self.skip,
            task: self.task.clone(),
            state: QueryState::Unexecuted,
            _marker: PhantomData,
        }
    }

    /// Returns the descriptor of the primary type.
    pub fn descriptor(&self) -> &EntityDescriptor {
        &self.descriptor
    }

    /// Also searches entities of type `F`.
    ///
    /// Hits are decoded as `E`, so `F` has to be compatible. Routing decisions are
    /// made for `E` only.
    pub fn with_additional_type<F: Entity>(mut self) -> StorageResult<Self> {
        self.additional_descriptors
            .push(self.elastic.descriptor::<F>()?);
        Ok(self)
    }

    /// Adds a scoring clause which must match. `None` is ignored.
    pub fn must(mut self, clause: impl Into<Option<Value>>) -> Self {
        self.query.must(clause);
        self
    }

    /// Adds a clause which must not match. `None` is ignored.
    pub fn must_not(mut self, clause: impl Into<Option<Value>>) -> Self {
        self.query.must_not(clause);
        self
    }

    /// Adds a non-scoring clause which must match. `None` is ignored.
    pub fn filter(mut self, clause: impl Into<Option<Value>>) -> Self {
        self.query.filter(clause);
        self
    }

    /// Alias of [`filter`](Self::filter).
    pub fn where_(self, clause: impl Into<Option<Value>>) -> Self {
        self.filter(clause)
    }

    /// Adds a filter applied after aggregations were computed. `None` is ignored.
    ///
    /// Post filters narrow the hits without affecting aggregation counts.
    pub fn post_filter(mut self, clause: impl Into<Option<Value>>) -> Self {
        self.post_filters.filter(clause);
        self
    }

    /// Removes all `must` and `filter` clauses matching the predicate from the query and
    /// hands each of them to the consumer along with the post filters.
    pub fn rewrite_filters(
        mut self,
        predicate: impl FnMut(&Value) -> bool,
        mut consumer: impl FnMut(Value, &mut BoolQueryBuilder),
    ) -> Self {
        for clause in self.query.remove_filter_if(predicate) {
            consumer(clause, &mut self.post_filters);
        }
        self
    }

    /// Turns all `must` and `filter` clauses matching the predicate into post filters.
    pub fn move_to_post_filter(self, predicate: impl FnMut(&Value) -> bool) -> Self {
        self.rewrite_filters(predicate, |clause, post_filters| {
            post_filters.filter(clause);
        })
    }

    /// Adds a sort.
    pub fn sort(mut self, sort: SortBuilder) -> Self {
        self.sorts.push(sort.build());
        self
    }

    /// Adds a raw sort specification.
    pub fn sort_raw(mut self, sort: Value) -> Self {
        self.sorts.push(sort);
        self
    }

    /// Sorts ascending by a field.
    pub fn order_asc(self, field: &str) -> Self {
        self.sort(SortBuilder::field(field).order(SortOrder::Asc))
    }

    /// Sorts descending by a field.
    pub fn order_desc(self, field: &str) -> Self {
        self.sort(SortBuilder::field(field).order(SortOrder::Desc))
    }

    /// Sorts by relevance, least relevant first.
    pub fn order_by_score_asc(self) -> Self {
        self.order_asc(FIELD_SCORE)
    }

    /// Sorts by relevance, most relevant first.
    pub fn order_by_score_desc(self) -> Self {
        self.order_desc(FIELD_SCORE)
    }

    /// Returns matches in random order.
    ///
    /// Replaces any other scoring of the query.
    pub fn order_random(self) -> Self {
        self.order_random_with_seed(rand::random::<i32>().into())
    }

    /// Returns matches in a random order which is stable for the same seed.
    pub fn order_random_with_seed(mut self, seed: i64) -> Self {
        self.function_score = None;
        self.script_score = Some(ScriptScoreBuilder::random_score(seed));
        self.order_by_score_desc()
    }

    /// Scores matches by the given functions.
    pub fn function_score(mut self, function_score: FunctionScoreBuilder) -> Self {
        self.function_score = Some(function_score);
        self
    }

    /// Scores matches by a script. Takes precedence over a function score.
    pub fn script_score(mut self, script_score: ScriptScoreBuilder) -> Self {
        self.script_score = Some(script_score);
        self
    }

    /// Adds an approximate nearest neighbor search.
    pub fn knn(mut self, search: NearestNeighborsSearch) -> Self {
        self.knn = Some(search);
        self
    }

    /// Returns only the best match per value of the field.
    pub fn collapse(mut self, field: &str) -> Self {
        self.collapse_by = Some(field.to_string());
        self
    }

    /// Adds inner hits listing the best members of each collapsed group.
    ///
    /// The hits are available via [`Entity::inner_hits`] using the builder's name.
    pub fn add_collapsed_inner_hits(mut self, inner_hits: InnerHitsBuilder) -> Self {
        self.inner_hits.push(inner_hits);
        self
    }

    /// Adds inner hits named [`DEFAULT_INNER_HITS`] with up to `size` members per group.
    pub fn add_default_inner_hits(self, size: usize) -> Self {
        self.add_collapsed_inner_hits(InnerHitsBuilder::new(DEFAULT_INNER_HITS, size))
    }

    /// Adds an aggregation, replacing one with the same name.
    pub fn add_aggregation(mut self, aggregation: AggregationBuilder) -> Self {
        self.aggregations
            .retain(|existing| existing.name() != aggregation.name());
        self.aggregations.push(aggregation);
        self
    }

    /// Adds a suggester, replacing one with the same name.
    ///
    /// Suggestions are computed by paged and aggregation-only executions but not by streams.
    pub fn add_suggester(mut self, suggester: SuggestBuilder) -> Self {
        self.suggesters
            .retain(|existing| existing.name() != suggester.name());
        self.suggesters.push(suggester);
        self
    }

    /// Adds a term aggregation named like the field.
    pub fn add_term_aggregation(self, field: &str) -> Self {
        self.add_term_aggregation_named(field, field, DEFAULT_TERM_AGGREGATION_BUCKET_COUNT)
    }

    /// Adds a term aggregation with the given name and bucket count.
    pub fn add_term_aggregation_named(self, name: &str, field: &str, size: usize) -> Self {
        self.add_aggregation(AggregationBuilder::terms(name, field).size(size))
    }

    /// Adds a date range aggregation.
    pub fn add_date_aggregation(self, name: &str, field: &str, ranges: &[DateRange]) -> Self {
        self.add_aggregation(AggregationBuilder::date_range(name, field, ranges))
    }

    /// Routes the query to the shard of the given routing value.
    pub fn routing(mut self, routing: &str) -> Self {
        self.routing = Some(routing.to_string());
        self
    }

    /// Searches a routed type across all shards without a warning.
    pub fn deliberately_unrouted(mut self) -> Self {
        self.unrouted = true;
        self
    }

    /// Asks the server to explain the score of each hit.
    ///
    /// Only meant for debugging as it is expensive.
    pub fn explain(mut self) -> Self {
        self.explain = true;
        self
    }

    /// Limits the number of results, zero for no limit.
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    /// Skips the first results.
    pub fn skip(mut self, skip: usize) -> Self {
        self.skip = skip;
        self
    }

    /// Sets the task context checked between blocks when results are streamed.
    pub fn with_task(mut self, task: TaskContext) -> Self {
        self.task = task;
        self
    }

    fn index_expression(&self) -> String {
        std::iter::once(&self.descriptor)
            .chain(self.additional_descriptors.iter())
            .map(|descriptor| self.elastic.determine_read_alias(descriptor))
            .collect::<Vec<_>>()
            .join(",")
    }

    fn effective_routing(&self, mode: AccessMode) -> Option<String> {
        let routing =
            self.elastic
                .routing()
                .filter_routing(&self.descriptor, mode, self.routing.as_deref());
        if !(self.unrouted && routing.is_none()) {
            self.elastic
                .routing()
                .check_routing(&self.descriptor, mode, routing.as_deref(), "query");
        }
        routing
    }

    fn build_query(&self) -> Option<Value> {
        let query = self.query.build();
        if let Some(ref script_score) = self.script_score {
            return Some(script_score.apply(query));
        }
        if let Some(ref function_score) = self.function_score {
            return Some(function_score.apply(query));
        }
        query
    }

    fn build_payload(&self) -> Map<String, Value> {
        let mut payload = Map::new();
        if self.descriptor.is_versioned() {
            payload.insert(KEY_SEQ_NO_PRIMARY_TERM.to_string(), json!(true));
        }
        if self.explain {
            payload.insert(KEY_EXPLAIN.to_string(), json!(true));
        }
        if let Some(query) = self.build_query() {
            payload.insert(KEY_QUERY.to_string(), query);
        }
        if let Some(ref knn) = self.knn {
            payload.insert(KEY_KNN.to_string(), knn.build());
        }
        if !self.sorts.is_empty() {
            payload.insert(KEY_SORT.to_string(), json!(self.sorts));
        }
        if !self.aggregations.is_empty() {
            let aggregations: Map<String, Value> = self
                .aggregations
                .iter()
                .map(|aggregation| (aggregation.name().to_string(), aggregation.build()))
                .collect();
            payload.insert(KEY_AGGS.to_string(), Value::Object(aggregations));
        }
        if let Some(suggest) = build_suggest_section(&self.suggesters) {
            payload.insert(KEY_SUGGEST.to_string(), suggest);
        }
        if let Some(post_filter) = self.post_filters.build() {
            payload.insert(KEY_POST_FILTER.to_string(), post_filter);
        }
        if let Some(ref field) = self.collapse_by {
            let mut collapse = Map::new();
            collapse.insert("field".to_string(), json!(field));
            if !self.inner_hits.is_empty() {
                collapse.insert(
                    KEY_INNER_HITS.to_string(),
                    Value::Array(self.inner_hits.iter().map(InnerHitsBuilder::build).collect()),
                );
            }
            payload.insert(KEY_COLLAPSE.to_string(), Value::Object(collapse));
        }
        payload
    }

    fn build_simple_payload(&self) -> Value {
        match self.query.build() {
            Some(query) => json!({ KEY_QUERY: query }),
            None => json!({}),
        }
    }

    /// Renders the search request this query executes.
    pub fn payload(&self) -> Value {
        Value::Object(self.build_payload())
    }

    fn warn_if_bounded(&self, action: &str) {
        if self.skip > 0 || self.limit > 0 {
            tracing::warn!(
                "{} queries support neither skip nor limit: {}\n{}",
                action,
                self,
                call_site()
            );
        }
    }

    /// Counts the matching entities.
    pub async fn count(&self) -> StorageResult<u64> {
        self.warn_if_bounded("COUNT");
        let routing = self.effective_routing(AccessMode::Read);
        self.elastic
            .client()
            .count(
                &self.index_expression(),
                routing.as_deref(),
                self.build_simple_payload(),
            )
            .await
    }

    /// Determines if at least one entity matches.
    pub async fn exists(&self) -> StorageResult<bool> {
        self.warn_if_bounded("EXISTS");
        let routing = self.effective_routing(AccessMode::Read);
        self.elastic
            .client()
            .exists(
                &self.index_expression(),
                routing.as_deref(),
                self.build_simple_payload(),
            )
            .await
    }

    fn uses_streaming(&self) -> bool {
        self.limit == 0 || self.limit > self.elastic.config().max_page_size
    }

    fn parse_hits(&self, response: &Value) -> StorageResult<Vec<E>> {
        response
            .pointer("/hits/hits")
            .and_then(Value::as_array)
            .map(|hits| {
                hits.iter()
                    .map(|hit| load_hit(&self.descriptor, hit))
                    .collect()
            })
            .unwrap_or_else(|| Ok(Vec::new()))
    }

    async fn fetch_page(&mut self) -> StorageResult<Vec<E>> {
        let routing = self.effective_routing(AccessMode::Read);
        let response = self
            .elastic
            .client()
            .search(
                &self.index_expression(),
                routing.as_deref(),
                self.skip,
                self.limit,
                Value::Object(self.build_payload()),
            )
            .await?;
        let entities = self.parse_hits(&response)?;
        self.state = QueryState::Paged(response);
        Ok(entities)
    }

    async fn open_stream(&mut self, limit: Option<usize>) -> StorageResult<EntityStream<E>> {
        let routing = self.effective_routing(AccessMode::Read);
        let block_size = if routing.is_some() {
            BLOCK_SIZE_FOR_SINGLE_SHARD
        } else {
            let shards = self
                .elastic
                .config()
                .realm_settings(self.descriptor.realm())
                .number_of_shards as usize;
            BLOCK_SIZE_PER_SHARD * shards.max(1)
        };

        let mut payload = self.build_payload();
        payload.remove(KEY_AGGS);
        payload.remove(KEY_SUGGEST);

        self.state = QueryState::Streaming;
        EntityStream::open(
            self.elastic.clone(),
            self.descriptor.clone(),
            StreamRequest {
                index: self.index_expression(),
                routing,
                payload,
                block_size,
                limit,
            },
            self.task.clone(),
        )
        .await
    }

    async fn open_implicit_stream(&mut self) -> StorageResult<EntityStream<E>> {
        if self.skip > 0 {
            return Err(QueryError::SkipWithStreaming { skip: self.skip }.into());
        }
        let limit = (self.limit > 0).then_some(self.limit);
        self.open_stream(limit).await
    }

    /// Calls the handler for each match until it returns false.
    pub async fn iterate(&mut self, mut handler: impl FnMut(E) -> bool) -> StorageResult<()> {
        if !self.uses_streaming() {
            for entity in self.fetch_page().await? {
                if !handler(entity) {
                    break;
                }
            }
            return Ok(());
        }

        let mut stream = self.open_implicit_stream().await?;
        while let Some(entity) = stream.next().await? {
            if !handler(entity) {
                break;
            }
        }
        stream.close().await
    }

    /// Calls the handler for each match.
    pub async fn iterate_all(&mut self, mut handler: impl FnMut(E)) -> StorageResult<()> {
        self.iterate(|entity| {
            handler(entity);
            true
        })
        .await
    }

    /// Returns all matches.
    pub async fn query_list(&mut self) -> StorageResult<Vec<E>> {
        let mut entities = Vec::new();
        self.iterate_all(|entity| entities.push(entity)).await?;
        Ok(entities)
    }

    /// Returns the first match.
    pub async fn first(&mut self) -> StorageResult<Option<E>> {
        self.limit = 1;
        Ok(self.fetch_page().await?.into_iter().next())
    }

    /// Streams all matches block-wise.
    ///
    /// Fails for queries with a limit or skip, as these are bounded by definition.
    pub async fn stream(&mut self, task: TaskContext) -> StorageResult<EntityStream<E>> {
        if self.limit > 0 || self.skip > 0 {
            return Err(QueryError::BoundedStream {
                limit: self.limit,
                skip: self.skip,
            }
            .into());
        }
        self.task = task;
        self.open_stream(None).await
    }

    /// Computes the aggregations without fetching any hits.
    ///
    /// Requires a limit of zero.
    pub async fn compute_aggregations(&mut self) -> StorageResult<()> {
        if self.limit != 0 {
            return Err(QueryError::AggregationWithLimit { limit: self.limit }.into());
        }

        let routing = self.effective_routing(AccessMode::Read);
        let response = self
            .elastic
            .client()
            .search(
                &self.index_expression(),
                routing.as_deref(),
                self.skip,
                0,
                Value::Object(self.build_payload()),
            )
            .await?;
        self.state = QueryState::Aggregated(response);
        Ok(())
    }

    fn response(&self, accessor: &str) -> StorageResult<&Value> {
        match self.state {
            QueryState::Paged(ref response) | QueryState::Aggregated(ref response) => Ok(response),
            QueryState::Unexecuted => Err(QueryError::NotExecuted {
                accessor: accessor.to_string(),
            }
            .into()),
            QueryState::Streaming => Err(QueryError::Streaming {
                accessor: accessor.to_string(),
            }
            .into()),
        }
    }

    /// Returns the result of an aggregation, empty if the response lacks it.
    pub fn aggregation(&self, name: &str) -> StorageResult<AggregationResult> {
        let response = self.response("aggregation")?;
        Ok(AggregationResult::new(
            response
                .get(KEY_AGGREGATIONS)
                .and_then(|aggregations| aggregations.get(name))
                .cloned(),
        ))
    }

    /// Returns the key and document count of each bucket of an aggregation.
    pub fn aggregation_buckets(&self, name: &str) -> StorageResult<Vec<(String, u64)>> {
        let response = self.response("aggregation_buckets")?;
        Ok(AggregationResult::new(
            response
                .get(KEY_AGGREGATIONS)
                .and_then(|aggregations| aggregations.get(name))
                .cloned(),
        )
        .term_counts())
    }

    /// Returns the parts reported by the suggester `name`, empty if the response lacks it.
    pub fn suggestions(&self, name: &str) -> StorageResult<Vec<TermSuggestion>> {
        parse_suggestions(self.response("suggestions")?, name)
    }

    /// Returns the options of all parts reported by the suggester `name`.
    pub fn suggest_options(&self, name: &str) -> StorageResult<Vec<SuggestOption>> {
        Ok(self
            .suggestions(name)?
            .into_iter()
            .flat_map(|part| part.options)
            .collect())
    }

    /// Returns the `aggregations` section of the response.
    pub fn raw_aggregations(&self) -> StorageResult<Option<&Value>> {
        Ok(self.response("raw_aggregations")?.get(KEY_AGGREGATIONS))
    }

    /// Returns the complete response.
    pub fn raw_response(&self) -> StorageResult<&Value> {
        self.response("raw_response")
    }

    /// Returns the total number of matches reported by the server.
    pub fn total_hits(&self) -> StorageResult<u64> {
        Ok(self
            .response("total_hits")?
            .pointer("/hits/total/value")
            .and_then(Value::as_u64)
            .unwrap_or(0))
    }

    /// Deletes each match, checking its concurrency tokens.
    pub async fn delete_all(&mut self) -> StorageResult<()> {
        let elastic = self.elastic.clone();
        if !self.uses_streaming() {
            for entity in self.fetch_page().await? {
                elastic.delete(&entity).await?;
            }
            return Ok(());
        }

        let mut stream = self.open_implicit_stream().await?;
        while let Some(entity) = stream.next().await? {
            elastic.delete(&entity).await?;
        }
        stream.close().await
    }

    /// Deletes all matches on the server side.
    ///
    /// A timeout or version conflicts are reported as a retryable concurrency error.
    pub async fn truncate(&self) -> StorageResult<()> {
        let routing = self.effective_routing(AccessMode::Write);
        let alias = self.elastic.determine_write_alias(&self.descriptor);
        let response = self
            .elastic
            .client()
            .delete_by_query(&alias, routing.as_deref(), self.build_simple_payload())
            .await?;

        let timed_out = response
            .get("timed_out")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let conflicts = response
            .get("version_conflicts")
            .and_then(Value::as_u64)
            .unwrap_or(0);
        if timed_out || conflicts > 0 {
            return Err(ConcurrencyError::TruncateConflict {
                alias,
                reason: format!("timed out: {}, version conflicts: {}", timed_out, conflicts),
            }
            .into());
        }

        let failures: Vec<String> = response
            .get("failures")
            .and_then(Value::as_array)
            .map(|failures| failures.iter().map(Value::to_string).collect())
            .unwrap_or_default();
        if !failures.is_empty() {
            tracing::error!("Truncate of {} failed: {}", alias, failures.join("; "));
            return Err(BackendError::TruncateAborted { reasons: failures }.into());
        }

        let deleted = response
            .get("deleted")
            .and_then(Value::as_u64)
            .unwrap_or(0);
        tracing::debug!("Truncated {}: {} documents deleted", alias, deleted);
        Ok(())
    }
}

impl<E: Entity> Clone for ElasticQuery<E> {
    fn clone(&self) -> Self {
        Self {
            state: self.state.clone(),
            ..self.copy()
        }
    }
}

impl<E: Entity> fmt::Display for ElasticQuery<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.descriptor.type_name(), self.payload())
    }
}

impl<E: Entity> fmt::Debug for ElasticQuery<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ElasticQuery")
            .field("entity", &self.descriptor.type_name())
            .field("payload", &self.payload())
            .field("routing", &self.routing)
            .field("limit", &self.limit)
            .field("skip", &self.skip)
            .field("state", &self.state)
            .finish()
    }
}
