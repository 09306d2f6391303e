//! The query engine.
//!
//! [`ElasticQuery`] compiles filters built with [`Filters`] and [`BoolQueryBuilder`],
//! sorts, aggregations, suggesters, scoring and collapsing into one search request and
//! executes it as a page, an aggregation-only search or a block-wise [`EntityStream`].
//!
//! Composite aggregations are paged with compound after-keys: the `after_key` of a
//! response is handed out as one opaque string by [`AggregationResult::compound_after_key`]
//! and fed back via [`AggregationBuilder::with_compound_after_key`].

mod after_key;
mod aggregation;
mod bool_query;
mod elastic_query;
mod filters;
mod inner_hits;
mod knn;
mod results;
mod scoring;
mod sort;
mod stream;
mod suggest;

pub use after_key::{decode_after_key, encode_after_key};
pub use aggregation::{AggregationBuilder, DEFAULT_TERM_AGGREGATION_BUCKET_COUNT, DateRange};
pub use bool_query::BoolQueryBuilder;
pub use elastic_query::ElasticQuery;
pub use filters::{Filters, ID_FIELD};
pub use inner_hits::InnerHitsBuilder;
pub use knn::NearestNeighborsSearch;
pub use results::{AggregationResult, Bucket};
pub use scoring::{DecayFunction, FunctionScoreBuilder, ScriptScoreBuilder};
pub use sort::{SortBuilder, SortMode, SortOrder};
pub use stream::EntityStream;
pub use suggest::{
    SuggestBuilder, SuggestMode, SuggestOption, SuggestionQuery, SuggestionResult, TermSuggestion,
};
