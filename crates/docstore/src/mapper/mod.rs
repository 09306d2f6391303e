//! Reading and writing entities with routing and optimistic concurrency control.

mod elastic;
mod retry;

pub use elastic::Elastic;
pub use retry::retry_on_conflict;
