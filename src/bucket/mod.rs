//! Client-side token bucket with externally persisted state.
//!
//! The bucket paces a single logical caller before a costly request leaves
//! it. Its state lives in a [`StateStore`] so it survives reloads.

mod limiter;
mod state;
mod store;

pub use limiter::{
    BucketConfig, BucketDecision, TokenBucketLimiter, DEFAULT_REQUESTS_PER_MINUTE,
    DEFAULT_STORAGE_KEY,
};
pub use state::BucketState;
pub use store::{FileStore, MemoryStore, StateStore};
