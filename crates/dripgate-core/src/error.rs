/// Errors from limiter construction and from [`wait`](crate::TokenBucket::wait).
///
/// Permit/deny decisions are plain booleans; nothing here is returned for an
/// empty bucket.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LimitError {
    #[error("rate interval must be at least one second")]
    ZeroInterval,

    #[error("host limiter needs a non-zero maximum number of entries")]
    ZeroCapacity,

    #[error("wait cancelled before tokens became available")]
    Cancelled,

    #[error("requested {requested} tokens but bucket capacity is {capacity}")]
    ExceedsCapacity { requested: u32, capacity: f64 },
}
