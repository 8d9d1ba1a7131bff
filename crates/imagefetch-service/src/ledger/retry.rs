use crate::error::ServiceErrorCode;

/// Decides whether a failed request is replaced by a new attempt when it is requested again.
///
/// Returns the retry count of the new attempt, or `None` if the failed request should be handed
/// out as is. Every failure except an unavailable network uses up one of the
/// `max_retry_attempts`, so a key fails at most `max_retry_attempts` times before callers get the
/// stale failure. Missing resources are never retried. A request that failed because the network
/// was unavailable is retried with its count unchanged.
pub fn next_retry_count(
    code: ServiceErrorCode,
    retry_count: u32,
    max_retry_attempts: u32,
) -> Option<u32> {
    match code {
        ServiceErrorCode::ResourceNotFound => None,
        ServiceErrorCode::NetworkUnavailable => Some(retry_count),
        _ => {
            let next = retry_count.saturating_add(1);
            (next < max_retry_attempts).then_some(next)
        }
    }
}
