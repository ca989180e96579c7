//! Fetch status codes
//!
//! Positive values are protocol response codes. Zero means the URI was never
//! attempted. Negative values are internal outcomes assigned by the engine or
//! by processors.

/// Not yet attempted
pub const S_UNATTEMPTED: i32 = 0;
/// DNS lookup for the host failed
pub const S_DOMAIN_UNRESOLVABLE: i32 = -1;
/// Connection could not be established
pub const S_CONNECT_FAILED: i32 = -2;
/// Connection dropped mid-transfer
pub const S_CONNECT_LOST: i32 = -3;
/// Transfer timed out
pub const S_TIMEOUT: i32 = -4;
/// A processor failed on this URI
pub const S_RUNTIME_EXCEPTION: i32 = -5;
/// A prerequisite must be satisfied first
pub const S_DEFERRED: i32 = -50;
/// Processing hit a resource exhaustion failure
pub const S_SERIOUS_ERROR: i32 = -3000;
pub const S_TOO_MANY_LINK_HOPS: i32 = -4001;
pub const S_TOO_MANY_EMBED_HOPS: i32 = -4002;
pub const S_OUT_OF_SCOPE: i32 = -5000;
pub const S_BLOCKED_BY_USER: i32 = -5001;
pub const S_BLOCKED_BY_CUSTOM_PROCESSOR: i32 = -5002;
pub const S_BLOCKED_BY_QUOTA: i32 = -5003;
pub const S_DELETED_BY_USER: i32 = -6000;
/// The worker holding this URI was killed by an operator
pub const S_PROCESSING_THREAD_KILLED: i32 = -7000;
pub const S_ROBOTS_PRECLUDED: i32 = -9998;

/// Returns true if the status describes a completed fetch
pub fn is_success(status: i32) -> bool {
    status > 0
}

/// Returns true if the URI was deliberately not fetched
///
/// Disregarded URIs are tallied separately from failures and do not
/// impose a politeness delay on their group.
pub fn is_disregarded(status: i32) -> bool {
    matches!(
        status,
        S_ROBOTS_PRECLUDED
            | S_BLOCKED_BY_CUSTOM_PROCESSOR
            | S_OUT_OF_SCOPE
            | S_BLOCKED_BY_USER
            | S_TOO_MANY_EMBED_HOPS
            | S_TOO_MANY_LINK_HOPS
            | S_DELETED_BY_USER
    )
}

/// Returns true if a URI finishing with this status deserves another attempt
pub fn is_retryable(status: i32) -> bool {
    matches!(
        status,
        S_DEFERRED
            | S_CONNECT_FAILED
            | S_CONNECT_LOST
            | S_DOMAIN_UNRESOLVABLE
            | S_PROCESSING_THREAD_KILLED
    )
}

/// Returns true if the status is a connection-level failure
///
/// Groups finishing a URI with one of these statuses are snoozed for the
/// configured retry delay instead of the usual politeness delay.
pub fn is_connection_failure(status: i32) -> bool {
    matches!(
        status,
        S_CONNECT_FAILED | S_CONNECT_LOST | S_DOMAIN_UNRESOLVABLE
    )
}

/// Returns a short mnemonic for internal status codes
pub fn status_name(status: i32) -> &'static str {
    match status {
        S_UNATTEMPTED => "unattempted",
        S_DOMAIN_UNRESOLVABLE => "domain-unresolvable",
        S_CONNECT_FAILED => "connect-failed",
        S_CONNECT_LOST => "connect-lost",
        S_TIMEOUT => "timeout",
        S_RUNTIME_EXCEPTION => "runtime-exception",
        S_DEFERRED => "deferred",
        S_SERIOUS_ERROR => "serious-error",
        S_TOO_MANY_LINK_HOPS => "too-many-link-hops",
        S_TOO_MANY_EMBED_HOPS => "too-many-embed-hops",
        S_OUT_OF_SCOPE => "out-of-scope",
        S_BLOCKED_BY_USER => "blocked-by-user",
        S_BLOCKED_BY_CUSTOM_PROCESSOR => "blocked-by-custom-processor",
        S_BLOCKED_BY_QUOTA => "blocked-by-quota",
        S_DELETED_BY_USER => "deleted-by-user",
        S_PROCESSING_THREAD_KILLED => "processing-thread-killed",
        S_ROBOTS_PRECLUDED => "robots-precluded",
        s if s > 0 => "protocol",
        _ => "unknown",
    }
}
