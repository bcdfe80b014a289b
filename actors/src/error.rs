//! Errors raised by buffer-manager negotiation and the thread pool.

/// Raised when more than one destination on the same source output declares
/// itself a CUSTOM buffer provider (§4.D step 6). The topology layer must
/// insert a bridge block before this can happen; seeing it means that
/// invariant was violated.
#[derive(Debug, thiserror::Error)]
#[error("multiple CUSTOM buffer-manager destinations on one source output (domain {domain:?})")]
pub struct DomainError {
    /// The domain tag under negotiation when the conflict was detected.
    pub domain: String,
}
