/// Classification for caller-side retry policy.
///
/// The engine itself never retries; these hints tell the caller what to do
/// with an error it received.
///
/// # Behavior Summary
///
/// | Class | Retry? | Delay |
/// |-------|--------|-------|
/// | `Never` | No | - |
/// | `WithBackoff` | Yes | Caller's backoff schedule |
/// | `AfterDelay` | Yes | At least the provider's `retry_after` |
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RetryClass {
    /// Unsupported capability, unknown symbol, bad configuration or request.
    /// The request is fundamentally invalid and retrying won't help.
    Never,

    /// Transient transport failure such as a timeout or a 5xx response.
    WithBackoff,

    /// The provider rate limited the call and told us how long to wait.
    AfterDelay,
}

impl RetryClass {
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Never)
    }
}
