//! Request-scoped correlation context.

use std::time::Instant;

use tracing::span::EnteredSpan;
use uuid::Uuid;

/// Carries a correlation id and component/operation labels across an
/// operation, so every span and log line it opens can be tied back
/// together.
#[derive(Debug, Clone)]
pub struct RequestContext {
    component: String,
    operation: Option<String>,
    request_id: Uuid,
}

impl RequestContext {
    /// Start a new context for `component` (e.g. `"session-connector"`),
    /// stamped with a fresh request id.
    #[must_use]
    pub fn new(component: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            operation: None,
            request_id: Uuid::new_v4(),
        }
    }

    /// Attach an operation label (e.g. `"process_request"`).
    #[must_use]
    pub fn with_operation(mut self, operation: impl Into<String>) -> Self {
        self.operation = Some(operation.into());
        self
    }

    /// This context's correlation id.
    #[must_use]
    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    /// Build the `tracing` span carrying this context's fields. Callers
    /// enter it themselves (`let _guard = ctx.span().entered();`) or use
    /// [`Self::enter`] for a guard that also logs the operation's duration.
    #[must_use]
    pub fn span(&self) -> tracing::Span {
        tracing::info_span!(
            "request",
            request_id = %self.request_id,
            component = %self.component,
            operation = self.operation.as_deref().unwrap_or(""),
        )
    }

    /// Enter this context's span and start timing the operation; the
    /// returned guard logs the elapsed time when dropped.
    #[must_use]
    pub fn enter(&self) -> RequestGuard {
        RequestGuard {
            _entered: self.span().entered(),
            start: Instant::now(),
            component: self.component.clone(),
            operation: self.operation.clone(),
        }
    }
}

/// Guard returned by [`RequestContext::enter`]. Keeps the context's span
/// entered for its lifetime and logs the elapsed duration on drop.
pub struct RequestGuard {
    _entered: EnteredSpan,
    start: Instant,
    component: String,
    operation: Option<String>,
}

impl Drop for RequestGuard {
    fn drop(&mut self) {
        let elapsed_ms = self.start.elapsed().as_millis();
        tracing::debug!(
            component = %self.component,
            operation = self.operation.as_deref().unwrap_or(""),
            elapsed_ms,
            "request complete"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_ids_are_unique() {
        let a = RequestContext::new("test");
        let b = RequestContext::new("test");
        assert_ne!(a.request_id(), b.request_id());
    }

    #[test]
    fn with_operation_is_chainable() {
        let ctx = RequestContext::new("test").with_operation("process_request");
        assert_eq!(ctx.operation.as_deref(), Some("process_request"));
    }

    #[test]
    fn enter_produces_a_guard() {
        let ctx = RequestContext::new("test");
        let _guard = ctx.enter();
    }
}
