use crate::AssignmentEvent;

/// A trait for logging assignment events to your storage system. Implementations should handle
/// persisting assignment events for analytics and tracking purposes.
///
/// Closures taking an [`AssignmentEvent`] implement this trait.
pub trait AssignmentLogger {
    /// Log an assignment event.
    fn log_assignment(&self, event: AssignmentEvent);
}

pub(crate) struct NoopAssignmentLogger;
impl AssignmentLogger for NoopAssignmentLogger {
    fn log_assignment(&self, _event: AssignmentEvent) {}
}

impl<T: Fn(AssignmentEvent)> AssignmentLogger for T {
    fn log_assignment(&self, event: AssignmentEvent) {
        self(event);
    }
}
