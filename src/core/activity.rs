//! Per-thread activity id and logical operation stack
//!
//! Both values are captured into an [`EventRecord`](crate::EventRecord) on the
//! thread that creates it, so sinks draining on their own thread still see
//! the producer's context.

use rand::Rng;
use std::cell::RefCell;
use std::fmt;

thread_local! {
    static CURRENT_ACTIVITY: RefCell<Option<ActivityId>> = const { RefCell::new(None) };
    static OPERATION_STACK: RefCell<Vec<String>> = const { RefCell::new(Vec::new()) };
}

/// 128-bit activity identifier, rendered GUID-style.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ActivityId(u128);

impl ActivityId {
    pub fn new_random() -> Self {
        ActivityId(rand::thread_rng().gen())
    }

    pub const fn from_u128(value: u128) -> Self {
        ActivityId(value)
    }

    pub const fn as_u128(&self) -> u128 {
        self.0
    }

    /// Activity id of the calling thread, if one is set
    pub fn current() -> Option<ActivityId> {
        CURRENT_ACTIVITY.with(|current| *current.borrow())
    }
}

impl fmt::Display for ActivityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let v = self.0;
        write!(
            f,
            "{:08x}-{:04x}-{:04x}-{:04x}-{:012x}",
            (v >> 96) as u32,
            (v >> 80) as u16,
            (v >> 64) as u16,
            (v >> 48) as u16,
            v & 0xFFFF_FFFF_FFFF
        )
    }
}

/// RAII guard that sets the thread's activity id and restores the previous
/// one when dropped.
///
/// # Example
///
/// ```
/// use sourcelog::{ActivityId, ActivityScope};
///
/// let outer = ActivityScope::new();
/// {
///     let inner = ActivityScope::with_id(ActivityId::from_u128(7));
///     assert_eq!(ActivityId::current(), Some(inner.id()));
/// }
/// assert_eq!(ActivityId::current(), Some(outer.id()));
/// ```
pub struct ActivityScope {
    id: ActivityId,
    previous: Option<ActivityId>,
}

impl ActivityScope {
    /// Start a new random activity on this thread
    pub fn new() -> Self {
        Self::with_id(ActivityId::new_random())
    }

    pub fn with_id(id: ActivityId) -> Self {
        let previous = CURRENT_ACTIVITY.with(|current| current.borrow_mut().replace(id));
        Self { id, previous }
    }

    pub fn id(&self) -> ActivityId {
        self.id
    }
}

impl Default for ActivityScope {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ActivityScope {
    fn drop(&mut self) {
        CURRENT_ACTIVITY.with(|current| *current.borrow_mut() = self.previous);
    }
}

/// RAII guard pushing a named logical operation for the current thread.
pub struct OperationScope {
    depth: usize,
}

impl OperationScope {
    pub fn new(operation: impl Into<String>) -> Self {
        let depth = OPERATION_STACK.with(|stack| {
            let mut stack = stack.borrow_mut();
            stack.push(operation.into());
            stack.len()
        });
        Self { depth }
    }
}

impl Drop for OperationScope {
    fn drop(&mut self) {
        OPERATION_STACK.with(|stack| stack.borrow_mut().truncate(self.depth - 1));
    }
}

/// Snapshot of the calling thread's operation stack, innermost last
pub fn current_operations() -> Vec<String> {
    OPERATION_STACK.with(|stack| stack.borrow().clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_activity_scope_restores_previous() {
        assert_eq!(ActivityId::current(), None);
        {
            let scope = ActivityScope::with_id(ActivityId::from_u128(1));
            assert_eq!(ActivityId::current(), Some(scope.id()));
        }
        assert_eq!(ActivityId::current(), None);
    }

    #[test]
    fn test_activity_id_display() {
        let id = ActivityId::from_u128(0x0123_4567_89ab_cdef_0011_2233_4455_6677);
        assert_eq!(id.to_string(), "01234567-89ab-cdef-0011-223344556677");
    }

    #[test]
    fn test_operation_stack_nesting() {
        let _outer = OperationScope::new("request");
        {
            let _inner = OperationScope::new("db");
            assert_eq!(current_operations(), vec!["request", "db"]);
        }
        assert_eq!(current_operations(), vec!["request"]);
    }

    #[test]
    fn test_activity_is_per_thread() {
        let _scope = ActivityScope::new();
        let other = std::thread::spawn(ActivityId::current).join().unwrap();
        assert_eq!(other, None);
    }
}
