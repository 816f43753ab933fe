//! Caller identity for the current thread.
//!
//! The caller id is stamped into `_creator` / `_updater` / `_owner` of
//! timestamped entities and is available to hooks for access control.

use std::cell::RefCell;
use std::marker::PhantomData;
use std::rc::Rc;

thread_local! {
    static CALLER: RefCell<Option<String>> = const { RefCell::new(None) };
}

/// Returns the caller id set on this thread, if any.
pub(crate) fn current() -> Option<String> {
    CALLER.with(|caller| caller.borrow().clone())
}

/// Replaces the caller id on this thread, returning the previous one.
pub(crate) fn replace(caller: Option<String>) -> Option<String> {
    CALLER.with(|slot| slot.replace(caller))
}

/// Restores the previous caller id when dropped.
///
/// Returned by [`crate::Database::as_user`]. Guards nest: dropping an inner
/// guard restores the outer caller, including during unwinding.
#[must_use = "the caller is reset as soon as the guard is dropped"]
#[derive(Debug)]
pub struct CallerGuard {
    previous: Option<String>,
    // Thread-local state: the guard must drop on the thread that made it.
    _not_send: PhantomData<Rc<()>>,
}

impl CallerGuard {
    pub(crate) fn enter(caller: impl Into<String>) -> Self {
        let previous = replace(Some(caller.into()));
        Self {
            previous,
            _not_send: PhantomData,
        }
    }
}

impl Drop for CallerGuard {
    fn drop(&mut self) {
        replace(self.previous.take());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_restores_previous_caller() {
        assert_eq!(current(), None);
        {
            let _outer = CallerGuard::enter("alice");
            assert_eq!(current().as_deref(), Some("alice"));
            {
                let _inner = CallerGuard::enter("bob");
                assert_eq!(current().as_deref(), Some("bob"));
            }
            assert_eq!(current().as_deref(), Some("alice"));
        }
        assert_eq!(current(), None);
    }

    #[test]
    fn guard_restores_on_panic() {
        let result = std::panic::catch_unwind(|| {
            let _guard = CallerGuard::enter("mallory");
            panic!("boom");
        });
        assert!(result.is_err());
        assert_eq!(current(), None);
    }

    #[test]
    fn caller_is_thread_scoped() {
        let _guard = CallerGuard::enter("main");
        let seen = std::thread::spawn(current).join().unwrap();
        assert_eq!(seen, None);
        assert_eq!(current().as_deref(), Some("main"));
    }
}
