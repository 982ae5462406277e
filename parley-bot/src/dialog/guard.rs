//! Per-dialog concurrency guard.
//!
//! At most one handler may process a given dialog at a time; an overlapping
//! message for a busy dialog is dropped, not queued. The registry is an
//! injected service owned by the application context, not process-global
//! state. Flags live only in memory and vanish with the process.

use std::collections::HashSet;
use std::sync::{Mutex, PoisonError};

/// Registry of dialogs currently being processed.
#[derive(Debug, Default)]
pub struct ActiveDialogs {
    inner: Mutex<HashSet<String>>,
}

impl ActiveDialogs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Try to mark a dialog as in-progress.
    ///
    /// Returns `None` if the dialog is already busy. The returned guard
    /// releases the flag on drop, on every exit path including panics.
    pub fn begin(&self, dialog_id: &str) -> Option<ProcessingGuard<'_>> {
        let mut set = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if !set.insert(dialog_id.to_string()) {
            return None;
        }
        Some(ProcessingGuard {
            registry: self,
            dialog_id: dialog_id.to_string(),
        })
    }

    /// Whether a dialog is currently marked in-progress.
    pub fn is_busy(&self, dialog_id: &str) -> bool {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(dialog_id)
    }
}

/// Scoped in-progress marker; clears the flag when dropped.
#[derive(Debug)]
pub struct ProcessingGuard<'a> {
    registry: &'a ActiveDialogs,
    dialog_id: String,
}

impl Drop for ProcessingGuard<'_> {
    fn drop(&mut self) {
        self.registry
            .inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.dialog_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquire_fails_until_release() {
        let registry = ActiveDialogs::new();

        let guard = registry.begin("chat:42");
        assert!(guard.is_some());
        assert!(registry.begin("chat:42").is_none());

        drop(guard);
        assert!(registry.begin("chat:42").is_some());
    }

    #[test]
    fn different_dialogs_do_not_block_each_other() {
        let registry = ActiveDialogs::new();

        let _a = registry.begin("chat:1").unwrap();
        let _b = registry.begin("chat:2").unwrap();
        assert!(registry.is_busy("chat:1"));
        assert!(registry.is_busy("chat:2"));
    }

    #[test]
    fn guard_releases_on_panic() {
        let registry = ActiveDialogs::new();

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = registry.begin("chat:42").unwrap();
            panic!("handler died");
        }));
        assert!(result.is_err());
        assert!(!registry.is_busy("chat:42"));
        assert!(registry.begin("chat:42").is_some());
    }

    #[test]
    fn concurrent_acquires_admit_exactly_one() {
        let registry = ActiveDialogs::new();

        std::thread::scope(|scope| {
            let handles: Vec<_> = (0..16)
                .map(|_| scope.spawn(|| registry.begin("chat:42")))
                .collect();

            // Guards are moved out as return values, so none is released yet.
            let guards: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
            let acquired = guards.iter().filter(|g| g.is_some()).count();
            assert_eq!(acquired, 1);
        });

        assert!(!registry.is_busy("chat:42"));
    }
}
