/// Guard that runs a closure when dropped.
#[must_use = "the closure runs immediately if the guard is not held"]
pub struct DeferGuard<F: FnOnce()>(Option<F>);

impl<F: FnOnce()> DeferGuard<F> {
    /// Disarms the guard, so that the closure never runs.
    pub fn cancel(mut self) {
        self.0 = None;
    }
}

impl<F: FnOnce()> Drop for DeferGuard<F> {
    fn drop(&mut self) {
        if let Some(f) = self.0.take() {
            f()
        }
    }
}

/// Defers a closure, returning a `DeferGuard` that will
/// run it when dropped.
pub fn defer<F: FnOnce()>(f: F) -> DeferGuard<F> {
    DeferGuard(Some(f))
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;

    #[test]
    fn test_runs_on_drop() {
        let ran = Cell::new(false);
        {
            let _guard = defer(|| ran.set(true));
            assert!(!ran.get());
        }
        assert!(ran.get());
    }

    #[test]
    fn test_runs_on_unwind() {
        let ran = Cell::new(false);
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = defer(|| ran.set(true));
            panic!("boom");
        }));
        assert!(result.is_err());
        assert!(ran.get());
    }

    #[test]
    fn test_cancel() {
        let ran = Cell::new(false);
        defer(|| ran.set(true)).cancel();
        assert!(!ran.get());
    }
}
