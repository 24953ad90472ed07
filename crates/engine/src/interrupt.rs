use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Cooperative cancellation flag shared between one session and its engine worker.
///
/// The session writes it, the worker reads it at token boundaries. Clones
/// observe the same flag; separate sessions never share one.
#[derive(Debug, Clone, Default)]
pub struct InterruptFlag {
    raised: Arc<AtomicBool>,
}

impl InterruptFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn interrupt(&self) {
        self.raised.store(true, Ordering::Release);
    }

    pub fn is_interrupted(&self) -> bool {
        self.raised.load(Ordering::Acquire)
    }

    pub fn reset(&self) {
        self.raised.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_state_but_new_flags_do_not() {
        let flag = InterruptFlag::new();
        let worker_view = flag.clone();
        let other_session = InterruptFlag::new();

        flag.interrupt();
        assert!(worker_view.is_interrupted());
        assert!(!other_session.is_interrupted());

        worker_view.reset();
        assert!(!flag.is_interrupted());
    }
}
