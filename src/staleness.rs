//! Reference-counted reclamation of unused instruments (§4.6).

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::Mutex;

use crate::otel_debug;

/// When a [`StalenessHandler`]'s reference count reaches zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StalenessPolicy {
    /// Fire `on_stale` callbacks synchronously inside the `release()` call
    /// that zeroed the count.
    Immediate,
    /// Defer firing by `duration`; a subsequent `acquire()` within that
    /// window cancels the firing, letting transient churn survive.
    Delayed(std::time::Duration),
}

type StaleCallback = Box<dyn Fn() + Send + Sync>;

/// A reference counter for one instrument. `acquire`/`release` track live
/// writer handles; when the count drops to zero the registered callbacks
/// fire exactly once, clearing the meter's `(scope_id, instrument_id)`
/// entry. Callbacks are plain closures, not back-references to the meter,
/// so there is no cycle between the stream and its owning meter (§9).
pub struct StalenessHandler {
    count: AtomicI64,
    generation: AtomicU64,
    pending_check: AtomicU64,
    fired: AtomicBool,
    policy: StalenessPolicy,
    callbacks: Mutex<Vec<StaleCallback>>,
}

impl std::fmt::Debug for StalenessHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StalenessHandler")
            .field("count", &self.count.load(Ordering::Relaxed))
            .field("policy", &self.policy)
            .finish()
    }
}

impl StalenessHandler {
    /// Creates a new handler with an initial reference count of 1 (the
    /// handle returned to the caller that created the instrument).
    pub fn new(policy: StalenessPolicy) -> Self {
        StalenessHandler {
            count: AtomicI64::new(1),
            generation: AtomicU64::new(0),
            pending_check: AtomicU64::new(0),
            fired: AtomicBool::new(false),
            policy,
            callbacks: Mutex::new(Vec::new()),
        }
    }

    /// Registers a callback invoked when this handler transitions from
    /// live to stale. Multiple callbacks may be registered; all fire.
    pub fn on_stale(&self, callback: impl Fn() + Send + Sync + 'static) {
        if let Ok(mut callbacks) = self.callbacks.lock() {
            callbacks.push(Box::new(callback));
        }
    }

    /// Increments the reference count. If called during a pending
    /// `Delayed` staleness window, cancels that firing by bumping the
    /// handler's generation so the deferred check observes a stale token.
    pub fn acquire(&self) {
        self.count.fetch_add(1, Ordering::AcqRel);
        self.generation.fetch_add(1, Ordering::AcqRel);
        self.fired.store(false, Ordering::Release);
    }

    /// Decrements the reference count. Fires `on_stale` callbacks exactly
    /// once if the count transitions from positive to zero.
    pub fn release(&self) {
        let previous = self.count.fetch_sub(1, Ordering::AcqRel);
        if previous != 1 {
            return;
        }
        match self.policy {
            StalenessPolicy::Immediate => self.fire_if_still_zero(),
            StalenessPolicy::Delayed(duration) => self.schedule_delayed_check(duration),
        }
    }

    fn fire_if_still_zero(&self) {
        if self.count.load(Ordering::Acquire) != 0 {
            return;
        }
        if self
            .fired
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        otel_debug!(name: "StalenessHandler.Fire", message = "reference count reached zero; reclaiming instrument",);
        let callbacks = self.callbacks.lock().unwrap_or_else(|e| e.into_inner());
        for cb in callbacks.iter() {
            cb();
        }
    }

    fn schedule_delayed_check(&self, _duration: std::time::Duration) {
        // The core has no timer runtime of its own (§5: no suspension
        // points in the hot path, and the only blocking call belongs to
        // transport I/O). A `Delayed` policy is driven by whatever caller
        // owns a timer -- typically the periodic reader's tick -- calling
        // `check_delayed` after the window elapses. Recording the
        // generation at schedule time lets that caller detect a
        // cancelling `acquire()` in between.
        // Stored as `generation + 1` so zero unambiguously means "no
        // pending check", since `generation` itself starts at zero.
        let observed_generation = self.generation.load(Ordering::Acquire);
        self.pending_check
            .store(observed_generation + 1, Ordering::Release);
    }

    /// Re-checks a pending `Delayed` staleness window; a no-op under
    /// `Immediate` policy. Intended to be invoked by a caller-owned timer
    /// after the configured duration elapses.
    pub fn check_delayed(&self) {
        if !matches!(self.policy, StalenessPolicy::Delayed(_)) {
            return;
        }
        let pending = self.pending_check.load(Ordering::Acquire);
        if pending == 0 {
            return;
        }
        if self.generation.load(Ordering::Acquire) + 1 == pending {
            self.fire_if_still_zero();
        }
        self.pending_check.store(0, Ordering::Release);
    }

    /// Current reference count, for diagnostics and tests.
    pub fn ref_count(&self) -> i64 {
        self.count.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;

    #[test]
    fn fires_on_release_to_zero() {
        let handler = StalenessHandler::new(StalenessPolicy::Immediate);
        let fired = Arc::new(AtomicBool::new(false));
        let fired2 = fired.clone();
        handler.on_stale(move || fired2.store(true, Ordering::SeqCst));

        handler.release();
        assert!(fired.load(Ordering::SeqCst));
    }

    #[test]
    fn does_not_fire_while_references_remain() {
        let handler = StalenessHandler::new(StalenessPolicy::Immediate);
        let fired = Arc::new(AtomicBool::new(false));
        let fired2 = fired.clone();
        handler.on_stale(move || fired2.store(true, Ordering::SeqCst));

        handler.acquire();
        handler.release();
        assert!(!fired.load(Ordering::SeqCst));
        handler.release();
        assert!(fired.load(Ordering::SeqCst));
    }

    #[test]
    fn fires_exactly_once_per_crossing() {
        let handler = StalenessHandler::new(StalenessPolicy::Immediate);
        let count = Arc::new(AtomicI64::new(0));
        let count2 = count.clone();
        handler.on_stale(move || {
            count2.fetch_add(1, Ordering::SeqCst);
        });

        handler.release();
        assert_eq!(count.load(Ordering::SeqCst), 1);
        handler.release(); // already at zero; not a new crossing
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn reacquire_resets_the_flag_for_a_fresh_crossing() {
        let handler = StalenessHandler::new(StalenessPolicy::Immediate);
        let count = Arc::new(AtomicI64::new(0));
        let count2 = count.clone();
        handler.on_stale(move || {
            count2.fetch_add(1, Ordering::SeqCst);
        });

        handler.release();
        handler.acquire();
        handler.release();
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn delayed_acquire_cancels_pending_fire() {
        let handler = StalenessHandler::new(StalenessPolicy::Delayed(std::time::Duration::from_secs(60)));
        let fired = Arc::new(AtomicBool::new(false));
        let fired2 = fired.clone();
        handler.on_stale(move || fired2.store(true, Ordering::SeqCst));

        handler.release();
        handler.acquire();
        handler.check_delayed();
        assert!(!fired.load(Ordering::SeqCst), "acquire before the delay elapsed must cancel reclamation");
    }
}
