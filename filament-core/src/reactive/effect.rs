//! Effect Implementation
//!
//! An Effect is a side-effecting computation that runs whenever its
//! dependencies change.
//!
//! # How Effects Work
//!
//! 1. When created, the effect runs its function immediately to establish
//!    initial dependencies.
//!
//! 2. Each run first invokes the previous run's cleanup, disposes the
//!    previous run's child owner, and unsubscribes from every old
//!    dependency. The function then runs inside a fresh child owner and a
//!    fresh tracking frame, and the effect subscribes to exactly what that
//!    run read.
//!
//! 3. If the run wrote to something it had already read (directly, or via
//!    another effect it triggered), the effect runs again. Passes repeat
//!    until one leaves nothing dirty, up to
//!    [`RuntimeConfig::max_effect_iterations`](crate::RuntimeConfig). Past
//!    the cap the effect fails with [`ReactiveError::DependencyCycle`].
//!
//! # Cleanup
//!
//! The function may return a cleanup (see [`EffectOutput`]). It is called
//! before the effect re-runs and when the effect is disposed. Cleanups
//! registered with [`on_cleanup`](super::on_cleanup) during a run belong to
//! that run's child owner and fire at the same points.
//!
//! # Differences from Memo
//!
//! - Memos return a value; effects do not.
//! - Memos republish only on change; effects just run their side effect.
//! - Effects own a child scope, so signals and effects created inside the
//!   function are torn down with the run that created them.

use std::panic::{catch_unwind, resume_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use super::context::Sources;
use super::owner::{Cleanup, Disposable, Owner, WeakOwner};
use super::runtime::{Runtime, WeakRuntime};
use super::subscriber::Subscriber;
use crate::error::{panic_message, raise, ReactiveError};
use crate::graph::{NodeId, RerunGuard};

type EffectFn = Box<dyn FnMut() -> Option<Cleanup> + Send>;

/// What an effect function may return.
pub trait EffectOutput {
    fn into_cleanup(self) -> Option<Cleanup>;
}

impl EffectOutput for () {
    fn into_cleanup(self) -> Option<Cleanup> {
        None
    }
}

impl EffectOutput for Cleanup {
    fn into_cleanup(self) -> Option<Cleanup> {
        Some(self)
    }
}

impl EffectOutput for Option<Cleanup> {
    fn into_cleanup(self) -> Option<Cleanup> {
        self
    }
}

struct EffectInner {
    id: NodeId,
    subscriber: Subscriber,
    func: Mutex<Option<EffectFn>>,
    cleanup: Mutex<Option<Cleanup>>,
    parent: WeakOwner,
    scope: Mutex<Option<Owner>>,
    dependencies: Mutex<Sources>,
    guard: RerunGuard,
    runtime: WeakRuntime,
    max_iterations: usize,
    runs: AtomicUsize,
    disposed: AtomicBool,
}

fn run_cleanup(node: NodeId, cleanup: Cleanup) {
    if let Err(payload) = catch_unwind(AssertUnwindSafe(cleanup)) {
        tracing::error!(node = ?node, error = %panic_message(payload.as_ref()), "effect cleanup panicked");
    }
}

impl EffectInner {
    fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    fn run(&self) -> Result<(), ReactiveError> {
        if self.is_disposed() {
            return Ok(());
        }
        let runtime = self.runtime.upgrade().unwrap_or_else(Runtime::current);
        let _entered = runtime.enter();

        let passes = self
            .guard
            .drive(self.id, self.max_iterations, || self.run_once(&runtime))?;
        if passes > 1 {
            tracing::debug!(node = ?self.id, iterations = passes, "effect settled");
        }
        Ok(())
    }

    fn run_once(&self, runtime: &Runtime) -> Result<(), ReactiveError> {
        if self.is_disposed() {
            return Ok(());
        }

        let previous_cleanup = self.cleanup.lock().take();
        if let Some(cleanup) = previous_cleanup {
            run_cleanup(self.id, cleanup);
        }
        let previous_scope = self.scope.lock().take();
        if let Some(scope) = previous_scope {
            scope.dispose();
        }
        let old = std::mem::take(&mut *self.dependencies.lock());
        for dependency in old {
            dependency.unsubscribe(self.subscriber.id());
        }

        // Anything above may have disposed us.
        let Some(mut func) = self.func.lock().take() else {
            return Ok(());
        };
        let scope = match self.parent.upgrade() {
            Some(parent) => parent.run_scope(),
            None => Owner::new_root(),
        };
        *self.scope.lock() = Some(scope.clone());

        tracing::debug!(node = ?self.id, run = self.runs.load(Ordering::Relaxed) + 1, "running effect");
        let outcome = catch_unwind(AssertUnwindSafe(|| {
            scope.run_in(|| runtime.tracked(self.subscriber.id(), &mut func))
        }));
        if !self.is_disposed() {
            *self.func.lock() = Some(func);
        }
        let (cleanup, collected) = match outcome {
            Ok(result) => result,
            Err(payload) => resume_unwind(payload),
        };
        self.runs.fetch_add(1, Ordering::Relaxed);

        if self.is_disposed() {
            if let Some(cleanup) = cleanup {
                run_cleanup(self.id, cleanup);
            }
            return Ok(());
        }

        for source in &collected.sources {
            source.subscribe(self.subscriber.clone());
        }
        *self.dependencies.lock() = collected.sources;
        *self.cleanup.lock() = cleanup;

        if collected.invalidated {
            tracing::trace!(node = ?self.id, "effect invalidated its own dependencies");
            self.guard.mark_pending();
        }
        Ok(())
    }
}

impl Disposable for EffectInner {
    fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::debug!(node = ?self.id, "disposing effect");

        let dependencies = std::mem::take(&mut *self.dependencies.lock());
        for dependency in dependencies {
            dependency.unsubscribe(self.subscriber.id());
        }
        drop(self.func.lock().take());

        let cleanup = self.cleanup.lock().take();
        if let Some(cleanup) = cleanup {
            run_cleanup(self.id, cleanup);
        }
        let scope = self.scope.lock().take();
        if let Some(scope) = scope {
            scope.dispose();
        }
        if let Some(parent) = self.parent.upgrade() {
            parent.release_computation(self.id);
        }
    }
}

/// A side-effecting computation that runs when dependencies change.
///
/// # Example
///
/// ```rust
/// use std::sync::{Arc, Mutex};
/// use filament_core::{Effect, Signal};
///
/// let count = Signal::new(0);
/// let log = Arc::new(Mutex::new(Vec::new()));
///
/// let effect = Effect::new({
///     let (count, log) = (count.clone(), log.clone());
///     move || log.lock().unwrap().push(format!("render:{}", count.get()))
/// });
///
/// count.set(1);
/// count.set(1);
/// assert_eq!(*log.lock().unwrap(), vec!["render:0", "render:1"]);
///
/// effect.dispose();
/// count.set(2);
/// assert_eq!(log.lock().unwrap().len(), 2);
/// ```
#[derive(Clone)]
pub struct Effect {
    inner: Arc<EffectInner>,
}

impl Effect {
    /// Create an effect under the current owner and run it once.
    ///
    /// Fails if the first run does not settle within the configured cap, or
    /// if a write it makes surfaces a fault. A failed effect is disposed.
    pub fn try_new<F, O>(mut f: F) -> Result<Self, ReactiveError>
    where
        F: FnMut() -> O + Send + 'static,
        O: EffectOutput,
    {
        let runtime = Runtime::current();
        let parent = Owner::current();
        let func: EffectFn = Box::new(move || f().into_cleanup());

        let inner = Arc::new_cyclic(|weak: &Weak<EffectInner>| {
            let weak = weak.clone();
            EffectInner {
                id: NodeId::new(),
                subscriber: Subscriber::new(move || match weak.upgrade() {
                    Some(effect) => effect.run(),
                    None => Ok(()),
                }),
                func: Mutex::new(Some(func)),
                cleanup: Mutex::new(None),
                parent: parent.downgrade(),
                scope: Mutex::new(None),
                dependencies: Mutex::new(Sources::new()),
                guard: RerunGuard::new(),
                runtime: runtime.downgrade(),
                max_iterations: runtime.config().max_effect_iterations,
                runs: AtomicUsize::new(0),
                disposed: AtomicBool::new(false),
            }
        });
        parent.adopt_computation(inner.id, inner.clone());

        let outcome = match catch_unwind(AssertUnwindSafe(|| inner.run())) {
            Ok(outcome) => outcome,
            Err(payload) => match payload.downcast::<ReactiveError>() {
                Ok(err) => Err(*err),
                Err(payload) => {
                    inner.dispose();
                    resume_unwind(payload)
                }
            },
        };
        if let Err(err) = outcome {
            inner.dispose();
            return Err(err);
        }
        Ok(Self { inner })
    }

    /// Like [`Effect::try_new`], but a fault unwinds to the nearest `try_*`
    /// caller.
    pub fn new<F, O>(f: F) -> Self
    where
        F: FnMut() -> O + Send + 'static,
        O: EffectOutput,
    {
        Self::try_new(f).unwrap_or_else(|err| raise(err))
    }

    /// Get the effect's unique ID.
    pub fn id(&self) -> NodeId {
        self.inner.id
    }

    /// Dispose of the effect, stopping it from running again.
    ///
    /// Runs the pending cleanup and disposes everything created by the last
    /// run.
    pub fn dispose(&self) {
        self.inner.dispose();
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.is_disposed()
    }

    /// Get the number of times the effect has run.
    pub fn run_count(&self) -> usize {
        self.inner.runs.load(Ordering::Relaxed)
    }

    /// Number of nodes the last run read.
    pub fn dependency_count(&self) -> usize {
        self.inner.dependencies.lock().len()
    }
}

impl std::fmt::Debug for Effect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Effect")
            .field("id", &self.inner.id)
            .field("run_count", &self.run_count())
            .field("dependency_count", &self.dependency_count())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

/// Create an effect and run it immediately.
pub fn create_effect<F, O>(f: F) -> Effect
where
    F: FnMut() -> O + Send + 'static,
    O: EffectOutput,
{
    Effect::new(f)
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RuntimeConfig;
    use crate::error::ComputationKind;
    use crate::reactive::{on_cleanup, Memo, Signal};
    use std::sync::atomic::AtomicI32;

    fn counter() -> (Arc<AtomicI32>, Arc<AtomicI32>) {
        let count = Arc::new(AtomicI32::new(0));
        (count.clone(), count)
    }

    #[test]
    fn effect_runs_immediately() {
        let (count, count_clone) = counter();
        let effect = Effect::new(move || {
            count_clone.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(effect.run_count(), 1);
    }

    #[test]
    fn render_log_skips_equal_writes() {
        let count = Signal::new(0);
        let log = Arc::new(Mutex::new(Vec::new()));
        let _effect = Effect::new({
            let (count, log) = (count.clone(), log.clone());
            move || log.lock().push(format!("render:{}", count.get()))
        });

        count.set(1);
        count.set(1);
        assert_eq!(*log.lock(), vec!["render:0", "render:1"]);
    }

    #[test]
    fn conditional_dependency_is_dropped() {
        let a = Signal::new(1);
        let b = Signal::new(true);
        let (runs, runs_clone) = counter();
        let effect = Effect::new({
            let (a, b) = (a.clone(), b.clone());
            move || {
                runs_clone.fetch_add(1, Ordering::SeqCst);
                if b.get() {
                    a.get();
                }
            }
        });
        assert_eq!(effect.dependency_count(), 2);

        b.set(false);
        assert_eq!(runs.load(Ordering::SeqCst), 2);
        assert_eq!(effect.dependency_count(), 1);

        a.set(2);
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn self_write_converges() {
        let runtime = Runtime::with_config(RuntimeConfig::default().with_max_effect_iterations(10));
        runtime.run(|| {
            let n = Signal::new(0);
            let effect = Effect::try_new({
                let n = n.clone();
                move || {
                    let value = n.get();
                    if value < 5 {
                        n.set(value + 1);
                    }
                }
            })
            .unwrap();

            assert_eq!(n.get(), 5);
            assert_eq!(effect.run_count(), 6);
            assert_eq!(n.subscriber_count(), 1);

            n.set(0);
            assert_eq!(n.get(), 5);
        });
    }

    #[test]
    fn self_write_without_fixed_point_is_a_cycle() {
        let runtime = Runtime::with_config(RuntimeConfig::default().with_max_effect_iterations(10));
        runtime.run(|| {
            let n = Signal::new(0);
            let err = Effect::try_new({
                let n = n.clone();
                move || n.set(n.get() + 1)
            })
            .unwrap_err();

            assert!(matches!(
                err,
                ReactiveError::DependencyCycle { kind: ComputationKind::Effect, limit: 10, .. }
            ));
            assert_eq!(n.get(), 10);
            assert_eq!(n.subscriber_count(), 0);
        });
    }

    #[test]
    fn zero_iteration_cap_still_runs_effects() {
        let configs = [
            RuntimeConfig::from_json(r#"{ "max_effect_iterations": 0 }"#).unwrap(),
            RuntimeConfig {
                max_effect_iterations: 0,
                ..RuntimeConfig::default()
            },
        ];
        for config in configs {
            Runtime::with_config(config).run(|| {
                let n = Signal::new(0);
                let effect = Effect::try_new({
                    let n = n.clone();
                    move || {
                        n.get();
                    }
                })
                .unwrap();
                n.set(1);
                assert_eq!(effect.run_count(), 2);
            });
        }
    }

    #[test]
    fn effects_feeding_each_other_settle() {
        let a = Signal::new(0);
        let b = Signal::new(0);
        let _mirror = Effect::new({
            let (a, b) = (a.clone(), b.clone());
            move || b.set(a.get())
        });
        let _clamp = Effect::new({
            let (a, b) = (a.clone(), b.clone());
            move || {
                if b.get() > 3 {
                    a.set(3);
                }
            }
        });

        a.set(9);
        assert_eq!(a.get(), 3);
        assert_eq!(b.get(), 3);
    }

    #[test]
    fn cleanup_runs_before_rerun_and_on_dispose() {
        let trigger = Signal::new(0);
        let (cleanups, cleanups_clone) = counter();
        let effect = Effect::new({
            let trigger = trigger.clone();
            move || -> Cleanup {
                trigger.get();
                let cleanups = cleanups_clone.clone();
                Box::new(move || {
                    cleanups.fetch_add(1, Ordering::SeqCst);
                })
            }
        });
        assert_eq!(cleanups.load(Ordering::SeqCst), 0);

        trigger.set(1);
        assert_eq!(cleanups.load(Ordering::SeqCst), 1);

        effect.dispose();
        assert_eq!(cleanups.load(Ordering::SeqCst), 2);

        trigger.set(2);
        assert_eq!(cleanups.load(Ordering::SeqCst), 2);
        assert_eq!(effect.run_count(), 2);
    }

    #[test]
    fn on_cleanup_inside_effect_belongs_to_the_run() {
        let trigger = Signal::new(0);
        let (cleanups, cleanups_clone) = counter();
        let _effect = Effect::new({
            let trigger = trigger.clone();
            move || {
                trigger.get();
                let cleanups = cleanups_clone.clone();
                on_cleanup(move || {
                    cleanups.fetch_add(1, Ordering::SeqCst);
                });
            }
        });

        trigger.set(1);
        trigger.set(2);
        assert_eq!(cleanups.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn nested_effects_are_disposed_with_their_run() {
        let outer_dep = Signal::new(0);
        let inner_dep = Signal::new(0);
        let (inner_runs, inner_runs_clone) = counter();
        let _outer = Effect::new({
            let (outer_dep, inner_dep) = (outer_dep.clone(), inner_dep.clone());
            move || {
                outer_dep.get();
                let inner_dep = inner_dep.clone();
                let inner_runs = inner_runs_clone.clone();
                Effect::new(move || {
                    inner_dep.get();
                    inner_runs.fetch_add(1, Ordering::SeqCst);
                });
            }
        });
        assert_eq!(inner_runs.load(Ordering::SeqCst), 1);

        outer_dep.set(1);
        assert_eq!(inner_runs.load(Ordering::SeqCst), 2);
        assert_eq!(inner_dep.subscriber_count(), 1);

        inner_dep.set(1);
        assert_eq!(inner_runs.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn disposing_owner_removes_all_subscriptions() {
        let runtime = Runtime::new();
        runtime.run(|| {
            let source = Signal::new(0);
            let (runs, runs_clone) = counter();
            let owner = Owner::new_root();
            owner.run_in(|| {
                let doubled = Memo::new({
                    let source = source.clone();
                    move || source.get() * 2
                });
                Effect::new(move || {
                    doubled.get();
                    runs_clone.fetch_add(1, Ordering::SeqCst);
                });
            });
            assert_eq!(source.subscriber_count(), 1);

            owner.dispose();
            assert_eq!(source.subscriber_count(), 0);
            source.set(1);
            assert_eq!(runs.load(Ordering::SeqCst), 1);
        });
    }

    #[test]
    fn effect_through_memo_sees_fresh_value() {
        let base = Signal::new(1);
        let tripled = Memo::new({
            let base = base.clone();
            move || base.get() * 3
        });
        let seen = Arc::new(Mutex::new(Vec::new()));
        let _effect = Effect::new({
            let (tripled, seen) = (tripled.clone(), seen.clone());
            move || seen.lock().push(tripled.get())
        });

        base.set(2);
        assert_eq!(*seen.lock(), vec![3, 6]);
    }

    #[test]
    fn panicking_effect_surfaces_as_subscriber_fault() {
        let trigger = Signal::new(0);
        let _effect = Effect::new({
            let trigger = trigger.clone();
            move || {
                if trigger.get() == 1 {
                    panic!("render failed");
                }
            }
        });

        let err = trigger.try_set(1).unwrap_err();
        assert!(matches!(err, ReactiveError::SubscriberFault { .. }));
        assert_eq!(trigger.subscriber_count(), 0);
    }
}
