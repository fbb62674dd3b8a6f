//! Integration Tests for Reactive System
//!
//! These tests verify that signals, computeds, and effects work together
//! correctly through the public API.

use std::sync::atomic::{AtomicI32, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use cascade_core::{
    batch, create_computed, create_computed_with, create_effect, create_effect_with_cleanup,
    create_signal, create_signal_with, untrack, Cleanup, Computed, ComputedOptions, OnCleanup,
    ReactiveError, Runtime, RuntimeConfig, Signal,
};

fn counter() -> Arc<AtomicUsize> {
    Arc::new(AtomicUsize::new(0))
}

/// Effect that records every value of `computed` it observes.
fn observe(computed: &Computed<i32>) -> (cascade_core::Effect, Arc<Mutex<Vec<i32>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let effect = {
        let computed = computed.clone();
        let seen = seen.clone();
        create_effect(move || -> Result<(), ReactiveError> {
            seen.lock().push(computed.get()?);
            Ok(())
        })
        .unwrap()
    };
    (effect, seen)
}

/// Test that a computed follows its signal without manual invalidation.
#[test]
fn computed_tracks_signal_dependency() {
    let signal = create_signal(10);

    let doubled = {
        let signal = signal.clone();
        create_computed(move || Ok(signal.get() * 2))
    };

    assert_eq!(doubled.get().unwrap(), 20);

    signal.set(5).unwrap();
    assert!(doubled.is_dirty());
    assert_eq!(doubled.get().unwrap(), 10);
}

/// A write reaches transitive effects once, with the final value.
#[test]
fn transitive_effect_sees_final_value() {
    let base = create_signal(1);
    let plus_one = {
        let base = base.clone();
        create_computed(move || Ok(base.get() + 1))
    };
    let times_ten = {
        let plus_one = plus_one.clone();
        create_computed(move || Ok(plus_one.get()? * 10))
    };
    let (_effect, seen) = observe(&times_ten);

    base.set(2).unwrap();
    assert_eq!(*seen.lock(), vec![20, 30]);

    batch(|| {
        base.set(3).unwrap();
        base.set(4).unwrap();
    })
    .unwrap();
    assert_eq!(*seen.lock(), vec![20, 30, 50]);
}

/// Equal writes dirty nothing and run nothing.
#[test]
fn equal_write_is_a_no_op() {
    let signal = create_signal(7);
    let computed = {
        let signal = signal.clone();
        create_computed(move || Ok(signal.get()))
    };
    let (effect, _seen) = observe(&computed);

    signal.set(7).unwrap();
    assert!(!computed.is_dirty());
    assert_eq!(effect.run_count(), 1);
}

/// Custom equality on a signal suppresses propagation as well.
#[test]
fn custom_signal_equality_is_a_no_op() {
    let name = create_signal_with("Ada".to_string(), |a: &String, b: &String| {
        a.eq_ignore_ascii_case(b)
    });
    let runs = counter();

    let _effect = {
        let name = name.clone();
        let runs = runs.clone();
        create_effect(move || {
            name.get();
            runs.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap()
    };

    name.set("ADA".to_string()).unwrap();
    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert_eq!(name.get(), "Ada");
}

/// Diamond: the join recomputes once and its effect runs once.
#[test]
fn diamond_recomputes_once() {
    let base = create_signal(1);
    let combined_calls = counter();

    let left = {
        let base = base.clone();
        create_computed(move || Ok(base.get() + 1))
    };
    let right = {
        let base = base.clone();
        create_computed(move || Ok(base.get() * 2))
    };
    let combined = {
        let (left, right) = (left.clone(), right.clone());
        let calls = combined_calls.clone();
        create_computed(move || {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(left.get()? + right.get()?)
        })
    };
    let (effect, seen) = observe(&combined);
    assert_eq!(*seen.lock(), vec![4]);
    assert_eq!(combined_calls.load(Ordering::SeqCst), 1);

    base.set(5).unwrap();
    assert_eq!(combined_calls.load(Ordering::SeqCst), 2);
    assert_eq!(effect.run_count(), 2);
    assert_eq!(*seen.lock(), vec![4, 16]);

    batch(|| base.set(6).unwrap()).unwrap();
    assert_eq!(combined_calls.load(Ordering::SeqCst), 3);
    assert_eq!(effect.run_count(), 3);
    assert_eq!(*seen.lock(), vec![4, 16, 19]);
}

/// Dynamic edges follow the branch that was actually taken.
#[test]
fn dynamic_dependencies_switch_sources() {
    let switch = create_signal(true);
    let a = create_signal(1);
    let b = create_signal(100);
    let calls = counter();

    let picked = {
        let (switch, a, b) = (switch.clone(), a.clone(), b.clone());
        let calls = calls.clone();
        create_computed(move || {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(if switch.get() { a.get() } else { b.get() })
        })
    };
    let (_effect, seen) = observe(&picked);

    b.set(101).unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    switch.set(false).unwrap();
    assert_eq!(*seen.lock(), vec![1, 101]);
    assert_eq!(a.observer_count(), 0);
    assert_eq!(b.observer_count(), 1);

    a.set(2).unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert!(!picked.is_dirty());

    b.set(102).unwrap();
    assert_eq!(*seen.lock(), vec![1, 101, 102]);
}

/// Mutually recursive computeds fail with a circular dependency.
#[test]
fn mutual_recursion_is_circular() {
    let slot: Arc<Mutex<Option<Computed<i32>>>> = Arc::new(Mutex::new(None));

    let a = {
        let slot = slot.clone();
        create_computed(move || {
            let b = slot.lock().clone();
            match b {
                Some(b) => Ok(b.get()? + 1),
                None => Ok(0),
            }
        })
    };
    let b = {
        let a = a.clone();
        create_computed(move || Ok(a.get()? + 1))
    };
    *slot.lock() = Some(b.clone());

    let err = a.get().unwrap_err();
    assert!(err.is_circular());
    assert!(b.get().unwrap_err().is_circular());

    // Break the slot's edge so the pair can be dropped.
    slot.lock().take();
}

/// Dropping or disposing an effect stops it and runs cleanup exactly once.
#[test]
fn teardown_runs_cleanup_once() {
    let signal = create_signal(0);

    for explicit in [true, false] {
        let runs = counter();
        let cleanups = counter();

        let effect = {
            let signal = signal.clone();
            let runs = runs.clone();
            let cleanups = cleanups.clone();
            create_effect(move || {
                signal.get();
                runs.fetch_add(1, Ordering::SeqCst);
                let cleanups = cleanups.clone();
                Cleanup::new(move || {
                    cleanups.fetch_add(1, Ordering::SeqCst);
                })
            })
            .unwrap()
        };

        if explicit {
            effect.dispose();
        }
        drop(effect);

        signal.update(|v| v + 1).unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(cleanups.load(Ordering::SeqCst), 1);
        assert_eq!(signal.observer_count(), 0);
    }
}

/// Fallback covers a failing compute and real values return afterwards.
#[test]
fn fallback_covers_failure_and_recovers() {
    let divisor = create_signal(0);

    let ratio = {
        let divisor = divisor.clone();
        create_computed_with(
            move || {
                100_i32
                    .checked_div(divisor.get())
                    .ok_or_else(|| "division by zero".into())
            },
            ComputedOptions::new().fallback(9),
        )
    };
    let (_effect, seen) = observe(&ratio);

    assert_eq!(ratio.get().unwrap(), 9);

    divisor.set(4).unwrap();
    assert_eq!(ratio.get().unwrap(), 25);

    divisor.set(0).unwrap();
    assert_eq!(ratio.get().unwrap(), 9);
    assert_eq!(*seen.lock(), vec![9, 25, 9]);
}

/// Without a fallback the failure surfaces as `ComputeFailed`.
#[test]
fn failure_without_fallback_is_reported() {
    let input = create_signal(-1);
    let root = {
        let input = input.clone();
        create_computed(move || {
            let v = input.get();
            if v < 0 {
                return Err(format!("negative input {v}").into());
            }
            Ok(v * 2)
        })
    };

    match root.get() {
        Err(ReactiveError::ComputeFailed { node, source }) => {
            assert_eq!(node, root.id());
            assert_eq!(source.to_string(), "negative input -1");
        }
        other => panic!("expected ComputeFailed, got {other:?}"),
    }

    input.set(3).unwrap();
    assert_eq!(root.get().unwrap(), 6);
}

/// Nested batches flush once, at the outermost exit.
#[test]
fn nested_batches_flush_once() {
    let x = create_signal(1);
    let seen = Arc::new(Mutex::new(Vec::new()));

    let _effect = {
        let x = x.clone();
        let seen = seen.clone();
        create_effect(move || seen.lock().push(x.get())).unwrap()
    };

    batch(|| {
        batch(|| {
            x.set(2).unwrap();
            x.set(3).unwrap();
        })
        .unwrap();
        x.set(4).unwrap();
    })
    .unwrap();

    assert_eq!(*seen.lock(), vec![1, 4]);
}

/// Custom computed equality cuts off propagation for small changes.
#[test]
fn custom_computed_equality_cuts_off() {
    let x = create_signal(1.0_f64);
    let y = {
        let x = x.clone();
        create_computed_with(
            move || Ok(x.get() * 2.0),
            ComputedOptions::with_equality(|a: &f64, b: &f64| (a - b).abs() < 0.1),
        )
    };
    let runs = counter();

    let _effect = {
        let y = y.clone();
        let runs = runs.clone();
        create_effect(move || -> Result<(), ReactiveError> {
            y.get()?;
            runs.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .unwrap()
    };

    x.set(1.02).unwrap();
    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert_eq!(y.get().unwrap(), 2.0);

    x.set(1.1).unwrap();
    assert_eq!(runs.load(Ordering::SeqCst), 2);
    assert!((y.get().unwrap() - 2.2).abs() < 1e-9);
}

/// A re-run first runs the cleanups of the previous run.
#[test]
fn cleanup_runs_before_each_rerun() {
    let signal = create_signal(0);
    let events = Arc::new(Mutex::new(Vec::new()));

    let effect = {
        let signal = signal.clone();
        let events = events.clone();
        create_effect_with_cleanup(move |on_cleanup: &OnCleanup| {
            let value = signal.get();
            events.lock().push(format!("run {value}"));
            let events = events.clone();
            on_cleanup.register(move || events.lock().push(format!("cleanup {value}")));
        })
        .unwrap()
    };

    signal.set(1).unwrap();
    signal.set(2).unwrap();
    drop(effect);

    assert_eq!(
        *events.lock(),
        vec!["run 0", "cleanup 0", "run 1", "cleanup 1", "run 2", "cleanup 2"]
    );
}

/// An effect that keeps re-triggering itself is stopped by the flush bound.
#[test]
fn runaway_effect_reports_cycle() {
    let rt = Runtime::with_config(RuntimeConfig::default().with_max_flush_iterations(10));
    let ping = rt.signal(0);
    let runs = Arc::new(AtomicI32::new(0));

    let result = {
        let ping = ping.clone();
        let runs = runs.clone();
        rt.effect(move || {
            runs.fetch_add(1, Ordering::SeqCst);
            let _ = ping.update(|v| v + 1);
        })
    };

    match result {
        Err(ReactiveError::ReactiveCycleExceeded { limit }) => assert_eq!(limit, 10),
        other => panic!("expected ReactiveCycleExceeded, got {other:?}"),
    }
    // First run plus one per allowed iteration.
    assert_eq!(runs.load(Ordering::SeqCst), 11);
    assert_eq!(rt.scheduler().pending_count(), 0);
    assert_eq!(ping.observer_count(), 0);
}

/// Reads inside `untrack` create no edge.
#[test]
fn untracked_reads_do_not_subscribe() {
    let tracked = create_signal(1);
    let hidden = create_signal(10);
    let runs = counter();

    let _effect = {
        let (tracked, hidden) = (tracked.clone(), hidden.clone());
        let runs = runs.clone();
        create_effect(move || {
            let _ = tracked.get() + untrack(|| hidden.get()) + hidden.get_untracked();
            runs.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap()
    };

    hidden.set(11).unwrap();
    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert_eq!(hidden.observer_count(), 0);

    tracked.set(2).unwrap();
    assert_eq!(runs.load(Ordering::SeqCst), 2);
}

/// Two runtimes never see each other's batches or queues.
#[test]
fn runtimes_are_independent() {
    let first = Runtime::new();
    let second = Runtime::new();

    let a: Signal<i32> = first.signal(0);
    let b: Signal<i32> = second.signal(0);
    let a_runs = counter();
    let b_runs = counter();

    let _ea = {
        let (a, runs) = (a.clone(), a_runs.clone());
        first
            .effect(move || {
                a.get();
                runs.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap()
    };
    let _eb = {
        let (b, runs) = (b.clone(), b_runs.clone());
        second
            .effect(move || {
                b.get();
                runs.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap()
    };

    first
        .batch(|| {
            a.set(1).unwrap();
            b.set(1).unwrap();
            assert_eq!(a_runs.load(Ordering::SeqCst), 1);
            assert_eq!(b_runs.load(Ordering::SeqCst), 2);
        })
        .unwrap();

    assert_eq!(a_runs.load(Ordering::SeqCst), 2);
    assert_eq!(second.scheduler().pending_count(), 0);
}

/// Effects and computeds can be shared with other threads.
#[test]
fn writes_from_another_thread_propagate() {
    let rt = Runtime::new();
    let signal = rt.signal(0);
    let seen = Arc::new(AtomicI32::new(-1));

    let _effect = {
        let signal = signal.clone();
        let seen = seen.clone();
        rt.effect(move || seen.store(signal.get(), Ordering::SeqCst))
            .unwrap()
    };

    let writer = {
        let signal = signal.clone();
        std::thread::spawn(move || signal.set(42))
    };
    writer.join().unwrap().unwrap();

    assert_eq!(seen.load(Ordering::SeqCst), 42);
}

/// An effect reading another runtime's signal re-runs when the write's
/// outermost batch closes, and nothing is left queued.
#[test]
fn effects_follow_signals_of_other_runtimes() {
    let home = Runtime::new();
    let away = Runtime::new();
    let signal = home.signal(0);
    let seen = Arc::new(Mutex::new(Vec::new()));

    let _effect = {
        let (signal, seen) = (signal.clone(), seen.clone());
        away.effect(move || seen.lock().push(signal.get())).unwrap()
    };

    signal.set(1).unwrap();
    assert_eq!(*seen.lock(), vec![0, 1]);

    home.batch(|| {
        signal.set(2).unwrap();
        signal.set(3).unwrap();
        assert_eq!(*seen.lock(), vec![0, 1]);
    })
    .unwrap();

    assert_eq!(*seen.lock(), vec![0, 1, 3]);
    assert_eq!(away.scheduler().pending_count(), 0);
}

/// An effect created on another thread's default runtime still reacts to a
/// signal of this thread's default runtime.
#[test]
fn default_runtimes_of_different_threads_connect() {
    let signal = create_signal(0);
    let seen = Arc::new(AtomicI32::new(-1));

    let effect = {
        let (signal, seen) = (signal.clone(), seen.clone());
        std::thread::spawn(move || {
            create_effect(move || seen.store(signal.get(), Ordering::SeqCst)).unwrap()
        })
        .join()
        .unwrap()
    };
    assert_eq!(seen.load(Ordering::SeqCst), 0);

    signal.set(5).unwrap();
    assert_eq!(seen.load(Ordering::SeqCst), 5);
    assert_eq!(effect.run_count(), 2);
}

/// Writers racing on one runtime never leave an effect behind its signal.
#[test]
fn concurrent_writers_on_one_runtime_settle() {
    // Kept well under the flush bound: each write can add one flush round.
    const LAST: i32 = 30;

    for _ in 0..200 {
        let rt = Runtime::new();
        let left = rt.signal(0);
        let right = rt.signal(0);
        let left_seen = Arc::new(AtomicI32::new(-1));
        let right_seen = Arc::new(AtomicI32::new(-1));

        let _left_effect = {
            let (left, seen) = (left.clone(), left_seen.clone());
            rt.effect(move || seen.store(left.get(), Ordering::SeqCst))
                .unwrap()
        };
        let _right_effect = {
            let (right, seen) = (right.clone(), right_seen.clone());
            rt.effect(move || seen.store(right.get(), Ordering::SeqCst))
                .unwrap()
        };

        let writers: Vec<_> = [left, right]
            .into_iter()
            .map(|signal| {
                std::thread::spawn(move || {
                    for value in 1..=LAST {
                        signal.set(value).unwrap();
                    }
                })
            })
            .collect();
        for writer in writers {
            writer.join().unwrap();
        }

        assert_eq!(left_seen.load(Ordering::SeqCst), LAST);
        assert_eq!(right_seen.load(Ordering::SeqCst), LAST);
        assert_eq!(rt.scheduler().pending_count(), 0);
        assert!(!rt.scheduler().is_flushing());
    }
}
