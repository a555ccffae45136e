//! End-to-end scenarios for the machine: serialized triggers, fault/reset
//! behavior, auto-timeouts, history, recovery, and task cancellation.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use modeflow_core::utils::elapsed_millis;
use modeflow_engine::{
    Checkpoint, Error, Machine, Result, StateId, TransitionReport, TriggerName,
};

fn pick_place() -> Machine {
    Machine::builder()
        .with_name("cell")
        .group("Running", ["picking", "placing"])
        .rule("start", "ready", "Running_picking")
        .rule("finished_picking", "Running_picking", "Running_placing")
        .build()
        .unwrap()
}

#[test_log::test(tokio::test)]
async fn end_to_end_pick_place_cycle() {
    let machine = pick_place();

    let report = machine.start().await.unwrap();
    assert_eq!(report.from, StateId::ready());
    assert_eq!(report.to, StateId::new("Running_picking"));

    machine.trigger("finished_picking").await.unwrap();
    machine.trigger("to_fault").await.unwrap();
    let report = machine.trigger("reset").await.unwrap();
    assert_eq!(report.to, StateId::ready());

    let history = machine.history(10).await;
    assert_eq!(history.len(), 4);
    let states: Vec<_> = history.iter().map(|e| e.state.as_str()).collect();
    assert_eq!(
        states,
        vec!["Running_picking", "Running_placing", "fault", "ready"]
    );

    // The machine is fully re-enterable after a reset
    let report = machine.trigger("start").await.unwrap();
    assert_eq!(report.to, StateId::new("Running_picking"));
}

#[tokio::test]
async fn to_fault_succeeds_from_every_reachable_state() {
    for path in [
        Vec::new(),
        vec!["start"],
        vec!["start", "finished_picking"],
    ] {
        let machine = pick_place();
        for trigger in path {
            machine.trigger(trigger).await.unwrap();
        }
        let report = machine.trigger("to_fault").await.unwrap();
        assert_eq!(report.to, StateId::fault());
    }
}

#[tokio::test]
async fn reset_succeeds_only_from_fault() {
    let machine = pick_place();
    assert!(machine.trigger("reset").await.unwrap_err().is_rejection());

    machine.start().await.unwrap();
    assert!(machine.trigger("reset").await.unwrap_err().is_rejection());

    machine.trigger("to_fault").await.unwrap();
    let report = machine.trigger("reset").await.unwrap();
    assert_eq!(report.to, StateId::ready());
}

#[tokio::test]
async fn inapplicable_triggers_never_mutate() {
    let machine = pick_place();
    machine.start().await.unwrap();
    let before = machine.history(10).await;

    for name in ["start", "reset", "recover__Running_placing"] {
        let err = machine.trigger(name).await.unwrap_err();
        assert!(err.is_rejection(), "{} should be rejected", name);
    }
    let err = machine.trigger("never_declared").await.unwrap_err();
    assert!(matches!(err, Error::UnknownTrigger(_)));

    assert_eq!(machine.current_state().await, StateId::new("Running_picking"));
    assert_eq!(machine.history(10).await, before);
}

#[tokio::test]
async fn history_duration_invariant() {
    let machine = pick_place();
    machine.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(15)).await;
    machine.trigger("finished_picking").await.unwrap();
    tokio::time::sleep(Duration::from_millis(15)).await;
    machine.trigger("to_fault").await.unwrap();

    let history = machine.history(10).await;
    assert_eq!(history.len(), 3);
    for pair in history.windows(2) {
        let expected = elapsed_millis(pair[0].entered_at, pair[1].entered_at);
        assert_eq!(pair[0].duration_ms, Some(expected));
    }
    assert_eq!(history.last().unwrap().duration_ms, None);
}

#[test_log::test(tokio::test)]
async fn auto_timeout_faults_an_overstayed_state() {
    let machine = Machine::builder()
        .group("Running", ["picking", "placing"])
        .rule("start", "ready", "Running_picking")
        .rule("finished_picking", "Running_picking", "Running_placing")
        .auto_timeout("Running_picking", Duration::from_millis(80), "to_fault")
        .build()
        .unwrap();

    machine.start().await.unwrap();
    assert_eq!(machine.current_state().await, StateId::new("Running_picking"));

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(machine.current_state().await, StateId::fault());

    let history = machine.history(10).await;
    let picking = &history[history.len() - 2];
    assert_eq!(picking.state, StateId::new("Running_picking"));
    // Occupancy of the timed-out state tracks the deadline
    let duration = picking.duration_ms.unwrap();
    assert!(duration >= 60, "duration was {}ms", duration);
}

#[tokio::test]
async fn timeout_never_fires_after_manual_exit() {
    let machine = Machine::builder()
        .group("Running", ["picking", "placing"])
        .rule("start", "ready", "Running_picking")
        .rule("finished_picking", "Running_picking", "Running_placing")
        .auto_timeout("Running_picking", Duration::from_millis(50), "to_fault")
        .build()
        .unwrap();

    machine.start().await.unwrap();
    machine.trigger("finished_picking").await.unwrap();

    // Wait well past the original deadline: zero expirations may land
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(machine.current_state().await, StateId::new("Running_placing"));
    let history = machine.history(10).await;
    assert!(history.iter().all(|e| e.state != StateId::fault()));
}

#[tokio::test]
async fn rearming_replaces_the_previous_timeout() {
    let machine = Machine::builder()
        .state("a")
        .state("b")
        .rule("start", "ready", "a")
        .rule("hop", "a", "b")
        .rule("back", "b", "a")
        .auto_timeout("a", Duration::from_millis(150), "to_fault")
        .auto_timeout("b", Duration::from_millis(150), "to_fault")
        .build()
        .unwrap();

    machine.start().await.unwrap();
    // Bounce between the two guarded states faster than either deadline
    for _ in 0..3 {
        tokio::time::sleep(Duration::from_millis(30)).await;
        machine.trigger("hop").await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        machine.trigger("back").await.unwrap();
    }
    assert_eq!(machine.current_state().await, StateId::new("a"));

    // Stop bouncing: the active timer must still fire
    tokio::time::sleep(Duration::from_millis(600)).await;
    assert_eq!(machine.current_state().await, StateId::fault());
}

#[tokio::test]
async fn enter_hook_can_override_registered_timeout() {
    let machine = Machine::builder()
        .state("guarded")
        .state("done")
        .rule("start", "ready", "guarded")
        .rule("finish", "guarded", "done")
        .auto_timeout("guarded", Duration::from_secs(60), "to_fault")
        .on_enter("guarded", |cx| {
            cx.arm_timeout(Duration::from_millis(40), "to_fault");
            Ok(())
        })
        .build()
        .unwrap();

    machine.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;
    // The hook's 40ms deadline fired, not the registered 60s one
    assert_eq!(machine.current_state().await, StateId::fault());
}

#[tokio::test]
async fn hook_failure_forces_fault() {
    let machine = Machine::builder()
        .state("a")
        .state("b")
        .rule("start", "ready", "a")
        .rule("advance", "a", "b")
        .on_enter("b", |_cx| Err(Error::machine("gripper jammed")))
        .build()
        .unwrap();

    machine.start().await.unwrap();
    let report = machine.trigger("advance").await.unwrap();
    assert!(report.is_faulted());
    assert_eq!(report.to, StateId::fault());
    assert!(report.fault.as_ref().unwrap().contains("gripper jammed"));
    assert_eq!(machine.current_state().await, StateId::fault());

    // The one unambiguous recovery path still works
    machine.trigger("reset").await.unwrap();
    assert_eq!(machine.current_state().await, StateId::ready());
}

#[tokio::test]
async fn exit_hook_failure_forces_fault() {
    let machine = Machine::builder()
        .state("a")
        .state("b")
        .rule("start", "ready", "a")
        .rule("advance", "a", "b")
        .on_exit("a", |_cx| Err(Error::machine("axis stalled")))
        .build()
        .unwrap();

    machine.start().await.unwrap();
    let report = machine.trigger("advance").await.unwrap();
    assert!(report.is_faulted());
    assert_eq!(machine.current_state().await, StateId::fault());
    // The failed exit never reached b
    let history = machine.history(10).await;
    assert!(history.iter().all(|e| e.state != StateId::new("b")));
}

#[tokio::test]
async fn background_tasks_cancelled_on_state_exit() {
    let fired = Arc::new(AtomicBool::new(false));
    let observed = fired.clone();

    let machine = Machine::builder()
        .state("working")
        .state("done")
        .rule("start", "ready", "working")
        .rule("finish", "working", "done")
        .on_enter("working", move |cx| {
            let fired = fired.clone();
            cx.spawn(async move {
                tokio::time::sleep(Duration::from_millis(60)).await;
                fired.store(true, Ordering::SeqCst);
            });
            Ok(())
        })
        .build()
        .unwrap();

    machine.start().await.unwrap();
    machine.trigger("finish").await.unwrap();

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(
        !observed.load(Ordering::SeqCst),
        "task survived the exit of its owning state"
    );
}

#[tokio::test]
async fn hook_spawned_tasks_drive_transitions() {
    // The pick/place cell advancing itself, as the demo process does
    let machine = Machine::builder()
        .group("Running", ["picking", "placing"])
        .rule("start", "ready", "Running_picking")
        .rule("finished_picking", "Running_picking", "Running_placing")
        .on_enter("Running_picking", |cx| {
            let handle = cx.handle();
            cx.spawn(async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                let _ = handle.trigger("finished_picking").await;
            });
            Ok(())
        })
        .build()
        .unwrap();

    machine.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(machine.current_state().await, StateId::new("Running_placing"));
}

#[tokio::test]
async fn recovery_start_resumes_at_last_recorded_state() {
    let machine = pick_place();
    machine.restore_last_state("Running_placing").await.unwrap();

    let report = machine.start().await.unwrap();
    assert_eq!(
        report.trigger,
        TriggerName::new("recover__Running_placing")
    );
    assert_eq!(machine.current_state().await, StateId::new("Running_placing"));
    // The plain start rule was bypassed
    let history = machine.history(10).await;
    assert!(history.iter().all(|e| e.state != StateId::new("Running_picking")));
}

#[tokio::test]
async fn recovery_snapshot_carries_across_instances() {
    let first = pick_place();
    first.start().await.unwrap();
    first.trigger("finished_picking").await.unwrap();
    let snapshot = first.last_state().await.unwrap();
    drop(first);

    let second = pick_place();
    second.restore_last_state(snapshot).await.unwrap();
    second.start().await.unwrap();
    assert_eq!(second.current_state().await, StateId::new("Running_placing"));
}

#[tokio::test]
async fn recovery_disabled_always_starts_normally() {
    let machine = Machine::builder()
        .group("Running", ["picking", "placing"])
        .rule("start", "ready", "Running_picking")
        .rule("finished_picking", "Running_picking", "Running_placing")
        .with_recovery(false)
        .build()
        .unwrap();

    machine.start().await.unwrap();
    machine.trigger("finished_picking").await.unwrap();
    // Without recovery the snapshot is dropped on re-entering ready
    machine.trigger("to_fault").await.unwrap();
    machine.trigger("reset").await.unwrap();
    assert_eq!(machine.last_state().await, None);

    machine.start().await.unwrap();
    assert_eq!(machine.current_state().await, StateId::new("Running_picking"));
}

#[derive(Debug, Clone, Default)]
struct MemoryCheckpoint {
    slot: Arc<Mutex<Option<StateId>>>,
}

#[async_trait]
impl Checkpoint for MemoryCheckpoint {
    async fn save(&self, state: &StateId) -> Result<()> {
        *self.slot.lock().unwrap() = Some(state.clone());
        Ok(())
    }

    async fn load(&self) -> Result<Option<StateId>> {
        Ok(self.slot.lock().unwrap().clone())
    }
}

#[test_log::test(tokio::test)]
async fn checkpointed_state_survives_a_restart() {
    let checkpoint = MemoryCheckpoint::default();

    let first = Machine::builder()
        .group("Running", ["picking", "placing"])
        .rule("start", "ready", "Running_picking")
        .rule("finished_picking", "Running_picking", "Running_placing")
        .with_checkpoint(checkpoint.clone())
        .build()
        .unwrap();
    first.start().await.unwrap();
    first.trigger("finished_picking").await.unwrap();
    // Saves are fire-and-forget; give the write a moment to land
    tokio::time::sleep(Duration::from_millis(50)).await;
    first.shutdown().await;
    drop(first);

    let second = Machine::builder()
        .group("Running", ["picking", "placing"])
        .rule("start", "ready", "Running_picking")
        .rule("finished_picking", "Running_picking", "Running_placing")
        .with_checkpoint(checkpoint)
        .build()
        .unwrap();
    second.start().await.unwrap();
    assert_eq!(second.current_state().await, StateId::new("Running_placing"));
}

#[tokio::test]
async fn concurrent_triggers_serialize_without_corruption() {
    let machine = Machine::builder()
        .state("a")
        .state("b")
        .rule("start", "ready", "a")
        .rule("flip", "a", "b")
        .rule("flop", "b", "a")
        .build()
        .unwrap();
    machine.start().await.unwrap();

    let executed = Arc::new(AtomicUsize::new(0));
    let rejected = Arc::new(AtomicUsize::new(0));
    let mut handles = Vec::new();
    for i in 0..40 {
        let machine = machine.clone();
        let executed = executed.clone();
        let rejected = rejected.clone();
        let trigger = if i % 2 == 0 { "flip" } else { "flop" };
        handles.push(tokio::spawn(async move {
            match machine.trigger(trigger).await {
                Ok(_) => executed.fetch_add(1, Ordering::SeqCst),
                Err(e) => {
                    assert!(e.is_rejection());
                    rejected.fetch_add(1, Ordering::SeqCst)
                }
            };
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    // Every request was either executed or rejected, nothing lost
    let executed = executed.load(Ordering::SeqCst);
    let rejected = rejected.load(Ordering::SeqCst);
    assert_eq!(executed + rejected, 40);

    // Final state is explained by the number of executed flips
    let final_state = machine.current_state().await;
    let expected = if executed % 2 == 0 { "a" } else { "b" };
    assert_eq!(final_state, StateId::new(expected));

    // One history entry per executed transition, plus the start
    assert_eq!(machine.history(100).await.len(), executed + 1);
}

#[tokio::test]
async fn subscribers_observe_transitions() {
    let machine = pick_place();
    let mut events = machine.subscribe();

    machine.start().await.unwrap();
    machine.trigger("finished_picking").await.unwrap();

    let first: TransitionReport = events.recv().await.unwrap();
    assert_eq!(first.trigger, TriggerName::start());
    assert_eq!(first.to, StateId::new("Running_picking"));

    let second = events.recv().await.unwrap();
    assert_eq!(second.from, StateId::new("Running_picking"));
    assert_eq!(second.to, StateId::new("Running_placing"));
}

#[tokio::test]
async fn shutdown_disarms_timers_and_tasks() {
    let fired = Arc::new(AtomicBool::new(false));
    let observed = fired.clone();

    let machine = Machine::builder()
        .state("working")
        .rule("start", "ready", "working")
        .auto_timeout("working", Duration::from_millis(50), "to_fault")
        .on_enter("working", move |cx| {
            let fired = fired.clone();
            cx.spawn(async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                fired.store(true, Ordering::SeqCst);
            });
            Ok(())
        })
        .build()
        .unwrap();

    machine.start().await.unwrap();
    machine.shutdown().await;

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(machine.current_state().await, StateId::new("working"));
    assert!(!observed.load(Ordering::SeqCst));
}
