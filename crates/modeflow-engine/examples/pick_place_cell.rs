use std::time::Duration;

use modeflow_engine::{Machine, StateId};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    modeflow_core::logging::init_with_filter("info")?;

    println!("Creating a pick/place cell state machine...");

    // A cell cycling through picking -> placing -> homing, with each state
    // advancing itself after a short motion delay. Picking is guarded by an
    // auto-timeout that faults the cell if the motion never completes.
    let machine = Machine::builder()
        .with_name("pick-place-cell")
        .group("Running", ["picking", "placing", "homing"])
        .rule("start", "ready", "Running_picking")
        .rule("timer_done", "Running_picking", "Running_placing")
        .rule("move_done", "Running_placing", "Running_homing")
        .rule("home_done", "Running_homing", "Running_picking")
        .auto_timeout("Running_picking", Duration::from_secs(5), "to_fault")
        .on_enter("Running_picking", |cx| {
            println!("  Picking: gripper closing, auto advance in 1s");
            let handle = cx.handle();
            cx.spawn(async move {
                tokio::time::sleep(Duration::from_secs(1)).await;
                let _ = handle.trigger("timer_done").await;
            });
            Ok(())
        })
        .on_enter("Running_placing", |cx| {
            println!("  Placing: moving to drop point, auto advance in 1s");
            let handle = cx.handle();
            cx.spawn(async move {
                tokio::time::sleep(Duration::from_secs(1)).await;
                let _ = handle.trigger("move_done").await;
            });
            Ok(())
        })
        .on_enter("Running_homing", |cx| {
            println!("  Homing: returning to start pose, auto advance in 1s");
            let handle = cx.handle();
            cx.spawn(async move {
                tokio::time::sleep(Duration::from_secs(1)).await;
                let _ = handle.trigger("home_done").await;
            });
            Ok(())
        })
        .build()?;

    println!("Starting the cell from ready...");
    machine.start().await?;

    // Let the cell run through a full cycle
    tokio::time::sleep(Duration::from_millis(3500)).await;

    // Simulate an emergency stop
    println!("\nIncoming emergency stop (to_fault)!");
    machine.trigger("to_fault").await?;
    assert_eq!(machine.current_state().await, StateId::fault());
    println!("  Cell is in fault; last working state: {:?}", machine.last_state().await);

    // Recover: reset to ready, then resume at the recorded state
    println!("\nResetting and recovering...");
    machine.trigger("reset").await?;
    let report = machine.start().await?;
    println!(
        "  Recovery fired {} and landed in {}",
        report.trigger, report.to
    );

    tokio::time::sleep(Duration::from_millis(1500)).await;
    machine.shutdown().await;

    // Print the transition history
    println!("\nCell transition history:");
    for (i, entry) in machine.history(20).await.iter().enumerate() {
        match entry.duration_ms {
            Some(ms) => println!("{}. {} ({} ms)", i + 1, entry.state, ms),
            None => println!("{}. {} (live)", i + 1, entry.state),
        }
    }

    println!("\nPick/place cell example completed successfully!");
    Ok(())
}
