use modeflow_engine::{Machine, RouterAdapter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    modeflow_core::logging::init_with_filter("info")?;

    println!("Exposing a machine through the router adapter...");

    let machine = Machine::builder()
        .with_name("demo-cell")
        .group("Running", ["picking", "placing"])
        .rule("start", "ready", "Running_picking")
        .rule("finished_picking", "Running_picking", "Running_placing")
        .build()?;

    // Only these triggers are reachable from the outside; internal triggers
    // like finished_picking stay private to the process.
    let adapter = RouterAdapter::new(machine.clone())
        .with_allowed_triggers(["start", "to_fault", "reset"]);

    println!("\nRoutes a transport would mount (POST /<trigger>):");
    for trigger in adapter.routes() {
        println!("  /{}", trigger);
    }

    println!("\nGET /state before start:");
    println!("  {}", serde_json::to_string(&adapter.state().await)?);

    adapter.invoke("start").await?;
    machine.trigger("finished_picking").await?;
    adapter.invoke("to_fault").await?;
    adapter.invoke("reset").await?;

    println!("\nGET /state after a full cycle:");
    println!("  {}", serde_json::to_string(&adapter.state().await)?);

    println!("\nGET /history?last=10:");
    println!("  {}", serde_json::to_string(&adapter.history(10).await)?);

    println!("\nGraph description for the external diagram renderer:");
    println!("{}", adapter.diagram_dot());

    Ok(())
}
