//! Example: Discovering controllers on the local network
//!
//! Run with: cargo run --example discover
//!
//! Broadcasts a discovery probe and prints every controller that answers
//! within the collection window.

use cybro_plc::discovery::{discover, DISCOVERY_WINDOW};

#[tokio::main]
async fn main() -> cybro_plc::Result<()> {
    tracing_subscriber::fmt::init();

    let broadcast = "255.255.255.255:8442".parse().unwrap();
    println!(
        "Probing {} (window {:?})...",
        broadcast, DISCOVERY_WINDOW
    );

    let controllers = discover(broadcast).await?;
    if controllers.is_empty() {
        println!("No controllers answered.");
        return Ok(());
    }

    println!("Found {} controller(s):", controllers.len());
    for controller in &controllers {
        println!("  nad {:>10}  at {}", controller.nad, controller.address);
    }
    Ok(())
}
