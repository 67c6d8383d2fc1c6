//! Example: Reading variables and monitoring push traffic
//!
//! Run with: cargo run --example monitor
//!
//! This example demonstrates:
//! - Connecting to a controller and checking liveness
//! - Installing a variable registry and socket routes
//! - Reading and writing typed variables
//! - Subscribing to debounced change notifications

use std::net::Ipv4Addr;

use cybro_plc::{
    Controller, ControllerConfig, Registry, RouteTable, SocketRoute, Value, VarType, Variable,
};

#[tokio::main]
async fn main() -> cybro_plc::Result<()> {
    tracing_subscriber::fmt::init();

    // =========================================================================
    // Connect
    // =========================================================================

    let config = ControllerConfig::new(Ipv4Addr::new(192, 168, 1, 100), 1000);
    let controller = Controller::connect(config).await?;

    match controller.ping().await {
        Some(rtt) => println!("Controller alive, rtt {:?}", rtt),
        None => println!("Controller did not answer the ping"),
    }
    println!("Run state code: {}", controller.status().await?);

    // =========================================================================
    // Install configuration
    // =========================================================================
    //
    // In a full deployment the registry and routes come out of the onboard
    // archives (`controller.read_configuration()` + external ZIP
    // inflation + `config::parse_allocation` / `config::parse_program`).
    // Here they are written out by hand.

    let mut registry = Registry::new();
    registry.insert(Variable::new("pump_on", 0x0624, VarType::Bit, 1));
    registry.insert(Variable::new("level", 0x0700, VarType::Int, 2));
    registry.insert(Variable::new("flow_rate", 0x0712, VarType::Real, 4));

    let mut routes = RouteTable::new();
    routes.insert(SocketRoute {
        id: 1,
        variables: vec!["pump_on".into(), "level".into()],
    });

    controller.install_configuration(registry, routes);
    controller.refresh().await?;

    // =========================================================================
    // Read and write
    // =========================================================================

    let vars = controller.read(&["pump_on", "level", "flow_rate"]).await?;
    for var in &vars {
        println!("{:<10} = {:?}", var.name, var.value);
    }

    controller.write(&[("pump_on", Value::Bit(1))]).await?;
    println!("pump_on set");

    // =========================================================================
    // Monitor push traffic
    // =========================================================================

    let mut changes = controller.subscribe();
    println!("Waiting for change notifications (ctrl-c to quit)...");
    while let Ok(change) = changes.recv().await {
        println!("{} -> {}", change.name, change.value);
    }
    Ok(())
}
