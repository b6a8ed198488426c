//! netsynapse daemon stub.
//!
//! The transport surface (HTTP, RPC, CLI) is the embedding application's
//! concern; this binary only wires telemetry and reports readiness. Embed
//! [`synapse_core::ChangeOrchestrator`] behind your transport of choice.

use anyhow::Result;
use tracing::Level;

fn main() -> Result<()> {
    synapse_core::init_tracing(false, Level::INFO);

    tracing::info!(version = synapse_core::VERSION, "synapsed stub started");
    Ok(())
}
