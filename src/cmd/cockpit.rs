//! `quasar cockpit`: TUI entrypoint. Out of scope here — reads the same
//! fabric/telemetry data model the rest of the CLI already writes, so a
//! future TUI has nothing new to wire up.

use std::path::Path;

use anyhow::Result;

use crate::config::QuasarConfig;
use crate::fabric::FabricStore;
use crate::telemetry::TelemetrySink;

pub fn cmd_cockpit(_nebula_dir: &Path, config: &QuasarConfig) -> Result<()> {
    let fabric = FabricStore::open(&config.fabric_db_path())?;
    let states = fabric.all_phase_states()?;
    let telemetry = TelemetrySink::new(config.telemetry_path());
    let events = telemetry.read_all()?;

    println!("cockpit TUI is not implemented; printing the data it would render.");
    println!();
    println!("{} phase states, {} telemetry events", states.len(), events.len());
    for state in &states {
        println!("  {:<10} {:?}  ${:.4}", state.phase_id, state.status, state.cost_usd);
    }
    Ok(())
}
