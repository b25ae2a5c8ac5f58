//! `quasar validate`: load a nebula directory and run the static
//! dependency/scope checks without touching the fabric or dispatching any
//! workers.

use std::path::Path;

use anyhow::Result;

use crate::config::QuasarConfig;
use crate::nebula;

pub fn cmd_validate(nebula_dir: &Path, config: &QuasarConfig) -> Result<()> {
    let loaded = nebula::load(nebula_dir, &config.execution)?;
    let dag = nebula::validate(&loaded)?;

    println!("{} phases, dependency graph is acyclic", loaded.phases.len());
    let waves = dag.compute_waves()?;
    for (i, wave) in waves.iter().enumerate() {
        println!("  wave {}: {}", i, wave.node_ids.join(", "));
    }
    println!("nebula '{}' is valid", loaded.manifest.nebula.name);
    Ok(())
}
