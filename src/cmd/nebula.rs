//! `quasar nebula plan|apply|show|status`: the tracker-diff and
//! state-inspection verbs, layered on `nebula::lifecycle`.

use std::path::Path;

use anyhow::Result;

use crate::config::QuasarConfig;
use crate::nebula::{self, PlanAction};
use crate::telemetry::TelemetrySink;
use crate::tracker::BeadClient;

pub fn cmd_nebula_plan(nebula_dir: &Path, config: &QuasarConfig) -> Result<()> {
    let loaded = nebula::load(nebula_dir, &config.execution)?;
    nebula::validate(&loaded)?;

    let actions = nebula::plan(&loaded);
    for action in &actions {
        match action {
            PlanAction::Create { phase_id, title } => println!("create  {phase_id}  \"{title}\""),
            PlanAction::Update { phase_id, bead_id } => println!("update  {phase_id}  ({bead_id})"),
            PlanAction::Unchanged { phase_id, bead_id } => println!("ok      {phase_id}  ({bead_id})"),
        }
    }
    Ok(())
}

pub async fn cmd_nebula_apply(nebula_dir: &Path, config: &QuasarConfig, tracker_cmd: &str) -> Result<()> {
    let mut loaded = nebula::load(nebula_dir, &config.execution)?;
    nebula::validate(&loaded)?;

    let actions = nebula::plan(&loaded);
    let created = actions.iter().filter(|a| matches!(a, PlanAction::Create { .. })).count();
    let tracker = BeadClient::new(tracker_cmd, &loaded.dir);
    nebula::apply(&mut loaded, &tracker, &actions).await?;

    println!("created {created} bead(s), nebula state saved");
    Ok(())
}

pub fn cmd_nebula_show(nebula_dir: &Path, config: &QuasarConfig) -> Result<()> {
    let loaded = nebula::load(nebula_dir, &config.execution)?;

    println!("nebula: {}", loaded.manifest.nebula.name);
    if !loaded.manifest.nebula.description.is_empty() {
        println!("  {}", loaded.manifest.nebula.description);
    }
    println!();
    for phase in &loaded.phases {
        let entry = loaded.state.phases.get(&phase.id);
        let status = entry.map(|e| format!("{:?}", e.status)).unwrap_or_else(|| "pending".to_string());
        println!(
            "  {:<8} {:<30} depends_on=[{}]  status={status}",
            phase.id,
            phase.title,
            phase.depends_on.join(",")
        );
    }
    Ok(())
}

pub fn cmd_nebula_status(nebula_dir: &Path, config: &QuasarConfig) -> Result<()> {
    let loaded = nebula::load(nebula_dir, &config.execution)?;

    println!("total cost so far: ${:.4}", loaded.state.total_cost_usd);
    let done = loaded.state.phases.values().filter(|p| p.status.is_terminal()).count();
    println!("phases tracked: {} ({} terminal)", loaded.state.phases.len(), done);

    let telemetry = TelemetrySink::new(config.telemetry_path());
    let events = telemetry.read_all()?;
    println!("telemetry events recorded: {}", events.len());
    if let Some(last) = events.last() {
        println!("last event: {} {} at {}", last.kind, last.payload, last.ts);
    }

    if let Some(last_stale) = events.iter().rev().find(|e| e.kind == "stale_detected") {
        println!("most recent stale report ({}): {}", last_stale.ts, last_stale.payload);
    }
    Ok(())
}
