//! Show what a run would do.

use anyhow::Result;
use shipgate_core::{RunId, classify};
use std::path::Path;

use crate::changes::{self, ChangeArgs};

pub async fn plan(config: &Path, workdir: &Path, args: &ChangeArgs, json: bool) -> Result<()> {
    let plan = super::load_plan(config, workdir, RunId::new()).await?;
    let changes = changes::collect(args, workdir).await?;
    let classification = classify(&changes, &plan.rules())?;

    if json {
        println!("{}", serde_json::to_string_pretty(&classification)?);
        return Ok(());
    }

    println!("{} changed paths\n", changes.len());
    println!("Targets:");
    for entry in classification.entries() {
        let tag = plan
            .target(&entry.name)
            .map(|t| t.build.tag.as_str())
            .unwrap_or_default();
        if entry.affected {
            println!(
                "  ▶ {} -> {} ({} matching paths)",
                entry.name,
                tag,
                entry.matched_paths.len()
            );
            for path in &entry.matched_paths {
                println!("      {}", path);
            }
        } else {
            println!("  ⊘ {} (unchanged)", entry.name);
        }
    }

    if !plan.relays().is_empty() {
        println!("\nRelays (always run):");
        for relay in plan.relays() {
            println!("  ↻ {} : {} -> {}", relay.name, relay.source, relay.tag);
        }
    }

    Ok(())
}
