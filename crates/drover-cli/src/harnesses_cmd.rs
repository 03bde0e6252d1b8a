//! `drover harnesses`: which agent backends are installed.

use anyhow::Result;

use drover_core::harness::HarnessRegistry;

/// Print the availability of every known backend.
pub fn run_harnesses(json: bool) -> Result<()> {
    let report = HarnessRegistry::with_defaults().availability();

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("Harnesses:");
    for entry in &report {
        let status = if entry.available { "installed" } else { "missing" };
        let capabilities: Vec<String> = entry.capabilities.iter().map(|c| c.to_string()).collect();
        println!(
            "  [{status:<9}] {:<9} {:<10} {}",
            entry.kind.to_string(),
            entry.binary,
            capabilities.join(", ")
        );
    }
    Ok(())
}
