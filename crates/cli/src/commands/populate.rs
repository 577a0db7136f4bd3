//! `populate` command: trigger a run, then poll progress until it settles.

use anyhow::{bail, Context, Result};
use holderscope_core::types::ContractKey;
use serde_json::json;
use std::time::Duration;

use super::ApiClient;

/// Upper bound on progress polls before giving up. A full-collection run on
/// mainnet finishes well inside this window.
const MAX_POLL_ATTEMPTS: u32 = 120;

/// Wait between progress polls.
const POLL_INTERVAL: Duration = Duration::from_secs(5);

pub async fn handle_populate(server: &str, contract: &str, force: bool) -> Result<()> {
    let contract: ContractKey =
        contract.parse().with_context(|| format!("unsupported contract '{contract}'"))?;
    let api = ApiClient::new(server)?;

    let trigger = api
        .post(&format!("/holders/{contract}"), json!({ "forceUpdate": force }))
        .await?;

    let status = trigger["status"].as_str().unwrap_or("unknown");
    println!("{}", trigger["message"].as_str().unwrap_or("population requested"));

    if status == "up_to_date" {
        return Ok(());
    }

    for attempt in 1..=MAX_POLL_ATTEMPTS {
        tokio::time::sleep(POLL_INTERVAL).await;

        let progress = api.get(&format!("/holders/{contract}/progress")).await?;
        let phase = progress["phase"].as_str().unwrap_or("unknown");
        let percentage = progress["progressPercentage"].as_f64().unwrap_or(0.0);

        println!("[{attempt:>3}] {phase:<20} {percentage:>5.1}%");

        match phase {
            "completed" => {
                println!(
                    "done: {} live holders",
                    progress["totalLiveHolders"].as_u64().unwrap_or(0)
                );
                return Ok(());
            }
            "error" => {
                let error = progress["error"].as_str().unwrap_or("unknown error");
                bail!("population failed: {error}");
            }
            _ => {}
        }
    }

    bail!("population did not settle within {MAX_POLL_ATTEMPTS} polls")
}
