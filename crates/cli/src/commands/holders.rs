//! `holders` and `progress` commands: read-only views over the API.

use anyhow::{Context, Result};
use holderscope_core::types::ContractKey;
use prettytable::{row, Table};

use super::ApiClient;

pub async fn handle_progress(server: &str, contract: &str) -> Result<()> {
    let contract: ContractKey =
        contract.parse().with_context(|| format!("unsupported contract '{contract}'"))?;
    let api = ApiClient::new(server)?;
    let progress = api.get(&format!("/holders/{contract}/progress")).await?;

    println!("contract:        {contract}");
    println!("phase:           {}", progress["phase"].as_str().unwrap_or("unknown"));
    println!("populating:      {}", progress["isPopulating"].as_bool().unwrap_or(false));
    println!("progress:        {:.1}%", progress["progressPercentage"].as_f64().unwrap_or(0.0));
    println!("live holders:    {}", progress["totalLiveHolders"].as_u64().unwrap_or(0));
    println!("owners:          {}", progress["totalOwners"].as_u64().unwrap_or(0));
    println!("last block:      {}", progress["lastProcessedBlock"].as_u64().unwrap_or(0));

    if let Some(error) = progress["error"].as_str() {
        println!("error:           {error}");
    }
    if let Some(log) = progress["errorLog"].as_array() {
        if !log.is_empty() {
            println!("error log ({} entries):", log.len());
            for entry in log.iter().take(10) {
                println!(
                    "  [{}] {}: {}",
                    entry["timestamp"].as_str().unwrap_or("-"),
                    entry["phase"].as_str().unwrap_or("-"),
                    entry["error"].as_str().unwrap_or("-"),
                );
            }
        }
    }

    Ok(())
}

pub async fn handle_holders(
    server: &str,
    contract: &str,
    page: u64,
    page_size: u64,
    wallet: Option<&str>,
) -> Result<()> {
    let contract: ContractKey =
        contract.parse().with_context(|| format!("unsupported contract '{contract}'"))?;
    let api = ApiClient::new(server)?;

    let mut path = format!("/holders/{contract}?page={page}&pageSize={page_size}");
    if let Some(wallet) = wallet {
        path.push_str(&format!("&wallet={wallet}"));
    }

    let response = api.get(&path).await?;

    if response["status"] == "in_progress" && response.get("holders").is_none() {
        println!("cache is still populating, try again shortly");
        return Ok(());
    }

    let mut table = Table::new();
    table.add_row(row!["RANK", "WALLET", "TOKENS", "MULTIPLIER", "CLAIMABLE", "SHARE %"]);

    if let Some(holders) = response["holders"].as_array() {
        for holder in holders {
            table.add_row(row![
                holder["rank"].as_u64().unwrap_or(0),
                holder["wallet"].as_str().unwrap_or("-"),
                holder["total"].as_u64().unwrap_or(0),
                holder["multiplierSum"].as_u64().unwrap_or(0),
                format!("{:.4}", holder["claimableRewards"].as_f64().unwrap_or(0.0)),
                format!("{:.3}", holder["percentage"].as_f64().unwrap_or(0.0)),
            ]);
        }
    }

    table.printstd();

    println!(
        "page {}/{} - {} holders, {} live tokens, {} burned",
        response["currentPage"].as_u64().unwrap_or(page),
        response["totalPages"].as_u64().unwrap_or(0),
        response["totalItems"].as_u64().unwrap_or(0),
        response["totalTokens"].as_u64().unwrap_or(0),
        response["totalBurned"].as_u64().unwrap_or(0),
    );

    Ok(())
}
