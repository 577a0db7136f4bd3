//! Owner enumeration for an NFT contract.
//!
//! Wraps the indexing service's paginated "owners for contract" capability.
//! The provider occasionally reports token ids and balances as decimal
//! strings, hex strings, or plain numbers depending on API version, so
//! parsing is deliberately tolerant; entry-level garbage is filtered, not
//! fatal.

use tracing::{debug, warn};

use crate::{
    indexer::{IndexerClient, IndexerError},
    retry::{retry, RetryPolicy},
    types::{Address, OwnerRecord, TokenBalance},
};

/// Retrieves the full owner set for `contract`, following pagination until
/// exhausted.
///
/// Each page request is wrapped in [`retry`]. Entries lacking a parsable
/// address or holding no token with positive balance are dropped.
///
/// # Errors
///
/// - [`IndexerError::InvalidOwnersResponse`] when a page's `owners` member is
///   missing or not a list
/// - The underlying transport error once retries are exhausted
pub async fn fetch_owners(
    client: &IndexerClient,
    contract: Address,
    policy: &RetryPolicy,
) -> Result<Vec<OwnerRecord>, IndexerError> {
    let mut records: Vec<OwnerRecord> = Vec::new();
    let mut page_key: Option<String> = None;
    let mut pages = 0usize;

    loop {
        let mut query = vec![
            ("contractAddress", contract.to_string()),
            ("withTokenBalances", "true".to_string()),
        ];
        if let Some(key) = &page_key {
            query.push(("pageKey", key.clone()));
        }

        let page = retry(|| client.get_json("getOwnersForContract", &query), policy)
            .await
            .map_err(crate::retry::RetryError::into_source)?;

        let owners = page
            .get("owners")
            .and_then(serde_json::Value::as_array)
            .ok_or_else(|| {
                IndexerError::InvalidOwnersResponse("missing or non-list owners field".to_string())
            })?;

        pages += 1;
        for entry in owners {
            if let Some(record) = parse_owner_entry(entry) {
                records.push(record);
            }
        }

        page_key = page
            .get("pageKey")
            .and_then(serde_json::Value::as_str)
            .filter(|k| !k.is_empty())
            .map(str::to_string);

        if page_key.is_none() {
            break;
        }
    }

    debug!(contract = %contract, owners = records.len(), pages, "owner enumeration complete");
    Ok(records)
}

/// Parses one owner entry, returning `None` for degenerate records.
fn parse_owner_entry(entry: &serde_json::Value) -> Option<OwnerRecord> {
    let address_str = entry.get("ownerAddress").and_then(serde_json::Value::as_str)?;
    let owner_address: Address = match address_str.try_into() {
        Ok(addr) => addr,
        Err(e) => {
            warn!(address = address_str, error = %e, "skipping owner with unparsable address");
            return None;
        }
    };

    let balances = entry.get("tokenBalances").and_then(serde_json::Value::as_array)?;

    let token_balances: Vec<TokenBalance> = balances
        .iter()
        .filter_map(|b| {
            let token_id = parse_flexible_u64(b.get("tokenId")?)?;
            let balance = parse_flexible_u64(b.get("balance")?)?;
            (balance > 0).then_some(TokenBalance { token_id, balance })
        })
        .collect();

    if token_balances.is_empty() {
        return None;
    }

    Some(OwnerRecord { owner_address, token_balances })
}

/// Parses a u64 that may arrive as a number, decimal string, or hex string.
fn parse_flexible_u64(value: &serde_json::Value) -> Option<u64> {
    match value {
        serde_json::Value::Number(n) => n.as_u64(),
        serde_json::Value::String(s) => {
            if let Some(hex_str) = s.strip_prefix("0x") {
                u64::from_str_radix(hex_str, 16).ok()
            } else {
                s.parse().ok()
            }
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    fn test_policy() -> RetryPolicy {
        RetryPolicy { retries: 0, delay: Duration::from_millis(1), backoff: false }
    }

    #[test]
    fn test_parse_flexible_u64() {
        assert_eq!(parse_flexible_u64(&json!(7)), Some(7));
        assert_eq!(parse_flexible_u64(&json!("12")), Some(12));
        assert_eq!(parse_flexible_u64(&json!("0x1a")), Some(26));
        assert_eq!(parse_flexible_u64(&json!(-1)), None);
        assert_eq!(parse_flexible_u64(&json!(null)), None);
    }

    #[test]
    fn test_parse_owner_entry_filters_zero_balances() {
        let entry = json!({
            "ownerAddress": "0x00000000000000000000000000000000000000a1",
            "tokenBalances": [
                {"tokenId": "1", "balance": 1},
                {"tokenId": "2", "balance": 0},
            ],
        });

        let record = parse_owner_entry(&entry).unwrap();
        assert_eq!(record.token_balances.len(), 1);
        assert_eq!(record.token_balances[0].token_id, 1);
    }

    #[test]
    fn test_parse_owner_entry_drops_degenerate() {
        // No address
        assert!(parse_owner_entry(&json!({"tokenBalances": []})).is_none());
        // Bad address
        assert!(parse_owner_entry(&json!({
            "ownerAddress": "nonsense",
            "tokenBalances": [{"tokenId": 1, "balance": 1}],
        }))
        .is_none());
        // All balances zero
        assert!(parse_owner_entry(&json!({
            "ownerAddress": "0x00000000000000000000000000000000000000a1",
            "tokenBalances": [{"tokenId": 1, "balance": 0}],
        }))
        .is_none());
    }

    #[tokio::test]
    async fn test_fetch_owners_follows_pagination() {
        let mut server = mockito::Server::new_async().await;

        let _page1 = server
            .mock("GET", "/getOwnersForContract")
            // The first page's query ends at withTokenBalances; only
            // follow-up pages append a pageKey after it.
            .match_query(mockito::Matcher::Regex("withTokenBalances=true$".to_string()))
            .with_status(200)
            .with_body(
                json!({
                    "owners": [{
                        "ownerAddress": "0x00000000000000000000000000000000000000a1",
                        "tokenBalances": [{"tokenId": "1", "balance": 1}],
                    }],
                    "pageKey": "abc",
                })
                .to_string(),
            )
            .create_async()
            .await;

        let _page2 = server
            .mock("GET", "/getOwnersForContract")
            .match_query(mockito::Matcher::UrlEncoded("pageKey".into(), "abc".into()))
            .with_status(200)
            .with_body(
                json!({
                    "owners": [{
                        "ownerAddress": "0x00000000000000000000000000000000000000b2",
                        "tokenBalances": [{"tokenId": "2", "balance": 1}],
                    }],
                })
                .to_string(),
            )
            .create_async()
            .await;

        let client = IndexerClient::new(server.url(), Duration::from_secs(5)).unwrap();
        let owners = fetch_owners(&client, Address::ZERO, &test_policy()).await.unwrap();

        assert_eq!(owners.len(), 2);
        assert_eq!(owners[0].token_balances[0].token_id, 1);
        assert_eq!(owners[1].token_balances[0].token_id, 2);
    }

    #[tokio::test]
    async fn test_fetch_owners_rejects_non_list_response() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/getOwnersForContract")
            .match_query(mockito::Matcher::Any)
            .with_status(200)
            .with_body(r#"{"owners": "not-a-list"}"#)
            .create_async()
            .await;

        let client = IndexerClient::new(server.url(), Duration::from_secs(5)).unwrap();
        let err = fetch_owners(&client, Address::ZERO, &test_policy()).await.unwrap_err();

        assert!(matches!(err, IndexerError::InvalidOwnersResponse(_)));
    }
}
