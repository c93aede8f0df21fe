//! Reward-token USD price lookup (CoinGecko).
//!
//! Price is decoration for operator messages: a failed lookup degrades the
//! message, it never fails the caller. Hence `Option`, not `Result`.

use serde_json::Value;

use crate::logger::{self, LogTag};

const PRICE_URL: &str = "https://api.coingecko.com/api/v3/simple/price";
const TOKEN_ID: &str = "autonolas";

/// Fetch the current USD price of the reward token
pub async fn fetch_token_price(client: &reqwest::Client, api_key: Option<&str>) -> Option<f64> {
    let mut query: Vec<(&str, &str)> = vec![("ids", TOKEN_ID), ("vs_currencies", "usd")];
    if let Some(key) = api_key {
        query.push(("x_cg_demo_api_key", key));
    }

    let response = match client
        .get(PRICE_URL)
        .query(&query)
        .header("accept", "application/json")
        .send()
        .await
    {
        Ok(r) => r,
        Err(e) => {
            logger::warning(LogTag::Price, &format!("price request failed: {}", e));
            return None;
        }
    };

    if !response.status().is_success() {
        logger::warning(
            LogTag::Price,
            &format!("price request returned HTTP {}", response.status()),
        );
        return None;
    }

    let body: Value = match response.json().await {
        Ok(v) => v,
        Err(e) => {
            logger::warning(LogTag::Price, &format!("price response parse failed: {}", e));
            return None;
        }
    };

    let price = body.get(TOKEN_ID)?.get("usd")?.as_f64();
    if price.is_none() {
        logger::warning(LogTag::Price, "price response missing usd field");
    }
    price
}
