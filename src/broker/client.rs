// =============================================================================
// Alpaca REST API Client — paper trading + market data
// =============================================================================
//
// Two base URLs: the paper trading API (account, positions, orders) and the
// data API (snapshots, bars). Both authenticate with the key/secret header
// pair; the secret is never logged or serialized.
//
// Market orders are submitted then polled until the broker reports a fill;
// paper fills normally land within one poll. The bars endpoint paginates by
// `next_page_token` across the total bar count, which this client follows
// until exhaustion.
// =============================================================================

use std::collections::HashMap;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{Duration, NaiveDate, Utc};
use reqwest::header::{HeaderMap, HeaderValue};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::BrokerCreds;

use super::{Broker, BrokerPosition, DailyBar, OrderFill, OrderSide, SpotSnapshot};

const TRADING_BASE: &str = "https://paper-api.alpaca.markets";
const DATA_BASE: &str = "https://data.alpaca.markets";

/// How long to poll an order before giving up on the fill.
const FILL_POLL_ATTEMPTS: u32 = 20;
const FILL_POLL_DELAY_MS: u64 = 250;

#[derive(Clone)]
pub struct AlpacaClient {
    client: reqwest::Client,
    trading_base: String,
    data_base: String,
}

impl AlpacaClient {
    pub fn new(creds: &BrokerCreds) -> Self {
        let mut headers = HeaderMap::new();
        if let Ok(v) = HeaderValue::from_str(&creds.key) {
            headers.insert("APCA-API-KEY-ID", v);
        }
        if let Ok(v) = HeaderValue::from_str(&creds.secret) {
            headers.insert("APCA-API-SECRET-KEY", v);
        }

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .expect("failed to build reqwest client");

        Self {
            client,
            trading_base: TRADING_BASE.to_string(),
            data_base: DATA_BASE.to_string(),
        }
    }

    async fn get_json(&self, url: &str) -> Result<serde_json::Value> {
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .with_context(|| format!("GET {url} request failed"))?;

        let status = resp.status();
        let body: serde_json::Value = resp
            .json()
            .await
            .with_context(|| format!("failed to parse response from {url}"))?;

        if !status.is_success() {
            anyhow::bail!("GET {url} returned {status}: {body}");
        }
        Ok(body)
    }

    /// Parse a JSON value that may be either a string or a number into `f64`.
    fn num(val: &serde_json::Value) -> Option<f64> {
        if let Some(s) = val.as_str() {
            s.parse().ok()
        } else {
            val.as_f64()
        }
    }
}

#[async_trait]
impl Broker for AlpacaClient {
    async fn account_equity(&self) -> Result<f64> {
        let url = format!("{}/v2/account", self.trading_base);
        let body = self.get_json(&url).await?;
        Self::num(&body["equity"]).context("account response missing equity")
    }

    async fn open_positions(&self) -> Result<Vec<BrokerPosition>> {
        let url = format!("{}/v2/positions", self.trading_base);
        let body = self.get_json(&url).await?;
        let raw = body.as_array().context("positions response is not an array")?;

        let mut positions = Vec::with_capacity(raw.len());
        for p in raw {
            let Some(symbol) = p["symbol"].as_str() else {
                warn!("skipping position entry without symbol");
                continue;
            };
            positions.push(BrokerPosition {
                symbol: symbol.to_string(),
                qty: Self::num(&p["qty"]).unwrap_or(0.0),
                avg_entry_price: Self::num(&p["avg_entry_price"]).unwrap_or(0.0),
                current_price: Self::num(&p["current_price"]),
            });
        }
        debug!(count = positions.len(), "broker positions fetched");
        Ok(positions)
    }

    async fn submit_market_order(
        &self,
        symbol: &str,
        side: OrderSide,
        qty: f64,
    ) -> Result<OrderFill> {
        let client_order_id = Uuid::new_v4().to_string();
        let payload = serde_json::json!({
            "symbol": symbol,
            "qty": format!("{qty}"),
            "side": side.as_str(),
            "type": "market",
            "time_in_force": "day",
            "client_order_id": client_order_id,
        });

        let url = format!("{}/v2/orders", self.trading_base);
        debug!(symbol, side = side.as_str(), qty, "submitting market order");

        let resp = self
            .client
            .post(&url)
            .json(&payload)
            .send()
            .await
            .context("POST /v2/orders request failed")?;

        let status = resp.status();
        let body: serde_json::Value = resp
            .json()
            .await
            .context("failed to parse order response")?;

        if !status.is_success() {
            anyhow::bail!("POST /v2/orders returned {status}: {body}");
        }

        let order_id = body["id"]
            .as_str()
            .context("order response missing id")?
            .to_string();

        // Poll until the broker reports the fill.
        for _ in 0..FILL_POLL_ATTEMPTS {
            let order = self
                .get_json(&format!("{}/v2/orders/{order_id}", self.trading_base))
                .await?;

            match order["status"].as_str() {
                Some("filled") => {
                    let avg_price = Self::num(&order["filled_avg_price"])
                        .context("filled order missing filled_avg_price")?;
                    let filled_qty = Self::num(&order["filled_qty"]).unwrap_or(qty);
                    debug!(symbol, order_id = %order_id, avg_price, "order filled");
                    return Ok(OrderFill {
                        order_id,
                        filled_qty,
                        avg_price,
                    });
                }
                Some("canceled") | Some("expired") | Some("rejected") => {
                    anyhow::bail!(
                        "order {order_id} for {symbol} ended {}",
                        order["status"]
                    );
                }
                _ => {
                    tokio::time::sleep(std::time::Duration::from_millis(FILL_POLL_DELAY_MS))
                        .await;
                }
            }
        }

        anyhow::bail!("order {order_id} for {symbol} not filled within poll window")
    }

    async fn snapshot(&self, symbol: &str) -> Result<SpotSnapshot> {
        let url = format!("{}/v2/stocks/{symbol}/snapshot", self.data_base);
        let body = self.get_json(&url).await?;

        let price = Self::num(&body["latestTrade"]["p"])
            .context("snapshot missing latestTrade.p")?;

        Ok(SpotSnapshot {
            price,
            day_open: Self::num(&body["dailyBar"]["o"]),
            prev_close: Self::num(&body["prevDailyBar"]["c"]),
        })
    }

    async fn daily_bars(
        &self,
        symbols: &[String],
        lookback_days: i64,
    ) -> Result<HashMap<String, Vec<DailyBar>>> {
        if symbols.is_empty() {
            return Ok(HashMap::new());
        }

        let start = (Utc::now() - Duration::days(lookback_days))
            .date_naive()
            .format("%Y-%m-%d")
            .to_string();
        let joined = symbols.join(",");

        let mut out: HashMap<String, Vec<DailyBar>> = HashMap::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut url = format!(
                "{}/v2/stocks/bars?symbols={}&timeframe=1Day&start={}&limit=10000&feed=sip&adjustment=raw",
                self.data_base, joined, start
            );
            if let Some(token) = &page_token {
                url.push_str(&format!("&page_token={token}"));
            }

            let body = self.get_json(&url).await?;

            if let Some(by_symbol) = body["bars"].as_object() {
                for (symbol, bars) in by_symbol {
                    let Some(arr) = bars.as_array() else { continue };
                    let dest = out.entry(symbol.clone()).or_default();
                    for b in arr {
                        let Some(date) = b["t"]
                            .as_str()
                            .and_then(|t| t.get(..10))
                            .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok())
                        else {
                            continue;
                        };
                        dest.push(DailyBar {
                            date,
                            open: Self::num(&b["o"]).unwrap_or(0.0),
                            high: Self::num(&b["h"]).unwrap_or(0.0),
                            low: Self::num(&b["l"]).unwrap_or(0.0),
                            close: Self::num(&b["c"]).unwrap_or(0.0),
                            volume: Self::num(&b["v"]).unwrap_or(0.0),
                        });
                    }
                }
            }

            match body["next_page_token"].as_str() {
                Some(token) if !token.is_empty() => {
                    page_token = Some(token.to_string());
                }
                _ => break,
            }
        }

        debug!(
            symbols = symbols.len(),
            fetched = out.len(),
            "daily bars fetched"
        );
        Ok(out)
    }
}

impl std::fmt::Debug for AlpacaClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlpacaClient")
            .field("trading_base", &self.trading_base)
            .field("data_base", &self.data_base)
            .field("credentials", &"<redacted>")
            .finish()
    }
}
