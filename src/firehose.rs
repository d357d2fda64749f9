// =============================================================================
// Options Firehose — full-market trade stream ingest
// =============================================================================
//
// Subscribes to every options trade (`T.*`) on the Polygon options cluster
// and feeds decoded `OptionTrade`s into the engine channel. The hot path
// never fails: unparseable symbols, non-positive sizes or prices, and junk
// frames are counted and dropped.
//
// Reconnect policy: exponential backoff doubling from 1 s and capped at
// 60 s, reset after a healthy session. A "max connections" rejection from
// the server always sleeps the full 60 s before retrying.
// =============================================================================

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use crate::occ;
use crate::types::OptionTrade;

const FIREHOSE_URL: &str = "wss://socket.polygon.io/options";
const BACKOFF_START_SECS: u64 = 1;
const BACKOFF_CAP_SECS: u64 = 60;

/// Ingest counters shared with the status API.
#[derive(Debug, Default)]
pub struct FirehoseCounters {
    pub trades_received: AtomicU64,
    pub trades_malformed: AtomicU64,
    /// Dropped because the engine channel was full.
    pub trades_dropped: AtomicU64,
    pub reconnects: AtomicU64,
}

/// Run the firehose until shutdown, sending decoded trades into `tx`.
pub async fn run_firehose(
    api_key: String,
    tx: mpsc::Sender<OptionTrade>,
    counters: Arc<FirehoseCounters>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut backoff = BACKOFF_START_SECS;

    loop {
        if *shutdown.borrow() {
            return;
        }

        match firehose_session(&api_key, &tx, &counters, &mut shutdown).await {
            Ok(()) => return, // clean shutdown
            Err(e) => {
                counters.reconnects.fetch_add(1, Ordering::Relaxed);
                let msg = format!("{e}");
                // The server enforces one connection per key; back off the
                // full minute when it tells us we are over.
                let delay = if msg.to_lowercase().contains("max") && msg.to_lowercase().contains("connection") {
                    BACKOFF_CAP_SECS
                } else {
                    backoff
                };
                warn!(error = %e, delay_secs = delay, "firehose disconnected, reconnecting");
                tokio::select! {
                    _ = tokio::time::sleep(std::time::Duration::from_secs(delay)) => {}
                    _ = shutdown.changed() => return,
                }
                backoff = (backoff * 2).min(BACKOFF_CAP_SECS);
            }
        }
    }
}

async fn firehose_session(
    api_key: &str,
    tx: &mpsc::Sender<OptionTrade>,
    counters: &FirehoseCounters,
    shutdown: &mut watch::Receiver<bool>,
) -> Result<()> {
    let (ws, _) = connect_async(FIREHOSE_URL)
        .await
        .context("failed to connect to options firehose")?;
    info!("options firehose connected");

    let (mut write, mut read) = ws.split();

    let auth = serde_json::json!({"action": "auth", "params": api_key});
    write
        .send(Message::Text(auth.to_string()))
        .await
        .context("failed to send firehose auth")?;

    let subscribe = serde_json::json!({"action": "subscribe", "params": "T.*"});
    write
        .send(Message::Text(subscribe.to_string()))
        .await
        .context("failed to subscribe to T.*")?;

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                let _ = write.send(Message::Close(None)).await;
                return Ok(());
            }
            msg = read.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        handle_frame(&text, tx, counters).await?;
                    }
                    Some(Ok(Message::Ping(p))) => {
                        let _ = write.send(Message::Pong(p)).await;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Err(e.into()),
                    None => anyhow::bail!("firehose stream closed by server"),
                }
            }
        }
    }
}

async fn handle_frame(
    text: &str,
    tx: &mpsc::Sender<OptionTrade>,
    counters: &FirehoseCounters,
) -> Result<()> {
    let Ok(root) = serde_json::from_str::<serde_json::Value>(text) else {
        counters.trades_malformed.fetch_add(1, Ordering::Relaxed);
        return Ok(());
    };
    let Some(events) = root.as_array() else {
        return Ok(());
    };

    for ev in events {
        match ev["ev"].as_str() {
            Some("T") => match parse_trade(ev) {
                Some(trade) => {
                    counters.trades_received.fetch_add(1, Ordering::Relaxed);
                    // try_send: a full engine channel drops the trade
                    // rather than stalling the socket read loop.
                    match tx.try_send(trade) {
                        Ok(()) => {}
                        Err(mpsc::error::TrySendError::Full(_)) => {
                            counters.trades_dropped.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(mpsc::error::TrySendError::Closed(_)) => {
                            anyhow::bail!("engine channel closed");
                        }
                    }
                }
                None => {
                    counters.trades_malformed.fetch_add(1, Ordering::Relaxed);
                }
            },
            Some("status") => {
                let status = ev["status"].as_str().unwrap_or("");
                let message = ev["message"].as_str().unwrap_or("");
                debug!(status, message, "firehose status frame");
                if status == "auth_failed" {
                    anyhow::bail!("firehose auth failed: {message}");
                }
                if message.to_lowercase().contains("maximum number of connections") {
                    anyhow::bail!("max connections exceeded");
                }
            }
            _ => {}
        }
    }
    Ok(())
}

/// Decode one `T` event into an `OptionTrade`. Returns `None` on any
/// malformed field; the caller counts the drop.
fn parse_trade(ev: &serde_json::Value) -> Option<OptionTrade> {
    let raw_symbol = ev["sym"].as_str()?;
    let occ = occ::parse(raw_symbol).ok()?;

    let price = ev["p"].as_f64()?;
    let size = ev["s"].as_u64()?;
    if price <= 0.0 || size == 0 {
        return None;
    }

    // Timestamps arrive as nanoseconds since the epoch.
    let ts_ns = ev["t"].as_i64()?;
    let ts = DateTime::<Utc>::from_timestamp(ts_ns / 1_000_000_000, (ts_ns % 1_000_000_000) as u32)?;

    let conditions: Vec<i32> = ev["c"]
        .as_array()
        .map(|arr| arr.iter().filter_map(|v| v.as_i64().map(|x| x as i32)).collect())
        .unwrap_or_default();

    let stripped = raw_symbol.strip_prefix("O:").unwrap_or(raw_symbol);
    Some(OptionTrade::new(
        occ,
        stripped.to_string(),
        ts,
        price,
        size,
        &conditions,
    ))
}
