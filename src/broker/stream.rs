// =============================================================================
// Equity Trade Stream — per-symbol subscriptions for the hard-stop monitor
// =============================================================================
//
// Connects to the Alpaca market-data WebSocket, authenticates, and keeps the
// trade subscription aligned with a shared watch set (the union of open
// symbols across both accounts). The watch set is diffed every few seconds;
// subscribe/unsubscribe frames are only sent when it changes.
//
// The connection loop runs until shutdown; individual failures reconnect
// after a short sleep, and the REST safety net covers any gap.
// =============================================================================

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use futures_util::{SinkExt, StreamExt};
use parking_lot::RwLock;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use crate::config::BrokerCreds;

const STREAM_URL: &str = "wss://stream.data.alpaca.markets/v2/iex";
const RECONNECT_DELAY_SECS: u64 = 5;
const RESUBSCRIBE_CHECK_SECS: u64 = 5;

/// One equity trade off the stream.
#[derive(Debug, Clone)]
pub struct EquityTrade {
    pub symbol: String,
    pub price: f64,
    pub size: u64,
    pub ts: DateTime<Utc>,
}

/// Run the stream until shutdown, feeding trades for watched symbols into
/// `tx`. `watch_set` is owned by the hard-stop monitor.
pub async fn run_equity_stream(
    creds: BrokerCreds,
    watch_set: Arc<RwLock<HashSet<String>>>,
    tx: mpsc::Sender<EquityTrade>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        if *shutdown.borrow() {
            return;
        }

        match stream_session(&creds, &watch_set, &tx, &mut shutdown).await {
            Ok(()) => return, // clean shutdown
            Err(e) => {
                warn!(error = %e, "equity stream error, reconnecting");
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(std::time::Duration::from_secs(RECONNECT_DELAY_SECS)) => {}
            _ = shutdown.changed() => return,
        }
    }
}

async fn stream_session(
    creds: &BrokerCreds,
    watch_set: &Arc<RwLock<HashSet<String>>>,
    tx: &mpsc::Sender<EquityTrade>,
    shutdown: &mut watch::Receiver<bool>,
) -> Result<()> {
    let (ws, _) = connect_async(STREAM_URL)
        .await
        .context("failed to connect to equity stream")?;
    info!("equity stream connected");

    let (mut write, mut read) = ws.split();

    let auth = serde_json::json!({
        "action": "auth",
        "key": creds.key,
        "secret": creds.secret,
    });
    write
        .send(Message::Text(auth.to_string()))
        .await
        .context("failed to send auth frame")?;

    let mut subscribed: HashSet<String> = HashSet::new();
    let mut check = tokio::time::interval(std::time::Duration::from_secs(
        RESUBSCRIBE_CHECK_SECS,
    ));

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                let _ = write.send(Message::Close(None)).await;
                return Ok(());
            }
            _ = check.tick() => {
                let desired = watch_set.read().clone();
                let add: Vec<String> = desired.difference(&subscribed).cloned().collect();
                let drop: Vec<String> = subscribed.difference(&desired).cloned().collect();

                if !add.is_empty() {
                    let frame = serde_json::json!({"action": "subscribe", "trades": add});
                    write.send(Message::Text(frame.to_string())).await
                        .context("failed to send subscribe frame")?;
                    debug!(count = frame["trades"].as_array().map(|a| a.len()).unwrap_or(0), "subscribed symbols");
                }
                if !drop.is_empty() {
                    let frame = serde_json::json!({"action": "unsubscribe", "trades": drop});
                    write.send(Message::Text(frame.to_string())).await
                        .context("failed to send unsubscribe frame")?;
                }
                subscribed = desired;
            }
            msg = read.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        for trade in parse_trades(&text) {
                            if tx.send(trade).await.is_err() {
                                return Ok(()); // receiver gone — shutting down
                            }
                        }
                    }
                    Some(Ok(Message::Ping(p))) => {
                        let _ = write.send(Message::Pong(p)).await;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Err(e.into()),
                    None => anyhow::bail!("equity stream closed by server"),
                }
            }
        }
    }
}

/// Extract trade events from a stream frame. Control frames (success,
/// subscription acks, errors) yield nothing.
fn parse_trades(text: &str) -> Vec<EquityTrade> {
    let Ok(root) = serde_json::from_str::<serde_json::Value>(text) else {
        warn!("unparseable equity stream frame");
        return Vec::new();
    };
    let Some(events) = root.as_array() else {
        return Vec::new();
    };

    let mut trades = Vec::new();
    for ev in events {
        if ev["T"].as_str() != Some("t") {
            if ev["T"].as_str() == Some("error") {
                warn!(frame = %ev, "equity stream error frame");
            }
            continue;
        }
        let (Some(symbol), Some(price)) = (ev["S"].as_str(), ev["p"].as_f64()) else {
            continue;
        };
        if price <= 0.0 {
            continue;
        }
        let ts = ev["t"]
            .as_str()
            .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
            .map(|t| t.with_timezone(&Utc))
            .unwrap_or_else(Utc::now);

        trades.push(EquityTrade {
            symbol: symbol.to_string(),
            price,
            size: ev["s"].as_u64().unwrap_or(0),
            ts,
        });
    }
    trades
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_trade_events() {
        let frame = r#"[{"T":"t","S":"XYZ","p":97.99,"s":100,"t":"2024-06-18T14:30:00.123456789Z"}]"#;
        let trades = parse_trades(frame);
        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].symbol, "XYZ");
        assert!((trades[0].price - 97.99).abs() < 1e-9);
        assert_eq!(trades[0].size, 100);
    }

    #[test]
    fn ignores_control_frames() {
        let frame = r#"[{"T":"success","msg":"authenticated"}]"#;
        assert!(parse_trades(frame).is_empty());
        assert!(parse_trades("not json").is_empty());
        assert!(parse_trades("{}").is_empty());
    }

    #[test]
    fn skips_nonpositive_prices() {
        let frame = r#"[{"T":"t","S":"XYZ","p":0.0,"s":1,"t":"2024-06-18T14:30:00Z"}]"#;
        assert!(parse_trades(frame).is_empty());
    }

    #[test]
    fn mixed_frame_keeps_only_trades() {
        let frame = r#"[
            {"T":"subscription","trades":["XYZ"]},
            {"T":"t","S":"XYZ","p":101.5,"s":10,"t":"2024-06-18T14:30:00Z"},
            {"T":"t","S":"ABC","p":55.0,"s":5,"t":"2024-06-18T14:30:01Z"}
        ]"#;
        let trades = parse_trades(frame);
        assert_eq!(trades.len(), 2);
        assert_eq!(trades[1].symbol, "ABC");
    }
}
