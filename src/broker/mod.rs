// =============================================================================
// Broker — REST trait, Alpaca client, and the equity trade stream
// =============================================================================
//
// The engine only ever talks to `dyn Broker`; the Alpaca client is the one
// production implementation. The trait exists so position-manager behavior
// (reconciliation, reentrancy, hard stops) is testable without a network.
// =============================================================================

pub mod client;
pub mod stream;

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDate;

pub use client::AlpacaClient;

/// Order direction for market orders.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Buy => "buy",
            Self::Sell => "sell",
        }
    }
}

/// A filled market order.
#[derive(Debug, Clone)]
pub struct OrderFill {
    pub order_id: String,
    pub filled_qty: f64,
    pub avg_price: f64,
}

/// One open position as reported by the broker.
#[derive(Debug, Clone)]
pub struct BrokerPosition {
    pub symbol: String,
    pub qty: f64,
    pub avg_entry_price: f64,
    pub current_price: Option<f64>,
}

/// Latest-trade snapshot for one equity.
#[derive(Debug, Clone, Copy)]
pub struct SpotSnapshot {
    pub price: f64,
    pub day_open: Option<f64>,
    pub prev_close: Option<f64>,
}

/// One daily bar.
#[derive(Debug, Clone, Copy)]
pub struct DailyBar {
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// The REST surface the engine needs from a broker account.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Current account equity in dollars.
    async fn account_equity(&self) -> Result<f64>;

    /// All open positions on the account.
    async fn open_positions(&self) -> Result<Vec<BrokerPosition>>;

    /// Submit a market order and wait for the fill.
    async fn submit_market_order(
        &self,
        symbol: &str,
        side: OrderSide,
        qty: f64,
    ) -> Result<OrderFill>;

    /// Latest trade snapshot for one symbol.
    async fn snapshot(&self, symbol: &str) -> Result<SpotSnapshot>;

    /// Daily bars per symbol over a trailing calendar window.
    async fn daily_bars(
        &self,
        symbols: &[String],
        lookback_days: i64,
    ) -> Result<HashMap<String, Vec<DailyBar>>>;
}

// =============================================================================
// Test double
// =============================================================================

#[cfg(test)]
pub mod mock {
    use super::*;
    use parking_lot::Mutex;

    /// Scripted broker for unit tests: fixed equity, settable positions and
    /// snapshots, every submitted order recorded.
    pub struct MockBroker {
        pub equity: Mutex<f64>,
        pub positions: Mutex<Vec<BrokerPosition>>,
        pub snapshots: Mutex<HashMap<String, SpotSnapshot>>,
        pub bars: Mutex<HashMap<String, Vec<DailyBar>>>,
        pub orders: Mutex<Vec<(String, OrderSide, f64)>>,
        /// Price used to fill orders when no snapshot exists.
        pub fill_price: Mutex<f64>,
        /// When set, every order submission fails with this message.
        pub fail_orders: Mutex<Option<String>>,
    }

    impl MockBroker {
        pub fn new() -> Self {
            Self {
                equity: Mutex::new(100_000.0),
                positions: Mutex::new(Vec::new()),
                snapshots: Mutex::new(HashMap::new()),
                bars: Mutex::new(HashMap::new()),
                orders: Mutex::new(Vec::new()),
                fill_price: Mutex::new(100.0),
                fail_orders: Mutex::new(None),
            }
        }

        pub fn set_snapshot(&self, symbol: &str, price: f64) {
            self.snapshots.lock().insert(
                symbol.to_string(),
                SpotSnapshot {
                    price,
                    day_open: Some(price),
                    prev_close: Some(price),
                },
            );
        }

        pub fn orders_for(&self, symbol: &str) -> Vec<(OrderSide, f64)> {
            self.orders
                .lock()
                .iter()
                .filter(|(s, _, _)| s == symbol)
                .map(|(_, side, qty)| (*side, *qty))
                .collect()
        }
    }

    #[async_trait]
    impl Broker for MockBroker {
        async fn account_equity(&self) -> Result<f64> {
            Ok(*self.equity.lock())
        }

        async fn open_positions(&self) -> Result<Vec<BrokerPosition>> {
            Ok(self.positions.lock().clone())
        }

        async fn submit_market_order(
            &self,
            symbol: &str,
            side: OrderSide,
            qty: f64,
        ) -> Result<OrderFill> {
            if let Some(msg) = self.fail_orders.lock().clone() {
                anyhow::bail!("{msg}");
            }
            self.orders.lock().push((symbol.to_string(), side, qty));
            let price = self
                .snapshots
                .lock()
                .get(symbol)
                .map(|s| s.price)
                .unwrap_or(*self.fill_price.lock());
            Ok(OrderFill {
                order_id: format!("mock-{symbol}-{}", self.orders.lock().len()),
                filled_qty: qty,
                avg_price: price,
            })
        }

        async fn snapshot(&self, symbol: &str) -> Result<SpotSnapshot> {
            self.snapshots
                .lock()
                .get(symbol)
                .copied()
                .ok_or_else(|| anyhow::anyhow!("no snapshot for {symbol}"))
        }

        async fn daily_bars(
            &self,
            symbols: &[String],
            _lookback_days: i64,
        ) -> Result<HashMap<String, Vec<DailyBar>>> {
            let bars = self.bars.lock();
            Ok(symbols
                .iter()
                .filter_map(|s| bars.get(s).map(|b| (s.clone(), b.clone())))
                .collect())
        }
    }
}
