use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// One of the two independent accumulation sides. Everything per-side in the
/// engine is symmetric between them; they share only the symbol, the cyclic
/// flag and the emergency control.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn opposite(self) -> Side {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Side::Buy => "buy",
            Side::Sell => "sell",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a side's take-profit target is derived from the heartbeat.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum TpType {
    #[default]
    EquityPct,
    BalancePct,
    FixedMoney,
}

/// One planned grid entry. Row 0 is the anchor; its `dollar_gap` is never
/// read. `alert` is a one-shot UI flag the UI clears by writing it back as
/// false. `hedge` marks rows minted by the hedge controller: they stay
/// protocol-owned in settings updates until they deploy, and a Case B gap
/// may legitimately be non-positive.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GridRow {
    pub index: u32,
    pub dollar_gap: f64,
    pub lots: f64,
    #[serde(default)]
    pub alert: bool,
    #[serde(default)]
    pub hedge: bool,
}

/// Direction reported by the terminal for a broker position.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum PositionType {
    Buy,
    Sell,
}

/// A broker position as reported in the heartbeat. The engine keys off the
/// parsed `comment` tag; `kind` is informational.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Position {
    pub ticket: i64,
    #[serde(rename = "type")]
    pub kind: PositionType,
    pub volume: f64,
    pub price: f64,
    pub profit: f64,
    pub comment: String,
}

/// Heartbeat payload posted by the terminal once per second.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TickData {
    pub account_id: String,
    pub equity: f64,
    pub balance: f64,
    pub symbol: String,
    pub ask: f64,
    pub bid: f64,
    #[serde(default)]
    pub positions: Vec<Position>,
}

/// Execution record for one fired grid row, rebuilt from broker positions on
/// every tick (and written optimistically when the order is emitted).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RowExecStats {
    pub index: u32,
    pub entry_price: f64,
    pub lots: f64,
    pub profit: f64,
    /// UNIX seconds of the last upsert.
    pub timestamp: f64,
}

/// Operator configuration. The flat field names are the wire contract with
/// the terminal and the UI.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct UserSettings {
    pub buy_limit_price: f64,
    pub sell_limit_price: f64,
    pub buy_tp_type: TpType,
    pub buy_tp_value: f64,
    pub sell_tp_type: TpType,
    pub sell_tp_value: f64,
    pub buy_hedge_value: f64,
    pub sell_hedge_value: f64,
    pub rows_buy: Vec<GridRow>,
    pub rows_sell: Vec<GridRow>,
}

impl UserSettings {
    pub fn limit_price(&self, side: Side) -> f64 {
        match side {
            Side::Buy => self.buy_limit_price,
            Side::Sell => self.sell_limit_price,
        }
    }

    pub fn tp_type(&self, side: Side) -> TpType {
        match side {
            Side::Buy => self.buy_tp_type,
            Side::Sell => self.sell_tp_type,
        }
    }

    pub fn tp_value(&self, side: Side) -> f64 {
        match side {
            Side::Buy => self.buy_tp_value,
            Side::Sell => self.sell_tp_value,
        }
    }

    pub fn hedge_value(&self, side: Side) -> f64 {
        match side {
            Side::Buy => self.buy_hedge_value,
            Side::Sell => self.sell_hedge_value,
        }
    }

    pub fn rows(&self, side: Side) -> &[GridRow] {
        match side {
            Side::Buy => &self.rows_buy,
            Side::Sell => &self.rows_sell,
        }
    }

    pub fn rows_mut(&mut self, side: Side) -> &mut Vec<GridRow> {
        match side {
            Side::Buy => &mut self.rows_buy,
            Side::Sell => &mut self.rows_sell,
        }
    }
}

/// Lifecycle phase of one side, derived from the runtime flags. Never stored.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SidePhase {
    Idle,
    WaitingLimit,
    Armed,
    Closing,
    HedgeLocked,
}

impl fmt::Display for SidePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = match self {
            Self::Idle => "idle",
            Self::WaitingLimit => "waiting_limit",
            Self::Armed => "armed",
            Self::Closing => "closing",
            Self::HedgeLocked => "hedge_locked",
        };
        f.write_str(value)
    }
}

/// Mutable per-side runtime. `exec_map` is keyed by row index; its length is
/// the next index to fire within the current session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct SideRuntime {
    pub on: bool,
    pub session_id: String,
    pub waiting_limit: bool,
    pub is_closing: bool,
    pub hedge_triggered: bool,
    pub exec_map: BTreeMap<u32, RowExecStats>,
    pub start_ref: f64,
    /// Account equity captured at the row-0 fill; 0 until captured. Basis for
    /// `equity_pct` targets for the whole session.
    pub equity_at_arm: f64,
    /// UNIX seconds of the most recent order emission for this side; 0 if
    /// never. Feeds the Sync-Shield grace predicate.
    pub last_order_sent_ts: f64,
}

impl SideRuntime {
    pub fn phase(&self) -> SidePhase {
        if self.is_closing {
            SidePhase::Closing
        } else if self.hedge_triggered {
            SidePhase::HedgeLocked
        } else if self.session_id.is_empty() {
            SidePhase::Idle
        } else if self.waiting_limit {
            SidePhase::WaitingLimit
        } else {
            SidePhase::Armed
        }
    }

    /// Aggregate unrealized profit across the side's executed rows.
    pub fn total_profit(&self) -> f64 {
        self.exec_map.values().map(|r| r.profit).sum()
    }

    /// Aggregate volume across the side's executed rows.
    pub fn total_lots(&self) -> f64 {
        self.exec_map.values().map(|r| r.lots).sum()
    }

    /// Entry price of the highest executed row, if any.
    pub fn last_entry_price(&self) -> Option<f64> {
        self.exec_map.values().next_back().map(|r| r.entry_price)
    }

    /// Next grid index to fire.
    pub fn next_index(&self) -> u32 {
        self.exec_map.len() as u32
    }

    /// Drops every trace of the current session. `on` and `start_ref` are
    /// left to the caller since idle vs cyclic re-arm differ there.
    pub fn clear_session(&mut self) {
        self.session_id.clear();
        self.exec_map.clear();
        self.waiting_limit = false;
        self.is_closing = false;
        self.hedge_triggered = false;
        self.equity_at_arm = 0.0;
    }
}

/// Last-seen market snapshot from the heartbeat, shared by both sides.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct MarketView {
    pub ask: f64,
    pub bid: f64,
    pub mid: f64,
    pub equity: f64,
    pub balance: f64,
}

/// The full mutable runtime, owned exclusively by the engine event loop.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct RuntimeState {
    pub buy: SideRuntime,
    pub sell: SideRuntime,
    pub cyclic_on: bool,
    /// Single user-visible health string; empty = healthy. Latched on
    /// identity conflicts and corrupt-snapshot loads, cleared only by
    /// emergency close.
    pub error_status: String,
    pub market: MarketView,
}

impl RuntimeState {
    pub fn side(&self, side: Side) -> &SideRuntime {
        match side {
            Side::Buy => &self.buy,
            Side::Sell => &self.sell,
        }
    }

    pub fn side_mut(&mut self, side: Side) -> &mut SideRuntime {
        match side {
            Side::Buy => &mut self.buy,
            Side::Sell => &mut self.sell,
        }
    }
}

/// The single persisted aggregate: settings plus runtime.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct SystemState {
    pub settings: UserSettings,
    pub runtime: RuntimeState,
    pub last_update: String,
}

/// Action command returned to the terminal. At most one per heartbeat.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionKind {
    Wait,
    Buy,
    Sell,
    CloseAll,
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = match self {
            Self::Wait => "WAIT",
            Self::Buy => "BUY",
            Self::Sell => "SELL",
            Self::CloseAll => "CLOSE_ALL",
        };
        f.write_str(value)
    }
}

/// Wire response for `POST /api/tick`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActionResponse {
    pub action: ActionKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alert: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ActionResponse {
    pub fn wait() -> Self {
        Self {
            action: ActionKind::Wait,
            volume: None,
            comment: None,
            alert: None,
            error: None,
        }
    }

    pub fn wait_with_error(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::wait()
        }
    }

    pub fn order(side: Side, volume: f64, comment: String, alert: bool) -> Self {
        Self {
            action: match side {
                Side::Buy => ActionKind::Buy,
                Side::Sell => ActionKind::Sell,
            },
            volume: Some(volume),
            comment: Some(comment),
            alert: Some(alert),
            error: None,
        }
    }

    pub fn close_all(comment: String) -> Self {
        Self {
            action: ActionKind::CloseAll,
            volume: None,
            comment: Some(comment),
            alert: None,
            error: None,
        }
    }

    pub fn is_wait(&self) -> bool {
        self.action == ActionKind::Wait
    }
}

/// Body of `POST /api/control`. Fields present in the request apply in
/// declaration order within a single engine event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct ControlRequest {
    pub buy_switch: Option<bool>,
    pub sell_switch: Option<bool>,
    pub cyclic: Option<bool>,
    pub emergency_close: Option<bool>,
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("settings rejected: {0}")]
    InvalidSettings(String),
}

/// Allocates a fresh session id: `{side}_{8 lowercase hex}`.
pub fn new_session_id(side: Side) -> String {
    let hex = Uuid::new_v4().simple().to_string();
    format!("{side}_{}", &hex[..8])
}
