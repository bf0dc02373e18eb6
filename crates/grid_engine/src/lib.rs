//! Pure decision core of the grid engine: the per-side state machine, the
//! per-tick pipeline, the hedge controller and the Sync-Shield latency
//! predicate. No I/O and no clock — callers feed the heartbeat and `now`
//! (UNIX seconds) in, and get exactly one action back.

use std::collections::BTreeSet;

use core_types::{
    new_session_id, ActionResponse, ControlRequest, EngineError, MarketView, RowExecStats,
    RuntimeState, Side, SystemState, TickData, TpType, UserSettings,
};

mod hedge;
mod shield;

pub use shield::{in_flight, GRACE_SECS};

/// Deterministic processing order: BUY wins per-tick emission ties.
pub const SIDES: [Side; 2] = [Side::Buy, Side::Sell];

/// Outcome of a control mutation, mirrored into the HTTP status field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlOutcome {
    Applied,
    Emergency,
}

/// Runs the heartbeat pipeline over the owned state and returns the single
/// action for this tick. Both sides are processed every tick; once one side
/// has claimed the emission the other side's order waits for the next
/// heartbeat.
pub fn decide_tick(state: &mut SystemState, tick: &TickData, now: f64) -> ActionResponse {
    // A latched engine refuses the tick outright; nothing mutates until the
    // operator emergency-closes.
    if !state.runtime.error_status.is_empty() {
        return ActionResponse::wait_with_error(state.runtime.error_status.clone());
    }

    ingest(&mut state.runtime, tick);

    if let Err(detail) = validate_identity(&state.runtime, tick) {
        let message = format!("identity conflict: {detail}");
        tracing::error!(%message, "engine latched; emergency close required");
        state.runtime.error_status = message.clone();
        return ActionResponse::wait_with_error(message);
    }

    update_exec_maps(&mut state.runtime, tick, now);

    // Closing drain and completion first: a side that is draining owns the
    // tick until the broker confirms zero positions past the grace window.
    for side in SIDES {
        if let Some(response) = drain_or_finalize(state, side, tick, now) {
            return response;
        }
    }

    // Hedge monitor. A trigger locks the losing side and injects the
    // counter-volume; the injected row itself waits for the next heartbeat,
    // but a take-profit close below still outranks it on this tick.
    let mut injected = [false; 2];
    for side in SIDES {
        if let Some(counter) = hedge::check_and_inject(state, tick, side) {
            injected[slot(counter)] = true;
        }
    }

    for side in SIDES {
        if let Some(response) = check_take_profit(state, side, tick, now) {
            return response;
        }
    }

    for side in SIDES {
        check_external_close(state, side, tick, now);
    }

    for side in SIDES {
        if injected[slot(side)] {
            continue;
        }
        if let Some(response) = try_expand(state, side, tick, now) {
            return response;
        }
    }

    ActionResponse::wait()
}

fn slot(side: Side) -> usize {
    match side {
        Side::Buy => 0,
        Side::Sell => 1,
    }
}

fn ingest(runtime: &mut RuntimeState, tick: &TickData) {
    runtime.market = MarketView {
        ask: tick.ask,
        bid: tick.bid,
        mid: (tick.ask + tick.bid) / 2.0,
        equity: tick.equity,
        balance: tick.balance,
    };
}

/// Every position whose comment parses as a managed tag must carry the hash
/// of its side's current session. Anything else is an alien trade: the
/// engine latches and refuses to act until the operator emergency-closes.
fn validate_identity(runtime: &RuntimeState, tick: &TickData) -> Result<(), String> {
    for position in &tick.positions {
        let Ok(tag) = trade_tag::parse(&position.comment) else {
            continue; // foreign position, not ours
        };
        let known = session_hash(&runtime.side(tag.side).session_id) == tag.hash;
        if !known {
            return Err(format!(
                "unknown {} trade {} ({})",
                tag.side, position.ticket, position.comment
            ));
        }
    }
    Ok(())
}

/// Rebuilds each side's execution map from the broker's position list.
/// Indices the broker no longer reports are pruned, except while an order is
/// in flight; the everything-vanished case is left for the external-close
/// and closing-completion paths to interpret.
fn update_exec_maps(runtime: &mut RuntimeState, tick: &TickData, now: f64) {
    for side in SIDES {
        let hash = session_hash(&runtime.side(side).session_id).to_string();
        if hash.is_empty() {
            continue;
        }
        let rt = runtime.side_mut(side);
        let mut seen = BTreeSet::new();
        for position in &tick.positions {
            let Ok(tag) = trade_tag::parse(&position.comment) else {
                continue;
            };
            if tag.side != side || tag.hash != hash {
                continue;
            }
            rt.exec_map.insert(
                tag.index,
                RowExecStats {
                    index: tag.index,
                    entry_price: position.price,
                    lots: position.volume,
                    profit: position.profit,
                    timestamp: now,
                },
            );
            seen.insert(tag.index);
        }
        if !seen.is_empty() && !shield::in_flight(rt.last_order_sent_ts, now) {
            rt.exec_map.retain(|index, _| seen.contains(index));
        }
    }
}

fn drain_or_finalize(
    state: &mut SystemState,
    side: Side,
    tick: &TickData,
    now: f64,
) -> Option<ActionResponse> {
    if !state.runtime.side(side).is_closing {
        return None;
    }

    let session_id = state.runtime.side(side).session_id.clone();
    let open = count_session_positions(tick, side, &session_id);
    if open > 0 {
        state.runtime.side_mut(side).last_order_sent_ts = now;
        tracing::info!(%side, open, "draining side");
        return Some(ActionResponse::close_all(session_id));
    }

    if shield::in_flight(state.runtime.side(side).last_order_sent_ts, now) {
        // The broker may simply not have acknowledged the close yet.
        return None;
    }

    let cyclic = state.runtime.cyclic_on;
    let mid = state.runtime.market.mid;
    let rt = state.runtime.side_mut(side);
    rt.clear_session();
    if cyclic && rt.on {
        rt.start_ref = mid;
        tracing::info!(%side, "side closed; cyclic re-arm pending");
    } else {
        rt.on = false;
        rt.start_ref = 0.0;
        tracing::info!(%side, "side closed; session reset");
    }
    None
}

fn check_take_profit(
    state: &mut SystemState,
    side: Side,
    tick: &TickData,
    now: f64,
) -> Option<ActionResponse> {
    let tp_value = state.settings.tp_value(side);
    let rt = state.runtime.side(side);
    if tp_value <= 0.0 || rt.hedge_triggered || rt.is_closing || rt.exec_map.is_empty() {
        return None;
    }

    let target = match state.settings.tp_type(side) {
        TpType::EquityPct => {
            let basis = if rt.equity_at_arm > 0.0 {
                rt.equity_at_arm
            } else {
                tick.equity
            };
            basis * tp_value / 100.0
        }
        TpType::BalancePct => tick.balance * tp_value / 100.0,
        TpType::FixedMoney => tp_value,
    };

    let profit = rt.total_profit();
    if target <= 0.0 || profit < target {
        return None;
    }

    let comment = rt.session_id.clone();
    tracing::info!(%side, profit, target, "snap-back target reached; closing side");
    let rt = state.runtime.side_mut(side);
    rt.is_closing = true;
    rt.last_order_sent_ts = now;
    Some(ActionResponse::close_all(comment))
}

/// A session whose rows all vanished from the broker, outside of a closing
/// phase and past the grace window, was terminated externally. The engine
/// accepts the fact and resets the side.
fn check_external_close(state: &mut SystemState, side: Side, tick: &TickData, now: f64) {
    let rt = state.runtime.side(side);
    if rt.session_id.is_empty() || rt.exec_map.is_empty() || rt.is_closing {
        return;
    }
    if shield::in_flight(rt.last_order_sent_ts, now) {
        return;
    }
    if count_session_positions(tick, side, &rt.session_id) > 0 {
        return;
    }

    tracing::warn!(%side, session_id = %rt.session_id, "session terminated outside the engine");
    let cyclic = state.runtime.cyclic_on;
    let mid = state.runtime.market.mid;
    let rt = state.runtime.side_mut(side);
    rt.clear_session();
    if cyclic && rt.on {
        rt.start_ref = mid;
    } else {
        rt.on = false;
        rt.start_ref = 0.0;
    }
}

/// Arms a dormant side, resolves a pending limit, and fires the next grid
/// row when its price condition is met. The fired row is written to the
/// execution map optimistically; the broker's view replaces it on the next
/// heartbeat.
fn try_expand(
    state: &mut SystemState,
    side: Side,
    tick: &TickData,
    now: f64,
) -> Option<ActionResponse> {
    let limit_price = state.settings.limit_price(side);
    let rt = state.runtime.side_mut(side);
    if !rt.on || rt.is_closing || rt.hedge_triggered {
        return None;
    }

    if rt.session_id.is_empty() {
        rt.session_id = new_session_id(side);
        rt.exec_map.clear();
        rt.waiting_limit = limit_price > 0.0;
        rt.start_ref = 0.0;
        rt.equity_at_arm = 0.0;
        tracing::info!(%side, session_id = %rt.session_id, limit_price, "side armed");
    }

    if rt.waiting_limit {
        let crossed = match side {
            Side::Buy => tick.ask <= limit_price,
            Side::Sell => tick.bid >= limit_price,
        };
        if !crossed {
            return None;
        }
        rt.waiting_limit = false;
        tracing::info!(%side, limit_price, "limit crossed; anchor pending fill");
    }

    let k = rt.next_index();
    let row = state.settings.rows(side).get(k as usize)?;
    if row.lots <= 0.0 {
        return None;
    }

    let price = match side {
        Side::Buy => tick.ask,
        Side::Sell => tick.bid,
    };
    if k > 0 {
        let p_prev = rt.exec_map.get(&(k - 1)).map(|r| r.entry_price)?;
        let reached = match side {
            Side::Buy => tick.ask <= p_prev - row.dollar_gap,
            Side::Sell => tick.bid >= p_prev + row.dollar_gap,
        };
        if !reached {
            return None;
        }
    }

    if k == 0 {
        rt.start_ref = price;
        rt.equity_at_arm = tick.equity;
    }
    rt.exec_map.insert(
        k,
        RowExecStats {
            index: k,
            entry_price: price,
            lots: row.lots,
            profit: 0.0,
            timestamp: now,
        },
    );
    rt.last_order_sent_ts = now;
    let comment = trade_tag::encode(side, session_hash(&rt.session_id), k);
    tracing::info!(%side, index = k, price, lots = row.lots, "grid row fired");
    Some(ActionResponse::order(side, row.lots, comment, row.alert))
}

/// Full settings replacement with validation. Rows already executed in the
/// current session and pending hedge-injected rows keep their locked gap and
/// volume; only their alert flag follows the incoming value, so
/// acknowledging an alert is always allowed.
pub fn apply_settings(
    state: &mut SystemState,
    mut incoming: UserSettings,
) -> Result<(), EngineError> {
    for side in SIDES {
        if !(incoming.limit_price(side) >= 0.0) {
            return reject(format!("{side} limit price cannot be negative"));
        }
        if !(incoming.tp_value(side) >= 0.0) {
            return reject(format!("{side} take-profit value cannot be negative"));
        }
        if !(incoming.hedge_value(side) >= 0.0) {
            return reject(format!("{side} hedge value cannot be negative"));
        }
    }

    for side in SIDES {
        let executed = state.runtime.side(side).exec_map.len();
        let current = state.settings.rows(side).to_vec();
        let rows = incoming.rows_mut(side);
        if rows.len() < executed {
            return reject(format!(
                "cannot shrink {side} rows below {executed} executed levels"
            ));
        }
        for (i, row) in rows.iter_mut().enumerate() {
            if row.index as usize != i {
                return reject(format!("{side} rows must be indexed contiguously from 0"));
            }
            let current_row = current.get(i);
            let locked = i < executed || current_row.map(|r| r.hedge).unwrap_or(false);
            if locked {
                // Locked: the strata already exists at the broker, or the
                // hedge controller owns it until it deploys.
                if let Some(old) = current_row {
                    row.dollar_gap = old.dollar_gap;
                    row.lots = old.lots;
                    row.hedge = old.hedge;
                }
                continue;
            }
            // Only the hedge controller mints protocol rows.
            row.hedge = false;
            if !(row.lots > 0.0) {
                return reject(format!("{side} row {i} lots must be positive"));
            }
            if i >= 1 && !(row.dollar_gap > 0.0) {
                return reject(format!("{side} row {i} gap must be positive"));
            }
        }
    }

    state.settings = incoming;
    tracing::info!("settings updated");
    Ok(())
}

fn reject(reason: String) -> Result<(), EngineError> {
    Err(EngineError::InvalidSettings(reason))
}

/// Applies a control mutation. Present fields apply in declaration order;
/// emergency close always wins and reports its own status.
pub fn apply_control(state: &mut SystemState, request: &ControlRequest) -> ControlOutcome {
    if let Some(on) = request.buy_switch {
        set_side_switch(&mut state.runtime, Side::Buy, on);
    }
    if let Some(on) = request.sell_switch {
        set_side_switch(&mut state.runtime, Side::Sell, on);
    }
    if let Some(cyclic) = request.cyclic {
        state.runtime.cyclic_on = cyclic;
        tracing::info!(cyclic, "cyclic mode set");
    }
    if request.emergency_close == Some(true) {
        emergency_close(&mut state.runtime);
        return ControlOutcome::Emergency;
    }
    ControlOutcome::Applied
}

fn set_side_switch(runtime: &mut RuntimeState, side: Side, on: bool) {
    let rt = runtime.side_mut(side);
    if rt.on && !on && !rt.session_id.is_empty() {
        rt.is_closing = true;
        tracing::info!(%side, "operator disabled side with live session; draining");
    }
    rt.on = on;
}

fn emergency_close(runtime: &mut RuntimeState) {
    tracing::warn!("emergency close: draining both sides");
    runtime.cyclic_on = false;
    runtime.error_status.clear();
    for side in SIDES {
        let rt = runtime.side_mut(side);
        rt.on = false;
        if rt.session_id.is_empty() {
            rt.waiting_limit = false;
            rt.hedge_triggered = false;
        } else {
            rt.is_closing = true;
        }
    }
}

fn count_session_positions(tick: &TickData, side: Side, session_id: &str) -> usize {
    let hash = session_hash(session_id);
    if hash.is_empty() {
        return 0;
    }
    tick.positions
        .iter()
        .filter(|p| {
            trade_tag::parse(&p.comment)
                .map(|tag| tag.side == side && tag.hash == hash)
                .unwrap_or(false)
        })
        .count()
}

/// Hash part of a `{side}_{hash}` session id; empty for an idle side.
fn session_hash(session_id: &str) -> &str {
    session_id
        .split_once('_')
        .map(|(_, hash)| hash)
        .unwrap_or("")
}
