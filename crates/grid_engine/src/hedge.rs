use core_types::{new_session_id, GridRow, Side, SystemState, TickData};

/// Evaluates the hedge trigger for `side` and, when it fires, locks the side
/// and injects the counter-volume into the opposite side's grid. Returns the
/// counter side when its grid was mutated: the caller holds that side's
/// expansion for one heartbeat so the injected row goes out as a normal
/// expansion emission on the next tick.
pub(crate) fn check_and_inject(
    state: &mut SystemState,
    tick: &TickData,
    side: Side,
) -> Option<Side> {
    let hedge_value = state.settings.hedge_value(side);
    let rt = state.runtime.side(side);
    if hedge_value <= 0.0
        || rt.hedge_triggered
        || rt.is_closing
        || rt.session_id.is_empty()
        || rt.exec_map.is_empty()
    {
        return None;
    }

    let side_profit = rt.total_profit();
    if side_profit > -hedge_value {
        return None;
    }

    let volume = rt.total_lots();
    tracing::warn!(
        %side,
        profit = side_profit,
        threshold = -hedge_value,
        volume,
        "hedge lock engaged"
    );
    state.runtime.side_mut(side).hedge_triggered = true;

    let counter = side.opposite();
    inject_counter(state, counter, volume, tick).then_some(counter)
}

/// Deploys the locked side's total volume on the opposite side. Skipped when
/// that side is draining; the lock on the losing side stands regardless.
fn inject_counter(state: &mut SystemState, counter: Side, volume: f64, tick: &TickData) -> bool {
    if state.runtime.side(counter).is_closing {
        tracing::warn!(side = %counter, "counter side is draining; hedge volume not deployed");
        return false;
    }

    let rt = state.runtime.side_mut(counter);
    if !rt.on || rt.session_id.is_empty() || rt.exec_map.is_empty() {
        // Counter side dormant: force a fresh session whose only row is the
        // hedge volume, fired at market by the next tick's expansion step.
        rt.on = true;
        rt.session_id = new_session_id(counter);
        rt.exec_map.clear();
        rt.waiting_limit = false;
        rt.start_ref = 0.0;
        rt.equity_at_arm = 0.0;
        let session_id = rt.session_id.clone();
        *state.settings.rows_mut(counter) = vec![GridRow {
            index: 0,
            dollar_gap: 0.0,
            lots: volume,
            alert: true,
            hedge: true,
        }];
        tracing::info!(side = %counter, %session_id, volume, "hedge counter session initialized");
    } else {
        // Counter side live: append a row whose trigger lands exactly on the
        // current market, so its condition is already satisfied. The gap is
        // signed; it equals |p_last - p_now| whenever the market sits past
        // the last entry in the adverse direction.
        let entry = match counter {
            Side::Buy => tick.ask,
            Side::Sell => tick.bid,
        };
        let p_last = rt.last_entry_price().unwrap_or(rt.start_ref);
        let gap = match counter {
            Side::Buy => p_last - entry,
            Side::Sell => entry - p_last,
        };
        let rows = state.settings.rows_mut(counter);
        let index = rows.len() as u32;
        rows.push(GridRow {
            index,
            dollar_gap: gap,
            lots: volume,
            alert: true,
            hedge: true,
        });
        tracing::info!(side = %counter, index, gap, volume, "hedge row appended to live session");
    }
    true
}
