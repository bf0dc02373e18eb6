/// Broker acknowledgment latency window. While an order emitted for a side
/// is younger than this, "no positions" reports from the terminal are
/// disregarded for that side.
pub const GRACE_SECS: f64 = 5.0;

/// True while the side's most recent order may not yet be visible in the
/// terminal's position list. A side that never ordered is never in flight.
pub fn in_flight(last_order_sent_ts: f64, now: f64) -> bool {
    last_order_sent_ts > 0.0 && now - last_order_sent_ts < GRACE_SECS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grace_window_bounds() {
        assert!(in_flight(10.0, 10.0));
        assert!(in_flight(10.0, 14.9));
        assert!(!in_flight(10.0, 15.0));
        assert!(!in_flight(10.0, 20.0));
    }

    #[test]
    fn never_ordered_is_never_in_flight() {
        assert!(!in_flight(0.0, 0.0));
        assert!(!in_flight(0.0, 1.0));
    }
}
