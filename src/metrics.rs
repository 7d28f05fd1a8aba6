//! Simulation-global metric accumulators and the final report.

/// `{pdr, avg_latency_s, avg_hops, delivered, attempted}`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Report {
    pub pdr: f64,
    pub avg_latency_s: f64,
    pub avg_hops: f64,
    pub delivered: u64,
    pub attempted: u64,
}

#[derive(Debug, Default)]
pub struct Metrics {
    attempted: u64,
    delivered: u64,
    sum_latency_us: u128,
    sum_hops: u64,
}

impl Metrics {
    pub fn new() -> Self {
        Metrics::default()
    }

    /// Counted the moment a DataMsg is emitted from the source
    /// (post-handshake), not per SessionReq.
    pub fn record_attempt(&mut self) {
        self.attempted += 1;
    }

    /// Every arrival at the destination counts, even duplicates that reach
    /// it via distinct paths.
    pub fn record_delivery(&mut self, latency_us: u64, hops: usize) {
        self.delivered += 1;
        self.sum_latency_us += latency_us as u128;
        self.sum_hops += hops as u64;
    }

    pub fn report(&self) -> Report {
        let attempted_divisor = self.attempted.max(1);
        let delivered_divisor = self.delivered.max(1) as u128;
        Report {
            pdr: self.delivered as f64 / attempted_divisor as f64,
            avg_latency_s: (self.sum_latency_us as f64 / delivered_divisor as f64) / 1_000_000.0,
            avg_hops: self.sum_hops as f64 / delivered_divisor as f64,
            delivered: self.delivered,
            attempted: self.attempted,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_with_no_traffic_avoids_division_by_zero() {
        let m = Metrics::new();
        let r = m.report();
        assert_eq!(r.pdr, 0.0);
        assert_eq!(r.avg_latency_s, 0.0);
        assert_eq!(r.avg_hops, 0.0);
    }

    #[test]
    fn report_computes_pdr_and_averages() {
        let mut m = Metrics::new();
        m.record_attempt();
        m.record_attempt();
        m.record_delivery(2_000_000, 3);
        let r = m.report();
        assert_eq!(r.attempted, 2);
        assert_eq!(r.delivered, 1);
        assert_eq!(r.pdr, 0.5);
        assert_eq!(r.avg_latency_s, 2.0);
        assert_eq!(r.avg_hops, 3.0);
    }
}
