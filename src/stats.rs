//! Per-connection counters and derived statistics.

use crate::time::{Duration, Instant};
use core::fmt;

/// Counters accumulated by one connection endpoint over its lifetime.
///
/// All protocol-level failures (CRC errors, duplicates, queue overflows) end up here
/// rather than as errors; see the error handling notes in the crate docs.
#[derive(Clone, Debug, Default)]
pub struct ConnectionStats {
    /// Time spent actively transmitting.
    pub tx_time: Duration,
    /// Time spent in inter-frame spacing.
    pub idle_time: Duration,
    /// Time spent listening (whether or not a packet arrived).
    pub listen_time: Duration,
    /// Time spent sleeping between connection events.
    pub sleep_time: Duration,

    /// Total packets transmitted, including retransmissions.
    pub tx_packets: u64,
    /// Retransmitted packets (subset of `tx_packets`).
    pub retransmitted_packets: u64,
    /// Transmitted packets carrying application data.
    pub data_packets: u64,
    /// Transmitted LL control packets.
    pub control_packets: u64,
    /// Transmitted empty PDUs.
    pub empty_packets: u64,
    /// In-flight packets acknowledged by the peer.
    pub acked_packets: u64,

    /// Packets received with a valid CRC.
    pub rx_packets: u64,
    /// Received retransmissions of already-delivered packets.
    pub rx_duplicates: u64,
    /// Received packets that failed the CRC check.
    pub crc_failures: u64,
    /// Received LL control packets.
    pub rx_control_packets: u64,

    /// Octets transmitted on air (whole frames).
    pub tx_bytes: u64,
    /// Octets received on air (whole frames, valid CRC only).
    pub rx_bytes: u64,
    /// Application payload octets transmitted.
    pub tx_payload_bytes: u64,
    /// Application payload octets delivered to the upper layer.
    pub rx_payload_bytes: u64,

    /// Sum of end-to-end packet latencies (enqueue at source to delivery).
    pub total_latency: Duration,
    pub latency_samples: u64,
    /// Sum of link-layer round-trip times (first transmission to acknowledgement).
    pub total_rtt: Duration,
    pub rtt_samples: u64,

    /// Enqueue attempts rejected because the transmit queue was full.
    pub queue_overflows: u64,
}

impl ConnectionStats {
    /// Fraction of transmitted packets that needed retransmission.
    pub fn packet_loss_ratio(&self) -> f64 {
        if self.tx_packets == 0 {
            0.0
        } else {
            self.retransmitted_packets as f64 / self.tx_packets as f64
        }
    }

    /// Delivered application throughput in kilobits per second over `elapsed`.
    pub fn throughput_kbps(&self, elapsed: Duration) -> f64 {
        let secs = elapsed.as_micros() as f64 / 1e6;
        if secs == 0.0 {
            0.0
        } else {
            (self.rx_payload_bytes * 8) as f64 / secs / 1e3
        }
    }

    /// Mean end-to-end packet latency in seconds.
    pub fn avg_latency_s(&self) -> f64 {
        if self.latency_samples == 0 {
            0.0
        } else {
            self.total_latency.as_micros() as f64 / self.latency_samples as f64 / 1e6
        }
    }

    /// Mean link-layer round-trip time in seconds.
    pub fn avg_rtt_s(&self) -> f64 {
        if self.rtt_samples == 0 {
            0.0
        } else {
            self.total_rtt.as_micros() as f64 / self.rtt_samples as f64 / 1e6
        }
    }

    pub fn record_latency(&mut self, delivered_at: Instant, produced_at: Instant) {
        self.total_latency += delivered_at - produced_at;
        self.latency_samples += 1;
    }

    pub fn record_rtt(&mut self, acked_at: Instant, sent_at: Instant) {
        self.total_rtt += acked_at - sent_at;
        self.rtt_samples += 1;
    }

    /// Renders a human-readable report for the end-of-run summary.
    pub fn report(&self, elapsed: Duration) -> StatsReport<'_> {
        StatsReport {
            stats: self,
            elapsed,
        }
    }
}

/// Display adapter produced by [`ConnectionStats::report`].
pub struct StatsReport<'a> {
    stats: &'a ConnectionStats,
    elapsed: Duration,
}

impl fmt::Display for StatsReport<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = self.stats;
        writeln!(
            f,
            "tx: {} pkts ({} data, {} control, {} empty, {} retx), {} bytes",
            s.tx_packets, s.data_packets, s.control_packets, s.empty_packets,
            s.retransmitted_packets, s.tx_bytes
        )?;
        writeln!(
            f,
            "rx: {} pkts ({} dup, {} bad crc), {} bytes, {} payload bytes",
            s.rx_packets, s.rx_duplicates, s.crc_failures, s.rx_bytes, s.rx_payload_bytes
        )?;
        writeln!(
            f,
            "acked: {} pkts, queue overflows: {}",
            s.acked_packets, s.queue_overflows
        )?;
        writeln!(
            f,
            "loss ratio: {:.4}, throughput: {:.2} Kbps, latency: {:.6}s, rtt: {:.6}s",
            s.packet_loss_ratio(),
            s.throughput_kbps(self.elapsed),
            s.avg_latency_s(),
            s.avg_rtt_s()
        )?;
        write!(
            f,
            "time: tx {}, idle {}, listen {}, sleep {}",
            s.tx_time, s.idle_time, s.listen_time, s.sleep_time
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derived_figures() {
        let mut s = ConnectionStats::default();
        assert_eq!(s.packet_loss_ratio(), 0.0);
        assert_eq!(s.avg_latency_s(), 0.0);

        s.tx_packets = 100;
        s.retransmitted_packets = 5;
        s.rx_payload_bytes = 12_500;
        s.record_latency(Instant::from_micros(3_000), Instant::from_micros(1_000));
        s.record_latency(Instant::from_micros(9_000), Instant::from_micros(5_000));

        assert!((s.packet_loss_ratio() - 0.05).abs() < 1e-9);
        // 12_500 B * 8 / 1 s = 100 kbit/s
        assert!((s.throughput_kbps(Duration::from_secs(1)) - 100.0).abs() < 1e-9);
        assert!((s.avg_latency_s() - 0.003).abs() < 1e-9);
    }
}
