//! 전송 통계

use std::time::Duration;

/// 연결(신뢰성 계층) 통계 스냅샷
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ConnectionStats {
    /// 평활 RTT
    pub rtt: Duration,

    /// 송신 패킷 수
    pub sent: u64,

    /// 수신 패킷 수
    pub received: u64,

    /// 확인된 패킷 수
    pub acked: u64,

    /// 손실 판정 패킷 수
    pub lost: u64,

    /// 확인 대기 중인 패킷 수
    pub pending: usize,

    /// 송신 대역폭 (kbps)
    pub sent_bandwidth_kbps: f64,

    /// 확인 대역폭 (kbps)
    pub acked_bandwidth_kbps: f64,
}

impl ConnectionStats {
    /// 손실률 (송신 대비)
    pub fn loss_rate(&self) -> f64 {
        if self.sent == 0 {
            return 0.0;
        }
        self.lost as f64 / self.sent as f64
    }

    /// 통계 요약 문자열
    pub fn summary(&self) -> String {
        format!(
            "rtt {:.1}ms, sent {}, acked {}, lost {} ({:.1}%), sent bandwidth = {:.1}kbps, acked bandwidth = {:.1}kbps",
            self.rtt.as_secs_f64() * 1000.0,
            self.sent,
            self.acked,
            self.lost,
            self.loss_rate() * 100.0,
            self.sent_bandwidth_kbps,
            self.acked_bandwidth_kbps,
        )
    }
}

/// 파일 전송 통계
#[derive(Debug, Clone, PartialEq)]
pub struct TransferStats {
    /// 파일 이름
    pub filename: String,

    /// 파일 크기 (바이트)
    pub file_size: u64,

    /// 총 슬라이스 수
    pub total_slices: u64,

    /// 메타데이터 수신부터 조립 완료까지 걸린 시간
    pub elapsed: Duration,
}

impl TransferStats {
    /// 처리율 (Mbps)
    pub fn throughput_mbps(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs == 0.0 {
            return 0.0;
        }
        (self.file_size as f64 * 8.0 / 1_000_000.0) / secs
    }

    /// 통계 요약 문자열
    pub fn summary(&self) -> String {
        format!(
            "{} | {} bytes in {} slices | Time: {:.3}s | Speed: {:.2} Mbps",
            self.filename,
            self.file_size,
            self.total_slices,
            self.elapsed.as_secs_f64(),
            self.throughput_mbps(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loss_rate() {
        let stats = ConnectionStats {
            sent: 200,
            lost: 5,
            ..Default::default()
        };
        assert!((stats.loss_rate() - 0.025).abs() < 1e-12);
        assert_eq!(ConnectionStats::default().loss_rate(), 0.0);
        assert!(stats.summary().contains("lost 5 (2.5%)"));
    }

    #[test]
    fn test_throughput() {
        let stats = TransferStats {
            filename: "a.bin".into(),
            file_size: 1_000_000,
            total_slices: 4049,
            elapsed: Duration::from_secs(2),
        };
        assert!((stats.throughput_mbps() - 4.0).abs() < 1e-9);

        let instant = TransferStats {
            elapsed: Duration::ZERO,
            ..stats
        };
        assert_eq!(instant.throughput_mbps(), 0.0);
    }
}
