//! 신뢰성 계층
//!
//! 연결별 패킷 장부:
//! - 송신 시퀀스 발급, 미확인(pending) 패킷 추적
//! - 수신 헤더의 ack/비트필드로 확인/손실 판정
//! - 지수 이동 평균 RTT, 송신/확인 대역폭 측정
//!
//! 시간은 `update(dt)`로만 전진하는 논리 시계를 사용한다.

use std::collections::VecDeque;
use std::time::Duration;

use tracing::trace;

use crate::ack::AckBitfield;
use crate::packet::PacketHeader;
use crate::sequence::{distance, more_recent, SequenceNumber, Sequencer};
use crate::stats::ConnectionStats;
use crate::Config;

/// 보관할 최근 수신 시퀀스 수 (비트필드 32개 + 여유)
const RECEIVED_HISTORY: u32 = 34;

/// RTT 평활 계수
const RTT_SMOOTHING: f64 = 0.1;

/// 아직 아무것도 받지 못했을 때 헤더에 싣는 ack 값 (시퀀스 0의 직전)
pub const NO_ACK: SequenceNumber = SequenceNumber::MAX;

/// 확인 대기 중인 송신 패킷
#[derive(Debug, Clone, Copy)]
struct PendingAck {
    sequence: SequenceNumber,
    send_time: Duration,
    size: usize,
}

/// 대역폭 윈도우 샘플
#[derive(Debug, Clone, Copy)]
struct WindowSample {
    at: Duration,
    size: usize,
}

/// 연결별 신뢰성 시스템
#[derive(Debug)]
pub struct ReliabilitySystem {
    sequencer: Sequencer,
    remote_sequence: Option<SequenceNumber>,
    received_history: VecDeque<SequenceNumber>,
    pending: VecDeque<PendingAck>,

    sent_window: VecDeque<WindowSample>,
    acked_window: VecDeque<WindowSample>,

    /// 이번 틱에 확인된 시퀀스
    acks: Vec<SequenceNumber>,

    clock: Duration,
    loss_timeout: Duration,
    bandwidth_window: Duration,

    sent_packets: u64,
    received_packets: u64,
    acked_packets: u64,
    lost_packets: u64,

    /// 평활 RTT (초)
    rtt: f64,
    sent_bandwidth: f64,
    acked_bandwidth: f64,
}

impl ReliabilitySystem {
    pub fn new(loss_timeout: Duration, bandwidth_window: Duration) -> Self {
        Self {
            sequencer: Sequencer::new(),
            remote_sequence: None,
            received_history: VecDeque::with_capacity(RECEIVED_HISTORY as usize + 1),
            pending: VecDeque::new(),
            sent_window: VecDeque::new(),
            acked_window: VecDeque::new(),
            acks: Vec::new(),
            clock: Duration::ZERO,
            loss_timeout,
            bandwidth_window,
            sent_packets: 0,
            received_packets: 0,
            acked_packets: 0,
            lost_packets: 0,
            rtt: 0.0,
            sent_bandwidth: 0.0,
            acked_bandwidth: 0.0,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.loss_timeout, config.bandwidth_window)
    }

    /// 첫 송신 시퀀스 지정 (`reset` 후에는 다시 0부터)
    pub fn with_first_sequence(mut self, first: SequenceNumber) -> Self {
        self.sequencer = Sequencer::starting_at(first);
        self
    }

    /// 모든 상태 초기화 (연결 종료 시)
    pub fn reset(&mut self) {
        *self = Self::new(self.loss_timeout, self.bandwidth_window);
    }

    /// 송신 기록, 헤더에 실을 시퀀스 반환
    pub fn on_send(&mut self, size: usize) -> SequenceNumber {
        let sequence = self.sequencer.next();

        self.pending.push_back(PendingAck {
            sequence,
            send_time: self.clock,
            size,
        });
        self.sent_window.push_back(WindowSample {
            at: self.clock,
            size,
        });
        self.sent_packets += 1;

        sequence
    }

    /// 수신 헤더 처리, 이번에 확인된 시퀀스 반환
    pub fn on_receive(&mut self, header: &PacketHeader) -> Vec<SequenceNumber> {
        self.received_packets += 1;
        self.record_received(header.sequence);
        self.process_ack(&header.ack)
    }

    fn record_received(&mut self, sequence: SequenceNumber) {
        let latest = match self.remote_sequence {
            Some(remote) if !more_recent(sequence, remote) => remote,
            _ => sequence,
        };
        self.remote_sequence = Some(latest);

        if !self.received_history.contains(&sequence) {
            self.received_history.push_back(sequence);
        }
        self.received_history
            .retain(|&s| distance(latest, s) <= RECEIVED_HISTORY);
    }

    fn process_ack(&mut self, field: &AckBitfield) -> Vec<SequenceNumber> {
        // 아직 보내지 않은 시퀀스를 가리키는 ack는 무시
        let last_sent = self.sequencer.peek().wrapping_sub(1);
        if self.sent_packets == 0 || more_recent(field.ack, last_sent) {
            if self.sent_packets > 0 {
                trace!("송신하지 않은 시퀀스 ack {} 무시 (마지막 {})", field.ack, last_sent);
            }
            return Vec::new();
        }

        let mut newly_acked = Vec::new();
        let mut lost = 0u64;
        let clock = self.clock;
        let mut rtt = self.rtt;
        let mut acked_samples = Vec::new();

        self.pending.retain(|entry| {
            if field.acknowledges(entry.sequence) {
                let sample = (clock - entry.send_time).as_secs_f64();
                rtt = (rtt + (sample - rtt) * RTT_SMOOTHING).max(0.0);
                newly_acked.push(entry.sequence);
                acked_samples.push(WindowSample {
                    at: clock,
                    size: entry.size,
                });
                false
            } else if field.is_behind_window(entry.sequence) {
                lost += 1;
                false
            } else {
                true
            }
        });

        self.rtt = rtt;
        self.acked_packets += newly_acked.len() as u64;
        self.lost_packets += lost;
        self.acked_window.extend(acked_samples);
        self.acks.extend_from_slice(&newly_acked);

        if lost > 0 {
            trace!("ack {} 윈도우 밖 pending {}개 손실 처리", field.ack, lost);
        }

        newly_acked
    }

    /// 틱 처리: 시계 전진, 손실 판정, 대역폭 갱신
    pub fn update(&mut self, dt: Duration) {
        self.acks.clear();
        self.clock += dt;

        while let Some(front) = self.pending.front() {
            if self.clock - front.send_time > self.loss_timeout {
                self.pending.pop_front();
                self.lost_packets += 1;
            } else {
                break;
            }
        }

        let clock = self.clock;
        let window = self.bandwidth_window;
        let expired = |sample: &WindowSample| clock - sample.at > window;
        while self.sent_window.front().map_or(false, expired) {
            self.sent_window.pop_front();
        }
        while self.acked_window.front().map_or(false, expired) {
            self.acked_window.pop_front();
        }

        let window_secs = window.as_secs_f64().max(f64::EPSILON);
        let to_kbps = |samples: &VecDeque<WindowSample>| {
            let bytes: usize = samples.iter().map(|s| s.size).sum();
            bytes as f64 * 8.0 / 1000.0 / window_secs
        };
        self.sent_bandwidth = to_kbps(&self.sent_window);
        self.acked_bandwidth = to_kbps(&self.acked_window);
    }

    /// 다음 송신 헤더에 실을 ack/비트필드
    pub fn ack_field(&self) -> AckBitfield {
        match self.remote_sequence {
            Some(remote) => AckBitfield::encode(remote, self.received_history.iter().copied()),
            None => AckBitfield::new(NO_ACK, 0),
        }
    }

    /// 다음에 발급될 송신 시퀀스
    pub fn local_sequence(&self) -> SequenceNumber {
        self.sequencer.peek()
    }

    pub fn remote_sequence(&self) -> Option<SequenceNumber> {
        self.remote_sequence
    }

    /// 평활 RTT
    pub fn rtt(&self) -> Duration {
        Duration::from_secs_f64(self.rtt)
    }

    pub fn rtt_ms(&self) -> f64 {
        self.rtt * 1000.0
    }

    pub fn sent(&self) -> u64 {
        self.sent_packets
    }

    pub fn received(&self) -> u64 {
        self.received_packets
    }

    pub fn acked(&self) -> u64 {
        self.acked_packets
    }

    pub fn lost(&self) -> u64 {
        self.lost_packets
    }

    /// 송신 대역폭 (kbps)
    pub fn sent_bandwidth(&self) -> f64 {
        self.sent_bandwidth
    }

    /// 확인 대역폭 (kbps)
    pub fn acked_bandwidth(&self) -> f64 {
        self.acked_bandwidth
    }

    /// 이번 틱에 확인된 시퀀스
    pub fn acks(&self) -> &[SequenceNumber] {
        &self.acks
    }

    /// 확인 대기 중인 패킷 수
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// 통계 스냅샷
    pub fn stats(&self) -> ConnectionStats {
        ConnectionStats {
            rtt: self.rtt(),
            sent: self.sent_packets,
            received: self.received_packets,
            acked: self.acked_packets,
            lost: self.lost_packets,
            pending: self.pending.len(),
            sent_bandwidth_kbps: self.sent_bandwidth,
            acked_bandwidth_kbps: self.acked_bandwidth,
        }
    }
}
