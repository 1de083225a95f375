//! 흐름 제어 (Good/Bad 2단계)
//!
//! RTT가 임계값(250ms)을 넘으면 즉시 Bad로 떨어지고, 페널티 시간 이상
//! 좋은 상태가 유지되어야 Good으로 복귀한다. Good이 짧게 끝나면 페널티가
//! 두 배가 되고, Good이 오래 유지되면 10초마다 절반으로 줄어든다.

use std::time::Duration;

use tracing::info;

/// RTT 임계값 (밀리초)
pub const RTT_THRESHOLD_MS: f64 = 250.0;

/// Good 모드 전송률 (packets/sec)
pub const GOOD_SEND_RATE: f64 = 30.0;

/// Bad 모드 전송률 (packets/sec)
pub const BAD_SEND_RATE: f64 = 10.0;

const INITIAL_PENALTY: f64 = 4.0;
const MIN_PENALTY: f64 = 1.0;
const MAX_PENALTY: f64 = 60.0;

/// 이보다 짧은 Good 구간에서 떨어지면 페널티 두 배 (초)
const FLAP_WINDOW: f64 = 10.0;

/// Good 유지 시 페널티 절반 주기 (초)
const PENALTY_REDUCTION_INTERVAL: f64 = 10.0;

/// 흐름 제어 모드
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowMode {
    Good,
    Bad,
}

#[derive(Debug, Clone)]
pub struct FlowController {
    mode: FlowMode,

    /// Good 복귀까지 필요한 유지 시간 (초)
    penalty_time: f64,

    /// 현재 Good 조건이 이어진 시간 (초)
    good_conditions_time: f64,

    /// Good 모드 유지 시간, 10초마다 페널티 절반 (초)
    penalty_reduction_accumulator: f64,
}

impl FlowController {
    /// Bad 모드, 페널티 4초로 시작
    pub fn new() -> Self {
        Self {
            mode: FlowMode::Bad,
            penalty_time: INITIAL_PENALTY,
            good_conditions_time: 0.0,
            penalty_reduction_accumulator: 0.0,
        }
    }

    /// 연결이 Connected를 벗어날 때마다 호출
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    // 호출 위치: 연결 중 매 틱
    pub fn update(&mut self, dt: Duration, rtt_ms: f64) {
        let dt = dt.as_secs_f64();

        match self.mode {
            FlowMode::Good => {
                if rtt_ms > RTT_THRESHOLD_MS {
                    self.mode = FlowMode::Bad;
                    info!("*** dropping to bad mode (rtt {:.1}ms) ***", rtt_ms);

                    if self.good_conditions_time < FLAP_WINDOW && self.penalty_time < MAX_PENALTY {
                        self.penalty_time = (self.penalty_time * 2.0).min(MAX_PENALTY);
                        info!("penalty time increased to {:.1}s", self.penalty_time);
                    }

                    self.good_conditions_time = 0.0;
                    self.penalty_reduction_accumulator = 0.0;
                    return;
                }

                self.good_conditions_time += dt;
                self.penalty_reduction_accumulator += dt;

                if self.penalty_reduction_accumulator > PENALTY_REDUCTION_INTERVAL
                    && self.penalty_time > MIN_PENALTY
                {
                    self.penalty_time = (self.penalty_time / 2.0).max(MIN_PENALTY);
                    info!("penalty time reduced to {:.1}s", self.penalty_time);
                    self.penalty_reduction_accumulator = 0.0;
                }
            }

            FlowMode::Bad => {
                if rtt_ms <= RTT_THRESHOLD_MS {
                    self.good_conditions_time += dt;
                } else {
                    self.good_conditions_time = 0.0;
                }

                if self.good_conditions_time > self.penalty_time {
                    info!("*** upgrading to good mode ***");
                    self.good_conditions_time = 0.0;
                    self.penalty_reduction_accumulator = 0.0;
                    self.mode = FlowMode::Good;
                }
            }
        }
    }

    /// 허용 전송률 (packets/sec)
    pub fn send_rate(&self) -> f64 {
        match self.mode {
            FlowMode::Good => GOOD_SEND_RATE,
            FlowMode::Bad => BAD_SEND_RATE,
        }
    }

    /// 패킷 간 간격 (초)
    pub fn send_interval(&self) -> f64 {
        1.0 / self.send_rate()
    }

    pub fn mode(&self) -> FlowMode {
        self.mode
    }

    pub fn penalty_time(&self) -> Duration {
        Duration::from_secs_f64(self.penalty_time)
    }

    pub fn good_conditions_time(&self) -> Duration {
        Duration::from_secs_f64(self.good_conditions_time)
    }
}

impl Default for FlowController {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TICK: f64 = 1.0 / 30.0;

    fn feed(flow: &mut FlowController, rtt_ms: f64, seconds: f64) {
        let ticks = (seconds / TICK).round() as usize;
        for _ in 0..ticks {
            flow.update(Duration::from_secs_f64(TICK), rtt_ms);
        }
    }

    fn upgrade(flow: &mut FlowController) {
        let limit = flow.penalty_time().as_secs_f64() + 1.0;
        feed(flow, 50.0, limit);
        assert_eq!(flow.mode(), FlowMode::Good);
    }

    #[test]
    fn test_starts_conservative() {
        let flow = FlowController::new();
        assert_eq!(flow.mode(), FlowMode::Bad);
        assert_eq!(flow.send_rate(), BAD_SEND_RATE);
        assert_eq!(flow.penalty_time(), Duration::from_secs(4));
    }

    #[test]
    fn test_high_rtt_drops_and_doubles_penalty() {
        let mut flow = FlowController::new();
        upgrade(&mut flow);
        assert_eq!(flow.send_rate(), GOOD_SEND_RATE);

        feed(&mut flow, 300.0, 5.0);
        assert_eq!(flow.mode(), FlowMode::Bad);
        assert_eq!(flow.penalty_time(), Duration::from_secs(8));
        assert_eq!(flow.send_rate(), BAD_SEND_RATE);
    }

    #[test]
    fn test_recovers_after_penalty() {
        let mut flow = FlowController::new();
        upgrade(&mut flow);
        feed(&mut flow, 300.0, 1.0);
        assert_eq!(flow.penalty_time(), Duration::from_secs(8));

        feed(&mut flow, 250.0, 7.5);
        assert_eq!(flow.mode(), FlowMode::Bad);

        feed(&mut flow, 250.0, 1.0);
        assert_eq!(flow.mode(), FlowMode::Good);
    }

    #[test]
    fn test_bad_rtt_resets_good_time_while_bad() {
        let mut flow = FlowController::new();
        feed(&mut flow, 100.0, 3.0);
        feed(&mut flow, 400.0, 0.1);
        assert_eq!(flow.good_conditions_time(), Duration::ZERO);
        feed(&mut flow, 100.0, 3.0);
        assert_eq!(flow.mode(), FlowMode::Bad);
    }

    #[test]
    fn test_penalty_capped_at_sixty() {
        let mut flow = FlowController::new();
        for _ in 0..6 {
            upgrade(&mut flow);
            flow.update(Duration::from_secs_f64(TICK), 500.0);
        }
        assert_eq!(flow.penalty_time(), Duration::from_secs(60));
    }

    #[test]
    fn test_long_good_period_halves_penalty() {
        let mut flow = FlowController::new();
        upgrade(&mut flow);
        flow.update(Duration::from_secs_f64(TICK), 500.0);
        upgrade(&mut flow);
        flow.update(Duration::from_secs_f64(TICK), 500.0);
        assert_eq!(flow.penalty_time(), Duration::from_secs(16));

        upgrade(&mut flow);
        feed(&mut flow, 50.0, 10.5);
        assert_eq!(flow.penalty_time(), Duration::from_secs(8));
        feed(&mut flow, 50.0, 10.5);
        assert_eq!(flow.penalty_time(), Duration::from_secs(4));

        // 오래 유지된 뒤 떨어지면 페널티가 늘지 않음
        flow.update(Duration::from_secs_f64(TICK), 500.0);
        assert_eq!(flow.penalty_time(), Duration::from_secs(4));
    }

    #[test]
    fn test_reset_returns_to_bad() {
        let mut flow = FlowController::new();
        upgrade(&mut flow);
        flow.reset();
        assert_eq!(flow.mode(), FlowMode::Bad);
        assert_eq!(flow.penalty_time(), Duration::from_secs(4));
    }
}
