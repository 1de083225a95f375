//! 프로토콜 설정

use std::path::PathBuf;
use std::time::Duration;

use crate::{DEFAULT_CLIENT_PORT, DEFAULT_SERVER_PORT, PROTOCOL_ID};

/// RFT 설정
#[derive(Debug, Clone)]
pub struct Config {
    /// 프로토콜 ID (다른 트래픽 거부용)
    pub protocol_id: u32,

    /// 서버(수신측) 포트
    pub server_port: u16,

    /// 클라이언트(송신측) 포트
    pub client_port: u16,

    /// 고정 틱 간격
    pub tick_interval: Duration,

    /// 연결 타임아웃 (이 시간 동안 수신이 없으면 끊김/실패)
    pub connection_timeout: Duration,

    /// 미확인 패킷을 손실로 판정하는 시간
    pub loss_timeout: Duration,

    /// 대역폭 측정 윈도우
    pub bandwidth_window: Duration,

    /// 연결 통계 로그 주기
    pub stats_interval: Duration,

    /// 마지막 슬라이스 전송 후 ACK 대기 한도
    pub drain_timeout: Duration,

    /// 메타데이터보다 먼저 도착한 슬라이스 보관 한도
    pub max_early_slices: usize,

    /// 수신 파일 저장 디렉터리
    pub output_dir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            protocol_id: PROTOCOL_ID,
            server_port: DEFAULT_SERVER_PORT,
            client_port: DEFAULT_CLIENT_PORT,
            tick_interval: Duration::from_secs_f64(1.0 / 30.0),
            connection_timeout: Duration::from_secs(10),
            loss_timeout: Duration::from_secs(1),
            bandwidth_window: Duration::from_secs(1),
            stats_interval: Duration::from_millis(250),
            drain_timeout: Duration::from_secs(2),
            max_early_slices: 4096,
            output_dir: PathBuf::from("."),
        }
    }
}

impl Config {
    /// 틱 간격 (초)
    pub fn tick_secs(&self) -> f64 {
        self.tick_interval.as_secs_f64()
    }

    /// 같은 호스트 안에서 시험할 때의 설정
    pub fn loopback() -> Self {
        Self {
            connection_timeout: Duration::from_secs(2),
            drain_timeout: Duration::from_millis(500),
            ..Self::default()
        }
    }

    /// 불안정한 네트워크용 설정
    pub fn lossy_network() -> Self {
        Self {
            connection_timeout: Duration::from_secs(30),
            drain_timeout: Duration::from_secs(5),
            max_early_slices: 16384,
            ..Self::default()
        }
    }

    /// 저장 디렉터리 지정
    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = dir.into();
        self
    }
}
