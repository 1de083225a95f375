//! 연결 상태 머신
//!
//! 소켓 + 신뢰성 시스템을 묶은 점대점 연결.
//!
//! ```text
//! Disconnected --listen()--> Listening --(첫 데이터그램)--> Connected
//! Disconnected --connect()--> Connecting --(응답)--> Connected
//! Connecting --(타임아웃)--> ConnectFailed
//! Connected  --(타임아웃)--> Disconnected
//! ```
//!
//! 핸드쉐이크 전용 메시지는 없다. 헤더가 유효한 데이터그램이면 무엇이든
//! (keepalive 포함) 핸드쉐이크로 취급한다.

use std::net::SocketAddr;
use std::time::Duration;

use bytes::Bytes;
use tracing::{debug, info, trace, warn};

use crate::packet::PacketHeader;
use crate::reliability::ReliabilitySystem;
use crate::socket::DatagramSocket;
use crate::stats::ConnectionStats;
use crate::{Config, Error, Result};

/// 수신 버퍼 크기 (헤더 16 + 패킷 256보다 큼)
const RECV_BUFFER_SIZE: usize = 2048;

/// 연결 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Listening,
    Connecting,
    ConnectFailed,
    Connected,
}

/// 점대점 신뢰성 연결
pub struct Connection<S> {
    socket: S,
    protocol_id: u32,
    timeout: Duration,

    state: ConnectionState,
    peer: Option<SocketAddr>,
    timeout_accumulator: Duration,

    reliability: ReliabilitySystem,
    recv_buf: Vec<u8>,

    /// 폐기한 데이터그램 수 (잘못된 헤더, 다른 주소)
    dropped: u64,
}

impl<S: DatagramSocket> Connection<S> {
    /// 새 연결 생성 (Disconnected)
    pub fn new(socket: S, config: &Config) -> Self {
        Self {
            socket,
            protocol_id: config.protocol_id,
            timeout: config.connection_timeout,
            state: ConnectionState::Disconnected,
            peer: None,
            timeout_accumulator: Duration::ZERO,
            reliability: ReliabilitySystem::from_config(config),
            recv_buf: vec![0u8; RECV_BUFFER_SIZE],
            dropped: 0,
        }
    }

    /// 서버 모드로 대기
    pub fn listen(&mut self) {
        info!("서버 대기 시작");
        self.clear_data();
        self.state = ConnectionState::Listening;
    }

    /// 클라이언트 모드로 접속 시도
    pub fn connect(&mut self, peer: SocketAddr) {
        info!("클라이언트 접속 시도: {}", peer);
        self.clear_data();
        self.state = ConnectionState::Connecting;
        self.peer = Some(peer);
    }

    fn clear_data(&mut self) {
        self.state = ConnectionState::Disconnected;
        self.timeout_accumulator = Duration::ZERO;
        self.peer = None;
        self.reliability.reset();
    }

    /// 페이로드 전송 (헤더 부착, pending 기록)
    ///
    /// 상대 주소가 아직 없으면(Listening) 아무것도 하지 않는다.
    pub fn send(&mut self, payload: &[u8]) -> Result<()> {
        let Some(peer) = self.peer else {
            trace!("상대 주소 없음, 전송 생략");
            return Ok(());
        };

        let ack = self.reliability.ack_field();
        let sequence = self.reliability.on_send(payload.len());
        let header = PacketHeader::new(self.protocol_id, sequence, ack);

        self.socket.send_to(&header.to_datagram(payload), peer)?;
        Ok(())
    }

    /// 페이로드 없는 keepalive 전송
    pub fn send_keepalive(&mut self) -> Result<()> {
        self.send(&[])
    }

    /// 준비된 데이터그램에서 페이로드 1개 수신 (논블로킹)
    ///
    /// 헤더가 잘못되었거나 상대가 아닌 주소의 데이터그램은 건너뛴다.
    pub fn receive(&mut self) -> Result<Option<Bytes>> {
        loop {
            let Some((len, from)) = self.socket.try_recv_from(&mut self.recv_buf)? else {
                return Ok(None);
            };

            match self.accept_datagram(len, from) {
                Some(payload) => return Ok(Some(payload)),
                None => continue,
            }
        }
    }

    fn accept_datagram(&mut self, len: usize, from: SocketAddr) -> Option<Bytes> {
        let (header, payload) = match PacketHeader::parse(&self.recv_buf[..len], self.protocol_id) {
            Ok(parsed) => parsed,
            Err(e) => {
                debug!("데이터그램 폐기 ({}): {}", from, e);
                self.dropped += 1;
                return None;
            }
        };

        // 대기 중인 쪽은 서버뿐
        if self.state == ConnectionState::Listening {
            info!("클라이언트 연결: {}", from);
            self.state = ConnectionState::Connected;
            self.peer = Some(from);
        }

        if self.peer != Some(from) {
            self.dropped += 1;
            return None;
        }

        match self.state {
            ConnectionState::Connecting => {
                info!("서버 연결 완료: {}", from);
                self.state = ConnectionState::Connected;
            }
            ConnectionState::Connected => {}
            _ => {
                self.dropped += 1;
                return None;
            }
        }

        self.timeout_accumulator = Duration::ZERO;
        let acked = self.reliability.on_receive(&header);
        if !acked.is_empty() {
            trace!("acks: {:?}", acked);
        }

        Some(Bytes::copy_from_slice(payload))
    }

    /// 틱 처리: 타임아웃 검사, 신뢰성 시스템 갱신
    ///
    /// 이 틱에 Connecting → ConnectFailed 이면 [`Error::HandshakeTimeout`],
    /// Connected → Disconnected 이면 [`Error::ConnectionLost`]를 반환한다.
    pub fn update(&mut self, dt: Duration) -> Result<()> {
        self.timeout_accumulator += dt;

        if self.timeout_accumulator > self.timeout {
            match self.state {
                ConnectionState::Connecting => {
                    let peer = self.peer.unwrap_or_else(unspecified);
                    warn!("접속 타임아웃: {}", peer);
                    self.clear_data();
                    self.state = ConnectionState::ConnectFailed;
                    return Err(Error::HandshakeTimeout { peer });
                }
                ConnectionState::Connected => {
                    let peer = self.peer.unwrap_or_else(unspecified);
                    warn!("연결 타임아웃: {}", peer);
                    self.clear_data();
                    return Err(Error::ConnectionLost { peer });
                }
                _ => {}
            }
        }

        self.reliability.update(dt);
        Ok(())
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    pub fn is_connecting(&self) -> bool {
        self.state == ConnectionState::Connecting
    }

    pub fn is_listening(&self) -> bool {
        self.state == ConnectionState::Listening
    }

    pub fn connect_failed(&self) -> bool {
        self.state == ConnectionState::ConnectFailed
    }

    pub fn reliability(&self) -> &ReliabilitySystem {
        &self.reliability
    }

    /// 신뢰성 통계 스냅샷
    pub fn stats(&self) -> ConnectionStats {
        self.reliability.stats()
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }
}

fn unspecified() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 0))
}
