//! 송신/수신 세션
//!
//! 고정 틱마다 `tick(dt)`를 호출하는 단일 스레드 루프.
//! 매 틱 순서:
//! 1. 연결 중이면 흐름 제어 갱신 (평활 RTT)
//! 2. 전송 누산기: 허용 간격마다 패킷 1개 전송
//! 3. 수신 버퍼 비우기 (연결 성립 감지 포함)
//! 4. 연결 갱신 (타임아웃, 손실 판정)
//! 5. 주기적 통계 로그

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::codec::{decode, encode_meta, encode_slice, FileMetadata, FilePacket};
use crate::connection::Connection;
use crate::flow::FlowController;
use crate::socket::DatagramSocket;
use crate::stats::{ConnectionStats, TransferStats};
use crate::transfer::{IncomingFile, OutgoingFile, ReceiveOutcome};
use crate::{Config, Error, Result};

/// 세션이 호출자에게 알리는 사건
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// 상대와 연결됨
    Connected { peer: SocketAddr },

    /// 연결 끊김 (수신측은 다시 대기)
    Disconnected { peer: SocketAddr },

    /// 메타데이터 송신/수신
    TransferStarted {
        filename: String,
        file_size: u64,
        total_slices: u64,
    },

    /// 검증 후 저장 완료
    TransferComplete { stats: TransferStats, path: PathBuf },

    /// 검증 실패, 저장 실패, 전송 중 연결 끊김
    TransferFailed { filename: String, reason: String },

    /// 모든 슬라이스 송신 후 ACK 대기 종료
    ///
    /// `drained`는 타임아웃 전에 모든 pending이 확인/손실 판정되었는지 여부
    SendComplete {
        stats: ConnectionStats,
        drained: bool,
    },
}

/// 두 역할이 공유하는 연결 + 흐름 제어 + 누산기
struct Link<S> {
    connection: Connection<S>,
    flow: FlowController,
    send_accumulator: f64,
    stats_accumulator: Duration,
    stats_interval: Duration,
    connected: bool,
}

impl<S: DatagramSocket> Link<S> {
    fn new(socket: S, config: &Config) -> Self {
        Self {
            connection: Connection::new(socket, config),
            flow: FlowController::new(),
            send_accumulator: 0.0,
            stats_accumulator: Duration::ZERO,
            stats_interval: config.stats_interval,
            connected: false,
        }
    }

    fn update_flow(&mut self, dt: Duration) {
        if self.connection.is_connected() {
            let rtt_ms = self.connection.reliability().rtt_ms();
            self.flow.update(dt, rtt_ms);
        }
    }

    /// 새로 연결되었으면 Connected 이벤트 기록
    fn detect_connect(&mut self, events: &mut Vec<SessionEvent>) {
        if self.connected || !self.connection.is_connected() {
            return;
        }
        self.connected = true;
        if let Some(peer) = self.connection.peer() {
            info!("연결됨: {}", peer);
            events.push(SessionEvent::Connected { peer });
        }
    }

    /// 연결 종료 후 호출
    fn on_disconnect(&mut self) {
        info!("흐름 제어 초기화");
        self.flow.reset();
        self.connected = false;
        self.send_accumulator = 0.0;
    }

    /// 이번 틱에 보낼 패킷 수
    fn due_packets(&mut self, dt: Duration) -> usize {
        self.send_accumulator += dt.as_secs_f64();
        let interval = self.flow.send_interval();

        let mut due = 0;
        while self.send_accumulator > interval {
            self.send_accumulator -= interval;
            due += 1;
        }
        due
    }

    fn log_stats(&mut self, dt: Duration) {
        if !self.connection.is_connected() {
            self.stats_accumulator = Duration::ZERO;
            return;
        }

        self.stats_accumulator += dt;
        while self.stats_accumulator >= self.stats_interval {
            debug!("{}", self.connection.stats().summary());
            self.stats_accumulator -= self.stats_interval;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SendPhase {
    Meta,
    Slices { next: u64 },
    Draining { waited: Duration },
    Done,
}

/// 파일 송신 세션 (클라이언트)
pub struct SendSession<S> {
    link: Link<S>,
    file: OutgoingFile,
    phase: SendPhase,
    drain_timeout: Duration,
}

impl<S: DatagramSocket> SendSession<S> {
    /// `server`로 접속을 시작
    pub fn new(socket: S, config: &Config, file: OutgoingFile, server: SocketAddr) -> Self {
        let mut link = Link::new(socket, config);
        link.connection.connect(server);

        Self {
            link,
            file,
            phase: SendPhase::Meta,
            drain_timeout: config.drain_timeout,
        }
    }

    /// 틱 1회 처리
    ///
    /// 핸드쉐이크 실패와 연결 끊김은 에러로 반환된다.
    pub fn tick(&mut self, dt: Duration) -> Result<Vec<SessionEvent>> {
        let mut events = Vec::new();

        self.link.update_flow(dt);

        for _ in 0..self.link.due_packets(dt) {
            self.send_next(&mut events)?;
        }

        // 송신측은 ACK만 필요, 페이로드는 버림
        while self.link.connection.receive()?.is_some() {
            self.link.detect_connect(&mut events);
        }

        if let Err(e) = self.link.connection.update(dt) {
            self.link.on_disconnect();
            return Err(e);
        }

        if let SendPhase::Draining { waited } = self.phase {
            let waited = waited + dt;
            let pending = self.link.connection.reliability().pending_count();
            if pending == 0 || waited >= self.drain_timeout {
                let stats = self.link.connection.stats();
                info!("송신 완료: {}", stats.summary());
                events.push(SessionEvent::SendComplete {
                    stats,
                    drained: pending == 0,
                });
                self.phase = SendPhase::Done;
            } else {
                self.phase = SendPhase::Draining { waited };
            }
        }

        self.link.log_stats(dt);
        Ok(events)
    }

    fn send_next(&mut self, events: &mut Vec<SessionEvent>) -> Result<()> {
        if !self.link.connection.is_connected() {
            return self.link.connection.send_keepalive();
        }

        match self.phase {
            SendPhase::Meta => {
                let meta = self.file.metadata().clone();
                info!(
                    "송신 시작: {} ({} bytes, {} slices)",
                    meta.filename, meta.file_size, meta.total_slices
                );
                self.link.connection.send(&encode_meta(&meta))?;
                self.phase = next_phase(0, meta.total_slices);
                events.push(started(meta));
            }
            SendPhase::Slices { next } => {
                let payload = self.file.slice(next)?;
                debug!("슬라이스 송신 {}/{}", next + 1, self.file.total_slices());
                self.link.connection.send(&encode_slice(next, &payload))?;
                self.phase = next_phase(next + 1, self.file.total_slices());
            }
            // 대기 중에는 새 pending을 만들지 않음, ACK는 수신측 keepalive로 도착
            SendPhase::Draining { .. } => {}
            SendPhase::Done => {
                self.link.connection.send_keepalive()?;
            }
        }
        Ok(())
    }

    /// SendComplete 이후 true
    pub fn is_finished(&self) -> bool {
        self.phase == SendPhase::Done
    }

    pub fn connection(&self) -> &Connection<S> {
        &self.link.connection
    }

    pub fn flow(&self) -> &FlowController {
        &self.link.flow
    }
}

fn next_phase(next: u64, total: u64) -> SendPhase {
    if next < total {
        SendPhase::Slices { next }
    } else {
        SendPhase::Draining {
            waited: Duration::ZERO,
        }
    }
}

fn started(meta: FileMetadata) -> SessionEvent {
    SessionEvent::TransferStarted {
        filename: meta.filename,
        file_size: meta.file_size,
        total_slices: meta.total_slices,
    }
}

/// 파일 수신 세션 (서버)
pub struct ReceiveSession<S> {
    link: Link<S>,
    incoming: IncomingFile,
    output_dir: PathBuf,

    /// 직전에 끝난 전송의 메타데이터 (늦게 도착한 중복 패킷 걸러냄)
    completed: Option<FileMetadata>,

    /// 논리 시계
    clock: Duration,
    started_at: Option<Duration>,
}

impl<S: DatagramSocket> ReceiveSession<S> {
    /// 대기 상태로 시작
    pub fn new(socket: S, config: &Config) -> Self {
        let mut link = Link::new(socket, config);
        link.connection.listen();

        Self {
            link,
            incoming: IncomingFile::new(config.max_early_slices),
            output_dir: config.output_dir.clone(),
            completed: None,
            clock: Duration::ZERO,
            started_at: None,
        }
    }

    /// 틱 1회 처리
    ///
    /// 연결 끊김은 이벤트로 알리고 다시 대기한다. keepalive 송신 실패는 로그만 남기고,
    /// 수신 소켓 에러만 반환된다.
    pub fn tick(&mut self, dt: Duration) -> Result<Vec<SessionEvent>> {
        let mut events = Vec::new();
        self.clock += dt;

        self.link.update_flow(dt);

        // ACK 전달용 keepalive (상대가 없으면 생략됨), 송신 실패는 다음 틱에 재시도
        for _ in 0..self.link.due_packets(dt) {
            if let Err(e) = self.link.connection.send_keepalive() {
                warn!("keepalive 송신 실패: {}", e);
                break;
            }
        }

        while let Some(payload) = self.link.connection.receive()? {
            self.link.detect_connect(&mut events);
            if payload.is_empty() {
                continue;
            }
            match decode(&payload) {
                Ok(packet) => self.on_packet(packet, &mut events),
                Err(e) => debug!("파일 패킷 폐기: {}", e),
            }
        }

        match self.link.connection.update(dt) {
            Ok(()) => {}
            Err(Error::ConnectionLost { peer }) => {
                warn!("연결 끊김: {}, 다시 대기", peer);
                self.link.on_disconnect();
                events.push(SessionEvent::Disconnected { peer });
                if let Some(meta) = self.incoming.metadata() {
                    events.push(SessionEvent::TransferFailed {
                        filename: meta.filename.clone(),
                        reason: format!(
                            "connection lost ({}/{} slices)",
                            self.incoming.received_count(),
                            meta.total_slices
                        ),
                    });
                }
                self.incoming.reset();
                self.completed = None;
                self.started_at = None;
                self.link.connection.listen();
            }
            Err(e) => return Err(e),
        }

        self.link.log_stats(dt);
        Ok(events)
    }

    fn on_packet(&mut self, packet: FilePacket, events: &mut Vec<SessionEvent>) {
        if self.is_stale(&packet) {
            debug!("끝난 전송의 중복 패킷 폐기");
            return;
        }

        let outcome = self.incoming.accept(packet);

        if self.started_at.is_none() {
            if let Some(meta) = self.incoming.metadata() {
                info!(
                    "수신 시작: {} ({} bytes, {} slices)",
                    meta.filename, meta.file_size, meta.total_slices
                );
                self.started_at = Some(self.clock);
                events.push(started(meta.clone()));
            }
        }

        if outcome == ReceiveOutcome::ReadyForVerification {
            events.push(self.finish_transfer());
        }
    }

    /// 직전 전송의 중복인지 판단
    ///
    /// 같은 연결에서 전송이 끝난 뒤에는 새 META 전에 도착한 슬라이스도 버린다.
    fn is_stale(&mut self, packet: &FilePacket) -> bool {
        if self.completed.is_none() {
            return false;
        }
        match packet {
            FilePacket::Meta(meta) => {
                if self.completed.as_ref() == Some(meta) {
                    return true;
                }
                self.completed = None;
                false
            }
            FilePacket::Slice { .. } => self.incoming.metadata().is_none(),
        }
    }

    /// 검증 후 저장, 다음 전송을 위해 초기화
    fn finish_transfer(&mut self) -> SessionEvent {
        let meta = match self.incoming.metadata() {
            Some(meta) => meta.clone(),
            None => {
                return SessionEvent::TransferFailed {
                    filename: String::new(),
                    reason: "metadata missing".to_string(),
                }
            }
        };
        let elapsed = self.clock - self.started_at.unwrap_or(self.clock);

        let event = match self.verify_and_save(&meta) {
            Ok(path) => {
                let stats = TransferStats {
                    filename: meta.filename.clone(),
                    file_size: meta.file_size,
                    total_slices: meta.total_slices,
                    elapsed,
                };
                info!("전송 완료: {}", stats.summary());
                SessionEvent::TransferComplete { stats, path }
            }
            Err(e) => {
                warn!("전송 실패 ({}): {}", meta.filename, e);
                SessionEvent::TransferFailed {
                    filename: meta.filename.clone(),
                    reason: e.to_string(),
                }
            }
        };

        self.incoming.reset();
        self.completed = Some(meta);
        self.started_at = None;
        event
    }

    fn verify_and_save(&self, meta: &FileMetadata) -> Result<PathBuf> {
        self.incoming.verify_or_err()?;
        let path = output_path(&self.output_dir, &meta.filename)?;
        self.incoming.save(&path)?;
        Ok(path)
    }

    pub fn connection(&self) -> &Connection<S> {
        &self.link.connection
    }

    pub fn flow(&self) -> &FlowController {
        &self.link.flow
    }

    /// 수신 중인 파일
    pub fn incoming(&self) -> &IncomingFile {
        &self.incoming
    }
}

/// 경로 성분을 제거한 파일 이름으로 저장 경로 생성
pub fn output_path(dir: &Path, filename: &str) -> Result<PathBuf> {
    let name = Path::new(filename)
        .file_name()
        .ok_or_else(|| Error::InvalidFilename(filename.to_string()))?;
    Ok(dir.join(name))
}
