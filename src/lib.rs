//! # RFT (Reliable File Transfer)
//!
//! UDP 위의 신뢰성 계층 + 흐름 제어 + 파일 분할 전송
//!
//! ## 핵심 특징
//! - **신뢰성 계층**: 32비트 순환 시퀀스, ack + 32비트 비트필드, RTT/대역폭 측정
//! - **흐름 제어**: RTT 기반 Good(30 pkt/s) / Bad(10 pkt/s) 2단계, 페널티 시간 조절
//! - **파일 전송**: 256바이트 고정 패킷(META/DATA), MD5 전체 검증
//! - **고정 틱 루프**: 논리 시계 기반으로 결정적 동작 (테스트는 메모리 네트워크)
//!
//! 손실된 슬라이스는 재전송하지 않는다.

pub mod ack;
pub mod codec;
pub mod config;
pub mod connection;
pub mod error;
pub mod flow;
pub mod packet;
pub mod reliability;
pub mod sequence;
pub mod session;
pub mod socket;
pub mod stats;
pub mod transfer;

pub use ack::AckBitfield;
pub use codec::{FileMetadata, FilePacket};
pub use config::Config;
pub use connection::{Connection, ConnectionState};
pub use error::{Error, ProtocolError, Result};
pub use flow::{FlowController, FlowMode};
pub use packet::PacketHeader;
pub use reliability::ReliabilitySystem;
pub use sequence::{SequenceNumber, Sequencer};
pub use session::{ReceiveSession, SendSession, SessionEvent};
pub use socket::{DatagramSocket, LinkConditions, MemoryNetwork, MemorySocket};
pub use stats::{ConnectionStats, TransferStats};
pub use transfer::{IncomingFile, OutgoingFile, ReceiveOutcome};

/// 프로토콜 ID (다른 UDP 트래픽 구분용)
pub const PROTOCOL_ID: u32 = 0x1122_3344;

/// 기본 서버 포트
pub const DEFAULT_SERVER_PORT: u16 = 30000;

/// 기본 클라이언트 포트
pub const DEFAULT_CLIENT_PORT: u16 = 30001;

/// 파일 패킷 크기 (바이트, 신뢰성 헤더 제외)
pub const PACKET_SIZE: usize = 256;
