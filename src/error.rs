//! 에러 타입 정의

use std::net::SocketAddr;

use thiserror::Error;

use crate::codec::{Digest, digest_hex};

/// 패킷 해석 실패 (항상 조용히 폐기, 치명적이지 않음)
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("패킷 크기 부족: 최소 {expected} 바이트, got {got}")]
    Undersized { expected: usize, got: usize },

    #[error("패킷 크기 불일치: expected {expected}, got {got}")]
    SizeMismatch { expected: usize, got: usize },

    #[error("알 수 없는 패킷 타입: {0:#04X}")]
    UnknownTag(u8),

    #[error("유효하지 않은 프로토콜 ID: expected {expected:08X}, got {got:08X}")]
    ProtocolIdMismatch { expected: u32, got: u32 },
}

/// RFT 에러 타입
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO 에러: {0}")]
    Io(#[from] std::io::Error),

    #[error("프로토콜 에러: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("핸드쉐이크 타임아웃: peer={peer}")]
    HandshakeTimeout { peer: SocketAddr },

    #[error("연결 끊김: peer={peer}")]
    ConnectionLost { peer: SocketAddr },

    #[error("무결성 불일치: expected {}, got {}", digest_hex(.expected), digest_hex(.actual))]
    IntegrityMismatch { expected: Digest, actual: Digest },

    #[error("수신 미완료: {received}/{total} 슬라이스")]
    NotReady { received: u64, total: u64 },

    #[error("유효하지 않은 파일 이름: {0}")]
    InvalidFilename(String),

    #[error("유효하지 않은 주소: {0}")]
    InvalidAddress(String),
}

/// Result 타입 별칭
pub type Result<T> = std::result::Result<T, Error>;
