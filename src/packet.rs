//! 신뢰성 계층 패킷 헤더
//!
//! 모든 데이터그램 앞에 붙는 16바이트 고정 헤더. 정수는 모두 big-endian.
//!
//! ```text
//! 0          4          8          12         16
//! +----------+----------+----------+----------+------------------+
//! | protocol | sequence |   ack    | ack_bits | payload (0/256B) |
//! +----------+----------+----------+----------+------------------+
//! ```
//!
//! 페이로드가 없는 데이터그램은 keepalive로 취급된다.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::ack::AckBitfield;
use crate::error::ProtocolError;
use crate::sequence::SequenceNumber;

/// 헤더 크기 (바이트)
pub const HEADER_SIZE: usize = 16;

/// 패킷 헤더
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    /// 프로토콜 ID
    pub protocol_id: u32,

    /// 송신측 시퀀스
    pub sequence: SequenceNumber,

    /// 송신측이 마지막으로 받은 시퀀스와 그 이전 32개
    pub ack: AckBitfield,
}

impl PacketHeader {
    pub fn new(protocol_id: u32, sequence: SequenceNumber, ack: AckBitfield) -> Self {
        Self {
            protocol_id,
            sequence,
            ack,
        }
    }

    /// 헤더 직렬화
    pub fn write(&self, buf: &mut BytesMut) {
        buf.put_u32(self.protocol_id);
        buf.put_u32(self.sequence);
        buf.put_u32(self.ack.ack);
        buf.put_u32(self.ack.bits);
    }

    /// 헤더 + 페이로드로 데이터그램 생성
    pub fn to_datagram(&self, payload: &[u8]) -> Bytes {
        let mut buf = BytesMut::with_capacity(HEADER_SIZE + payload.len());
        self.write(&mut buf);
        buf.put_slice(payload);
        buf.freeze()
    }

    /// 데이터그램에서 헤더 파싱, 나머지 페이로드 반환
    pub fn parse(
        datagram: &[u8],
        expected_protocol_id: u32,
    ) -> Result<(Self, &[u8]), ProtocolError> {
        if datagram.len() < HEADER_SIZE {
            return Err(ProtocolError::Undersized {
                expected: HEADER_SIZE,
                got: datagram.len(),
            });
        }

        let mut cursor = &datagram[..HEADER_SIZE];
        let protocol_id = cursor.get_u32();
        if protocol_id != expected_protocol_id {
            return Err(ProtocolError::ProtocolIdMismatch {
                expected: expected_protocol_id,
                got: protocol_id,
            });
        }

        let sequence = cursor.get_u32();
        let ack = cursor.get_u32();
        let bits = cursor.get_u32();

        Ok((
            Self::new(protocol_id, sequence, AckBitfield::new(ack, bits)),
            &datagram[HEADER_SIZE..],
        ))
    }
}
