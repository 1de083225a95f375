//! 시퀀스 번호 연산
//!
//! 32비트 시퀀스 번호는 2^32에서 감싸지므로(wraparound) 단순 비교 대신
//! 절반 윈도우(2^31) 기준으로 선후 관계를 판단한다.

/// 시퀀스 번호 (32비트, wraparound)
pub type SequenceNumber = u32;

/// 선후 판단 윈도우 (2^31)
pub const SEQUENCE_WINDOW: u32 = 1 << 31;

/// `a`가 `b`보다 최신인지 여부
///
/// `a == b`이면 항상 false.
#[inline]
pub fn more_recent(a: SequenceNumber, b: SequenceNumber) -> bool {
    (a > b && a - b <= SEQUENCE_WINDOW) || (b > a && b - a > SEQUENCE_WINDOW)
}

/// `newer`에서 `older`까지 거꾸로 센 거리 (mod 2^32)
#[inline]
pub fn distance(newer: SequenceNumber, older: SequenceNumber) -> u32 {
    newer.wrapping_sub(older)
}

/// 연결별 송신 시퀀스 발급기
#[derive(Debug, Clone)]
pub struct Sequencer {
    next: SequenceNumber,
}

impl Sequencer {
    /// 0부터 시작하는 발급기
    pub fn new() -> Self {
        Self::starting_at(0)
    }

    /// 임의 값부터 시작하는 발급기
    pub fn starting_at(first: SequenceNumber) -> Self {
        Self { next: first }
    }

    /// 다음 시퀀스 발급 (직전 값 + 1, mod 2^32)
    pub fn next(&mut self) -> SequenceNumber {
        let sequence = self.next;
        self.next = self.next.wrapping_add(1);
        sequence
    }

    /// 다음에 발급될 값 (발급하지 않음)
    pub fn peek(&self) -> SequenceNumber {
        self.next
    }
}

impl Default for Sequencer {
    fn default() -> Self {
        Self::new()
    }
}
