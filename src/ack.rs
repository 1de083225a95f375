//! ACK 비트필드
//!
//! 가장 최근 수신 시퀀스(`ack`)와 그 직전 32개의 수신 여부를 32비트로 압축한다.
//! 비트 `i`가 켜져 있으면 `ack - i - 1`을 받았다는 뜻이며, `ack` 자체는
//! 필드 값으로 암묵적으로 확인된다.

use crate::sequence::{distance, SequenceNumber};

/// 비트필드가 커버하는 직전 시퀀스 수
pub const ACK_WINDOW: u32 = 32;

/// ack + 32비트 수신 윈도우
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AckBitfield {
    /// 가장 최근에 받은 시퀀스
    pub ack: SequenceNumber,

    /// `ack - i - 1` 수신 여부
    pub bits: u32,
}

impl AckBitfield {
    pub fn new(ack: SequenceNumber, bits: u32) -> Self {
        Self { ack, bits }
    }

    /// 최근 수신 기록에서 비트필드 생성
    ///
    /// 윈도우 밖이거나 `latest`보다 최신인 기록은 무시한다.
    pub fn encode<I>(latest: SequenceNumber, history: I) -> Self
    where
        I: IntoIterator<Item = SequenceNumber>,
    {
        let mut bits = 0u32;
        for sequence in history {
            if let Some(index) = bit_index(sequence, latest) {
                bits |= 1 << index;
            }
        }
        Self { ack: latest, bits }
    }

    /// 확인된 시퀀스 목록 (`ack` 먼저, 이후 최신순)
    pub fn decode(&self) -> Vec<SequenceNumber> {
        let mut acked = Vec::with_capacity(1 + self.bits.count_ones() as usize);
        acked.push(self.ack);
        for index in 0..ACK_WINDOW {
            if self.bits & (1 << index) != 0 {
                acked.push(self.ack.wrapping_sub(index + 1));
            }
        }
        acked
    }

    /// 특정 시퀀스가 이 비트필드로 확인되는지
    pub fn acknowledges(&self, sequence: SequenceNumber) -> bool {
        if sequence == self.ack {
            return true;
        }
        match bit_index(sequence, self.ack) {
            Some(index) => self.bits & (1 << index) != 0,
            None => false,
        }
    }

    /// `sequence`가 윈도우보다 오래되어 더 이상 확인될 수 없는지
    pub fn is_behind_window(&self, sequence: SequenceNumber) -> bool {
        let back = distance(self.ack, sequence);
        back > ACK_WINDOW && !crate::sequence::more_recent(sequence, self.ack)
    }
}

/// `ack` 기준 비트 위치 (`ack - sequence - 1`), 윈도우 밖이면 None
#[inline]
pub fn bit_index(sequence: SequenceNumber, ack: SequenceNumber) -> Option<u32> {
    let back = distance(ack, sequence);
    if (1..=ACK_WINDOW).contains(&back) {
        Some(back - 1)
    } else {
        None
    }
}
