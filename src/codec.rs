//! 파일 패킷 코덱
//!
//! 연결 페이로드는 항상 [`PACKET_SIZE`](crate::PACKET_SIZE) 바이트 고정 블록이다.
//! 정수는 little-endian.
//!
//! ```text
//! META: [0] tag=1 | [1..201] filename (0 패딩) | [201..209] file_size
//!       | [209..217] total_slices | [217..233] md5 | [233..256] 0
//! DATA: [0] tag=2 | [1..9] id | [9..256] payload (0 패딩)
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::ProtocolError;
use crate::PACKET_SIZE;

/// 메타데이터 패킷 태그
pub const TAG_META: u8 = 1;

/// 데이터 패킷 태그
pub const TAG_DATA: u8 = 2;

/// 파일 이름 필드 크기
pub const FILENAME_CAPACITY: usize = 200;

/// 슬라이스 1개에 담기는 최대 바이트 (태그 1 + id 8 제외)
pub const SLICE_CAPACITY: usize = PACKET_SIZE - 1 - 8;

const DIGEST_SIZE: usize = 16;
const META_BODY: usize = 1 + FILENAME_CAPACITY + 8 + 8 + DIGEST_SIZE;

/// MD5 다이제스트
pub type Digest = [u8; DIGEST_SIZE];

/// 다이제스트 16진 문자열
pub fn digest_hex(digest: &Digest) -> String {
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

/// 파일 메타데이터
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMetadata {
    /// 파일 이름 (인코딩 시 200바이트로 잘림)
    pub filename: String,

    /// 파일 크기 (바이트)
    pub file_size: u64,

    /// 총 슬라이스 수
    pub total_slices: u64,

    /// 파일 전체 MD5
    pub digest: Digest,
}

impl FileMetadata {
    /// 크기에서 슬라이스 수 계산
    pub fn new(filename: impl Into<String>, file_size: u64, digest: Digest) -> Self {
        Self {
            filename: filename.into(),
            file_size,
            total_slices: slice_count(file_size),
            digest,
        }
    }

    /// 슬라이스 `id`의 실제 데이터 길이 (범위 밖이면 0)
    pub fn slice_len(&self, id: u64) -> usize {
        if id >= self.total_slices {
            return 0;
        }
        if id + 1 < self.total_slices {
            return SLICE_CAPACITY;
        }
        (self.file_size - id * SLICE_CAPACITY as u64) as usize
    }

    /// 마지막 슬라이스 길이
    pub fn last_slice_len(&self) -> usize {
        match self.total_slices {
            0 => 0,
            n => self.slice_len(n - 1),
        }
    }
}

/// `ceil(file_size / SLICE_CAPACITY)`
pub fn slice_count(file_size: u64) -> u64 {
    file_size.div_ceil(SLICE_CAPACITY as u64)
}

/// 디코딩된 파일 패킷
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilePacket {
    Meta(FileMetadata),
    Slice { id: u64, payload: Bytes },
}

/// 메타데이터 패킷 인코딩
pub fn encode_meta(meta: &FileMetadata) -> Bytes {
    let mut buf = BytesMut::with_capacity(PACKET_SIZE);
    buf.put_u8(TAG_META);

    let name = truncate_filename(&meta.filename);
    buf.put_slice(name);
    buf.put_bytes(0, FILENAME_CAPACITY - name.len());

    buf.put_u64_le(meta.file_size);
    buf.put_u64_le(meta.total_slices);
    buf.put_slice(&meta.digest);
    buf.put_bytes(0, PACKET_SIZE - META_BODY);

    buf.freeze()
}

/// 데이터 패킷 인코딩 (payload는 최대 SLICE_CAPACITY 바이트, 초과분은 잘림)
pub fn encode_slice(id: u64, payload: &[u8]) -> Bytes {
    let data = &payload[..payload.len().min(SLICE_CAPACITY)];

    let mut buf = BytesMut::with_capacity(PACKET_SIZE);
    buf.put_u8(TAG_DATA);
    buf.put_u64_le(id);
    buf.put_slice(data);
    buf.put_bytes(0, SLICE_CAPACITY - data.len());

    buf.freeze()
}

/// 고정 블록 디코딩
///
/// 슬라이스 payload는 패딩을 포함한 SLICE_CAPACITY 바이트 그대로 반환된다.
/// 실제 길이는 메타데이터로 결정한다.
pub fn decode(packet: &[u8]) -> Result<FilePacket, ProtocolError> {
    if packet.len() != PACKET_SIZE {
        return Err(ProtocolError::SizeMismatch {
            expected: PACKET_SIZE,
            got: packet.len(),
        });
    }

    let mut cursor = packet;
    match cursor.get_u8() {
        TAG_META => {
            let name_field = &cursor[..FILENAME_CAPACITY];
            let name_len = name_field
                .iter()
                .position(|&b| b == 0)
                .unwrap_or(FILENAME_CAPACITY);
            let filename = String::from_utf8_lossy(&name_field[..name_len]).into_owned();
            cursor.advance(FILENAME_CAPACITY);

            let file_size = cursor.get_u64_le();
            let total_slices = cursor.get_u64_le();
            let mut digest = [0u8; DIGEST_SIZE];
            cursor.copy_to_slice(&mut digest);

            Ok(FilePacket::Meta(FileMetadata {
                filename,
                file_size,
                total_slices,
                digest,
            }))
        }
        TAG_DATA => {
            let id = cursor.get_u64_le();
            Ok(FilePacket::Slice {
                id,
                payload: Bytes::copy_from_slice(cursor),
            })
        }
        tag => Err(ProtocolError::UnknownTag(tag)),
    }
}

/// UTF-8 경계를 지키며 파일 이름을 FILENAME_CAPACITY 바이트 이하로 자름
fn truncate_filename(name: &str) -> &[u8] {
    if name.len() <= FILENAME_CAPACITY {
        return name.as_bytes();
    }
    let mut end = FILENAME_CAPACITY;
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    &name.as_bytes()[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_meta() -> FileMetadata {
        FileMetadata::new("photo.jpg", 1000, [0xAB; 16])
    }

    #[test]
    fn test_constants() {
        assert_eq!(SLICE_CAPACITY, 247);
        assert_eq!(META_BODY, 233);
    }

    #[test]
    fn test_packets_are_fixed_size() {
        assert_eq!(encode_meta(&sample_meta()).len(), PACKET_SIZE);
        assert_eq!(encode_slice(0, &[]).len(), PACKET_SIZE);
        assert_eq!(encode_slice(7, &[1u8; SLICE_CAPACITY]).len(), PACKET_SIZE);
        assert_eq!(encode_slice(7, &[1u8; 1000]).len(), PACKET_SIZE);
    }

    #[test]
    fn test_meta_layout() {
        let meta = sample_meta();
        let packet = encode_meta(&meta);

        assert_eq!(packet[0], TAG_META);
        assert_eq!(&packet[1..10], b"photo.jpg");
        assert!(packet[10..201].iter().all(|&b| b == 0));
        assert_eq!(&packet[201..209], &1000u64.to_le_bytes());
        assert_eq!(&packet[209..217], &5u64.to_le_bytes());
        assert_eq!(&packet[217..233], &[0xAB; 16]);
        assert!(packet[233..].iter().all(|&b| b == 0));

        assert_eq!(decode(&packet).unwrap(), FilePacket::Meta(meta));
    }

    #[test]
    fn test_slice_layout() {
        let packet = encode_slice(0x0102, b"hello");
        assert_eq!(packet[0], TAG_DATA);
        assert_eq!(&packet[1..9], &0x0102u64.to_le_bytes());
        assert_eq!(&packet[9..14], b"hello");
        assert!(packet[14..].iter().all(|&b| b == 0));

        match decode(&packet).unwrap() {
            FilePacket::Slice { id, payload } => {
                assert_eq!(id, 0x0102);
                assert_eq!(payload.len(), SLICE_CAPACITY);
                assert_eq!(&payload[..5], b"hello");
            }
            other => panic!("unexpected packet: {:?}", other),
        }
    }

    #[test]
    fn test_filename_edges() {
        let empty = FileMetadata::new("", 0, [0; 16]);
        assert_eq!(decode(&encode_meta(&empty)).unwrap(), FilePacket::Meta(empty));

        let exact = "a".repeat(FILENAME_CAPACITY);
        let meta = FileMetadata::new(exact.clone(), 1, [0; 16]);
        match decode(&encode_meta(&meta)).unwrap() {
            FilePacket::Meta(decoded) => assert_eq!(decoded.filename, exact),
            other => panic!("unexpected packet: {:?}", other),
        }

        // 3바이트 문자 경계에서 잘림
        let long = "가".repeat(100);
        let meta = FileMetadata::new(long, 1, [0; 16]);
        match decode(&encode_meta(&meta)).unwrap() {
            FilePacket::Meta(decoded) => {
                assert_eq!(decoded.filename, "가".repeat(66));
            }
            other => panic!("unexpected packet: {:?}", other),
        }
    }

    #[test]
    fn test_malformed_packets() {
        assert_eq!(
            decode(&[TAG_DATA; 10]),
            Err(ProtocolError::SizeMismatch {
                expected: PACKET_SIZE,
                got: 10
            })
        );
        assert!(decode(&[0u8; PACKET_SIZE + 1]).is_err());

        let mut unknown = [0u8; PACKET_SIZE];
        unknown[0] = 9;
        assert_eq!(decode(&unknown), Err(ProtocolError::UnknownTag(9)));
    }

    #[test]
    fn test_slice_lengths() {
        let cap = SLICE_CAPACITY as u64;
        assert_eq!(slice_count(0), 0);
        assert_eq!(slice_count(1), 1);
        assert_eq!(slice_count(cap), 1);
        assert_eq!(slice_count(cap + 1), 2);

        let meta = FileMetadata::new("f", 2 * cap + 5, [0; 16]);
        assert_eq!(meta.total_slices, 3);
        assert_eq!(meta.slice_len(0), SLICE_CAPACITY);
        assert_eq!(meta.last_slice_len(), 5);
        assert_eq!(meta.slice_len(3), 0);

        let exact = FileMetadata::new("f", cap, [0; 16]);
        assert_eq!(exact.last_slice_len(), SLICE_CAPACITY);
        assert_eq!(FileMetadata::new("f", 0, [0; 16]).last_slice_len(), 0);
    }

    #[test]
    fn test_digest_hex() {
        let mut digest = [0u8; 16];
        digest[0] = 0xd4;
        digest[15] = 0x7e;
        let hex = digest_hex(&digest);
        assert_eq!(hex.len(), 32);
        assert!(hex.starts_with("d400"));
        assert!(hex.ends_with("007e"));
    }
}
