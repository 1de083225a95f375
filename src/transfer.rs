//! 파일 분할/조립
//!
//! - 송신: [`OutgoingFile`]이 파일을 열고 MD5를 계산한 뒤 슬라이스를 필요할 때 읽는다
//! - 수신: [`IncomingFile`]이 슬라이스를 id별로 모아 조립, 검증, 저장한다
//!
//! 손실된 슬라이스는 재전송하지 않는다. 하나라도 빠지면 전송은 완료되지 않는다.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::Path;

use bytes::Bytes;
use md5::{Digest as _, Md5};
use tracing::debug;

use crate::codec::{slice_count, Digest, FileMetadata, FilePacket, SLICE_CAPACITY};
use crate::{Error, Result};

const HASH_BUFFER_SIZE: usize = 64 * 1024;

fn finish_digest(hasher: Md5) -> Digest {
    let mut digest = [0u8; 16];
    digest.copy_from_slice(&hasher.finalize());
    digest
}

/// 송신할 파일
pub struct OutgoingFile {
    file: File,
    meta: FileMetadata,
}

impl OutgoingFile {
    /// 파일을 열고 크기/다이제스트 계산
    pub fn begin(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let filename = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| Error::InvalidFilename(path.display().to_string()))?
            .to_string();

        let mut file = File::open(path)?;
        let file_size = file.metadata()?.len();

        let mut hasher = Md5::new();
        let mut reader = BufReader::with_capacity(HASH_BUFFER_SIZE, &mut file);
        let mut buf = vec![0u8; HASH_BUFFER_SIZE];
        loop {
            let n = reader.read(&mut buf)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
        drop(reader);

        let meta = FileMetadata::new(filename, file_size, finish_digest(hasher));
        debug!(
            "송신 파일 준비: {} ({} bytes, {} slices)",
            meta.filename, meta.file_size, meta.total_slices
        );

        Ok(Self { file, meta })
    }

    pub fn metadata(&self) -> &FileMetadata {
        &self.meta
    }

    pub fn total_slices(&self) -> u64 {
        self.meta.total_slices
    }

    /// 슬라이스 `id`의 실제 데이터 (마지막 슬라이스는 짧을 수 있음)
    pub fn slice(&mut self, id: u64) -> Result<Bytes> {
        let len = self.meta.slice_len(id);
        if len == 0 {
            return Ok(Bytes::new());
        }

        let mut data = vec![0u8; len];
        self.file
            .seek(SeekFrom::Start(id * SLICE_CAPACITY as u64))?;
        self.file.read_exact(&mut data)?;
        Ok(Bytes::from(data))
    }
}

/// 수신 패킷 처리 결과
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiveOutcome {
    /// 메타데이터 수락
    MetaAccepted,
    /// 슬라이스 수락 (메타데이터 전이면 임시 보관)
    SliceAccepted,
    /// 모든 슬라이스 수신, 검증 가능
    ReadyForVerification,
    /// 범위 밖 슬라이스, 충돌하는 메타데이터 등
    Ignored,
}

/// 수신 중인 파일
#[derive(Debug)]
pub struct IncomingFile {
    meta: Option<FileMetadata>,
    slices: BTreeMap<u64, Bytes>,

    /// 메타데이터보다 먼저 도착한 슬라이스 (패딩 포함)
    early: BTreeMap<u64, Bytes>,
    max_early: usize,
}

impl IncomingFile {
    pub fn new(max_early_slices: usize) -> Self {
        Self {
            meta: None,
            slices: BTreeMap::new(),
            early: BTreeMap::new(),
            max_early: max_early_slices,
        }
    }

    /// 디코딩된 패킷 1개 처리
    pub fn accept(&mut self, packet: FilePacket) -> ReceiveOutcome {
        match packet {
            FilePacket::Meta(meta) => self.accept_meta(meta),
            FilePacket::Slice { id, payload } => self.accept_slice(id, payload),
        }
    }

    fn accept_meta(&mut self, meta: FileMetadata) -> ReceiveOutcome {
        if meta.total_slices != slice_count(meta.file_size) {
            debug!(
                "메타데이터 불일치: size {} / slices {}",
                meta.file_size, meta.total_slices
            );
            return ReceiveOutcome::Ignored;
        }

        if let Some(current) = &self.meta {
            if *current == meta {
                return ReceiveOutcome::MetaAccepted;
            }
            debug!("전송 중 다른 메타데이터 무시: {}", meta.filename);
            return ReceiveOutcome::Ignored;
        }

        self.meta = Some(meta);

        let early = std::mem::take(&mut self.early);
        for (id, payload) in early {
            self.store(id, payload);
        }

        if self.is_ready() {
            ReceiveOutcome::ReadyForVerification
        } else {
            ReceiveOutcome::MetaAccepted
        }
    }

    fn accept_slice(&mut self, id: u64, payload: Bytes) -> ReceiveOutcome {
        if self.meta.is_none() {
            if self.early.len() >= self.max_early && !self.early.contains_key(&id) {
                return ReceiveOutcome::Ignored;
            }
            self.early.insert(id, payload);
            return ReceiveOutcome::SliceAccepted;
        }

        if !self.store(id, payload) {
            return ReceiveOutcome::Ignored;
        }

        if self.is_ready() {
            ReceiveOutcome::ReadyForVerification
        } else {
            ReceiveOutcome::SliceAccepted
        }
    }

    /// 메타데이터 기준으로 잘라 저장, 범위 밖이면 false
    fn store(&mut self, id: u64, payload: Bytes) -> bool {
        let Some(meta) = &self.meta else {
            return false;
        };
        if id >= meta.total_slices {
            debug!("범위 밖 슬라이스 무시: {} (total {})", id, meta.total_slices);
            return false;
        }

        let len = meta.slice_len(id).min(payload.len());
        self.slices.insert(id, payload.slice(..len));
        true
    }

    /// 모든 슬라이스 수신 여부
    pub fn is_ready(&self) -> bool {
        match &self.meta {
            Some(meta) => self.slices.len() as u64 == meta.total_slices,
            None => false,
        }
    }

    /// 수신한 서로 다른 슬라이스 수
    pub fn received_count(&self) -> u64 {
        self.slices.len() as u64
    }

    /// 메타데이터 전에 보관 중인 슬라이스 수
    pub fn early_count(&self) -> usize {
        self.early.len()
    }

    pub fn metadata(&self) -> Option<&FileMetadata> {
        self.meta.as_ref()
    }

    fn digest(&self) -> Digest {
        let mut hasher = Md5::new();
        for payload in self.slices.values() {
            hasher.update(payload);
        }
        finish_digest(hasher)
    }

    /// 조립 결과의 MD5가 메타데이터와 같은지 확인
    pub fn verify(&self) -> bool {
        self.verify_or_err().is_ok()
    }

    /// [`verify`](Self::verify)와 같지만 실패 이유를 반환
    pub fn verify_or_err(&self) -> Result<()> {
        let meta = self.ready_meta()?;
        let actual = self.digest();
        if actual != meta.digest {
            return Err(Error::IntegrityMismatch {
                expected: meta.digest,
                actual,
            });
        }
        Ok(())
    }

    /// 조립된 파일을 `path`에 저장
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        self.ready_meta()?;

        let mut writer = BufWriter::new(File::create(path.as_ref())?);
        for payload in self.slices.values() {
            writer.write_all(payload)?;
        }
        writer.flush()?;
        Ok(())
    }

    fn ready_meta(&self) -> Result<&FileMetadata> {
        match &self.meta {
            Some(meta) if self.is_ready() => Ok(meta),
            Some(meta) => Err(Error::NotReady {
                received: self.received_count(),
                total: meta.total_slices,
            }),
            None => Err(Error::NotReady {
                received: 0,
                total: 0,
            }),
        }
    }

    /// 다음 전송을 위해 초기화
    pub fn reset(&mut self) {
        self.meta = None;
        self.slices.clear();
        self.early.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{decode, encode_meta, encode_slice};
    use tempfile::TempDir;

    fn write_file(dir: &TempDir, name: &str, data: &[u8]) -> std::path::PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, data).unwrap();
        path
    }

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 31 + 7) as u8).collect()
    }

    /// 송신측 슬라이스를 wire 인코딩 거쳐 수신측으로 전달
    fn wire_slice(outgoing: &mut OutgoingFile, id: u64) -> FilePacket {
        let data = outgoing.slice(id).unwrap();
        decode(&encode_slice(id, &data)).unwrap()
    }

    #[test]
    fn test_roundtrip_sizes_in_reverse_order() {
        let dir = TempDir::new().unwrap();

        for k in [0usize, 1, 5] {
            for r in [0usize, 1, SLICE_CAPACITY - 1] {
                let size = k * SLICE_CAPACITY + r;
                let data = pattern(size);
                let src = write_file(&dir, &format!("src_{}_{}.bin", k, r), &data);

                let mut outgoing = OutgoingFile::begin(&src).unwrap();
                let meta = outgoing.metadata().clone();
                assert_eq!(meta.file_size, size as u64);
                assert_eq!(meta.total_slices, slice_count(size as u64));

                let mut incoming = IncomingFile::new(16);
                let first = incoming.accept(decode(&encode_meta(&meta)).unwrap());
                if meta.total_slices == 0 {
                    assert_eq!(first, ReceiveOutcome::ReadyForVerification);
                } else {
                    assert_eq!(first, ReceiveOutcome::MetaAccepted);
                }

                for id in (0..meta.total_slices).rev() {
                    let outcome = incoming.accept(wire_slice(&mut outgoing, id));
                    if id == 0 {
                        assert_eq!(outcome, ReceiveOutcome::ReadyForVerification);
                    } else {
                        assert_eq!(outcome, ReceiveOutcome::SliceAccepted);
                    }
                }

                assert!(incoming.is_ready());
                assert!(incoming.verify(), "size {}", size);

                let dst = dir.path().join(format!("dst_{}_{}.bin", k, r));
                incoming.save(&dst).unwrap();
                assert_eq!(std::fs::read(&dst).unwrap(), data, "size {}", size);
            }
        }
    }

    #[test]
    fn test_single_byte_corruption_detected() {
        let dir = TempDir::new().unwrap();
        let src = write_file(&dir, "data.bin", &pattern(3 * SLICE_CAPACITY + 10));
        let mut outgoing = OutgoingFile::begin(&src).unwrap();

        let mut incoming = IncomingFile::new(0);
        incoming.accept(FilePacket::Meta(outgoing.metadata().clone()));
        for id in 0..outgoing.total_slices() {
            let mut data = outgoing.slice(id).unwrap().to_vec();
            if id == 2 {
                data[100] ^= 0x01;
            }
            incoming.accept(FilePacket::Slice {
                id,
                payload: Bytes::from(data),
            });
        }

        assert!(incoming.is_ready());
        assert!(!incoming.verify());
        assert!(matches!(
            incoming.verify_or_err(),
            Err(Error::IntegrityMismatch { .. })
        ));
    }

    #[test]
    fn test_duplicates_do_not_complete_transfer() {
        let meta = FileMetadata::new("dup.bin", 3 * SLICE_CAPACITY as u64, [0; 16]);
        let mut incoming = IncomingFile::new(0);
        incoming.accept(FilePacket::Meta(meta));

        let slice = || FilePacket::Slice {
            id: 1,
            payload: Bytes::from(vec![1u8; SLICE_CAPACITY]),
        };
        assert_eq!(incoming.accept(slice()), ReceiveOutcome::SliceAccepted);
        assert_eq!(incoming.accept(slice()), ReceiveOutcome::SliceAccepted);
        assert_eq!(incoming.received_count(), 1);

        // 최고 id만 도착해도 완료가 아님
        incoming.accept(FilePacket::Slice {
            id: 2,
            payload: Bytes::from(vec![2u8; SLICE_CAPACITY]),
        });
        assert!(!incoming.is_ready());
        assert!(matches!(
            incoming.save("/nonexistent/never-written"),
            Err(Error::NotReady {
                received: 2,
                total: 3
            })
        ));
    }

    #[test]
    fn test_out_of_range_slice_ignored() {
        let meta = FileMetadata::new("small.bin", 10, [0; 16]);
        let mut incoming = IncomingFile::new(0);
        incoming.accept(FilePacket::Meta(meta));

        let outcome = incoming.accept(FilePacket::Slice {
            id: 1,
            payload: Bytes::from_static(b"x"),
        });
        assert_eq!(outcome, ReceiveOutcome::Ignored);
        assert_eq!(incoming.received_count(), 0);
    }

    #[test]
    fn test_slices_before_meta_are_parked() {
        let dir = TempDir::new().unwrap();
        let data = pattern(2 * SLICE_CAPACITY + 3);
        let src = write_file(&dir, "early.bin", &data);
        let mut outgoing = OutgoingFile::begin(&src).unwrap();

        let mut incoming = IncomingFile::new(2);
        assert_eq!(
            incoming.accept(wire_slice(&mut outgoing, 2)),
            ReceiveOutcome::SliceAccepted
        );
        assert_eq!(
            incoming.accept(wire_slice(&mut outgoing, 0)),
            ReceiveOutcome::SliceAccepted
        );
        // 보관 한도 초과
        assert_eq!(
            incoming.accept(wire_slice(&mut outgoing, 1)),
            ReceiveOutcome::Ignored
        );
        assert_eq!(incoming.early_count(), 2);

        let meta = outgoing.metadata().clone();
        assert_eq!(
            incoming.accept(FilePacket::Meta(meta)),
            ReceiveOutcome::MetaAccepted
        );
        assert_eq!(incoming.early_count(), 0);
        assert_eq!(incoming.received_count(), 2);

        assert_eq!(
            incoming.accept(wire_slice(&mut outgoing, 1)),
            ReceiveOutcome::ReadyForVerification
        );
        assert!(incoming.verify());
    }

    #[test]
    fn test_meta_policy() {
        let meta = FileMetadata::new("a.bin", 500, [1; 16]);
        let other = FileMetadata::new("b.bin", 500, [2; 16]);
        let mut incoming = IncomingFile::new(0);

        assert_eq!(
            incoming.accept(FilePacket::Meta(meta.clone())),
            ReceiveOutcome::MetaAccepted
        );
        assert_eq!(
            incoming.accept(FilePacket::Meta(meta.clone())),
            ReceiveOutcome::MetaAccepted
        );
        assert_eq!(
            incoming.accept(FilePacket::Meta(other.clone())),
            ReceiveOutcome::Ignored
        );
        assert_eq!(incoming.metadata(), Some(&meta));

        // 슬라이스 수가 크기와 맞지 않는 메타데이터
        let mut bogus = other.clone();
        bogus.total_slices = 99;
        incoming.reset();
        assert_eq!(incoming.accept(FilePacket::Meta(bogus)), ReceiveOutcome::Ignored);

        assert_eq!(
            incoming.accept(FilePacket::Meta(other.clone())),
            ReceiveOutcome::MetaAccepted
        );
        assert_eq!(incoming.metadata(), Some(&other));
    }

    #[test]
    fn test_empty_file() {
        let dir = TempDir::new().unwrap();
        let src = write_file(&dir, "empty.bin", &[]);
        let outgoing = OutgoingFile::begin(&src).unwrap();
        assert_eq!(outgoing.total_slices(), 0);

        let mut incoming = IncomingFile::new(0);
        assert_eq!(
            incoming.accept(FilePacket::Meta(outgoing.metadata().clone())),
            ReceiveOutcome::ReadyForVerification
        );
        assert!(incoming.verify());

        let dst = dir.path().join("out.bin");
        incoming.save(&dst).unwrap();
        assert!(std::fs::read(&dst).unwrap().is_empty());
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let dir = TempDir::new().unwrap();
        let result = OutgoingFile::begin(dir.path().join("missing.bin"));
        assert!(matches!(result, Err(Error::Io(_))));
    }

    #[test]
    fn test_not_ready_without_meta() {
        let incoming = IncomingFile::new(0);
        assert!(!incoming.verify());
        assert!(matches!(
            incoming.verify_or_err(),
            Err(Error::NotReady { .. })
        ));
    }
}
