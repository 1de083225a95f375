//! 데이터그램 소켓 추상화
//!
//! 연결 계층은 논블로킹 송수신만 필요로 한다. 실제 네트워크는
//! `tokio::net::UdpSocket`, 테스트는 손실/순서 뒤바뀜을 흉내 내는
//! [`MemoryNetwork`]를 사용한다.

use std::collections::{HashMap, VecDeque};
use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::net::UdpSocket;
use tracing::debug;

/// 논블로킹 데이터그램 소켓
pub trait DatagramSocket {
    /// 데이터그램 1개 전송 (UDP처럼 전달은 보장하지 않음)
    fn send_to(&self, datagram: &[u8], peer: SocketAddr) -> io::Result<()>;

    /// 준비된 데이터그램 1개 수신, 없으면 즉시 None
    fn try_recv_from(&self, buf: &mut [u8]) -> io::Result<Option<(usize, SocketAddr)>>;

    fn local_addr(&self) -> io::Result<SocketAddr>;
}

/// 모든 인터페이스의 `port`에 UDP 소켓 바인딩
pub async fn bind(port: u16) -> io::Result<UdpSocket> {
    UdpSocket::bind(SocketAddr::from((Ipv4Addr::UNSPECIFIED, port))).await
}

impl DatagramSocket for UdpSocket {
    fn send_to(&self, datagram: &[u8], peer: SocketAddr) -> io::Result<()> {
        match self.try_send_to(datagram, peer) {
            Ok(_) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                debug!("송신 버퍼 가득 참, 데이터그램 폐기: {}", peer);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    fn try_recv_from(&self, buf: &mut [u8]) -> io::Result<Option<(usize, SocketAddr)>> {
        match UdpSocket::try_recv_from(self, buf) {
            Ok((len, addr)) => Ok(Some((len, addr))),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            // 일부 플랫폼은 ICMP port unreachable을 수신 에러로 돌려줌
            Err(e) if e.kind() == io::ErrorKind::ConnectionReset => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        UdpSocket::local_addr(self)
    }
}

/// 메모리 링크 품질
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct LinkConditions {
    /// 손실 확률 (0.0 ~ 1.0)
    pub loss: f64,

    /// 큐 중간에 끼어들 확률 (순서 뒤바뀜)
    pub reorder: f64,

    /// 중복 전달 확률
    pub duplicate: f64,
}

impl LinkConditions {
    /// 손실/뒤바뀜 없는 링크
    pub fn perfect() -> Self {
        Self::default()
    }

    pub fn lossy(loss: f64) -> Self {
        Self {
            loss,
            ..Self::default()
        }
    }
}

struct NetworkInner {
    mailboxes: HashMap<SocketAddr, VecDeque<(Bytes, SocketAddr)>>,
    conditions: LinkConditions,
    rng: StdRng,
    delivered: u64,
    dropped: u64,
}

/// 프로세스 내부 가상 네트워크
#[derive(Clone)]
pub struct MemoryNetwork {
    inner: Arc<Mutex<NetworkInner>>,
}

impl MemoryNetwork {
    /// 완벽한 링크
    pub fn new() -> Self {
        Self::with_conditions(LinkConditions::perfect(), 0)
    }

    /// 주어진 품질과 시드로 생성 (같은 시드면 같은 손실 패턴)
    pub fn with_conditions(conditions: LinkConditions, seed: u64) -> Self {
        Self {
            inner: Arc::new(Mutex::new(NetworkInner {
                mailboxes: HashMap::new(),
                conditions,
                rng: StdRng::seed_from_u64(seed),
                delivered: 0,
                dropped: 0,
            })),
        }
    }

    /// 주소에 소켓 생성
    pub fn bind(&self, addr: SocketAddr) -> io::Result<MemorySocket> {
        let mut inner = self.inner.lock();
        if inner.mailboxes.contains_key(&addr) {
            return Err(io::Error::new(
                io::ErrorKind::AddrInUse,
                format!("{} 이미 사용 중", addr),
            ));
        }
        inner.mailboxes.insert(addr, VecDeque::new());

        Ok(MemorySocket {
            addr,
            network: self.clone(),
        })
    }

    /// 전달된 데이터그램 수
    pub fn delivered(&self) -> u64 {
        self.inner.lock().delivered
    }

    /// 폐기된 데이터그램 수
    pub fn dropped(&self) -> u64 {
        self.inner.lock().dropped
    }

    fn deliver(&self, from: SocketAddr, to: SocketAddr, datagram: &[u8]) {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        let conditions = inner.conditions;

        if chance(&mut inner.rng, conditions.loss) {
            inner.dropped += 1;
            return;
        }

        let Some(mailbox) = inner.mailboxes.get_mut(&to) else {
            inner.dropped += 1;
            return;
        };

        let copies = if chance(&mut inner.rng, conditions.duplicate) { 2 } else { 1 };
        for _ in 0..copies {
            let entry = (Bytes::copy_from_slice(datagram), from);
            if !mailbox.is_empty() && chance(&mut inner.rng, conditions.reorder) {
                let position = inner.rng.gen_range(0..mailbox.len());
                mailbox.insert(position, entry);
            } else {
                mailbox.push_back(entry);
            }
            inner.delivered += 1;
        }
    }

    fn take(&self, addr: SocketAddr) -> Option<(Bytes, SocketAddr)> {
        self.inner
            .lock()
            .mailboxes
            .get_mut(&addr)
            .and_then(|mailbox| mailbox.pop_front())
    }

    fn unbind(&self, addr: SocketAddr) {
        self.inner.lock().mailboxes.remove(&addr);
    }
}

impl Default for MemoryNetwork {
    fn default() -> Self {
        Self::new()
    }
}

fn chance(rng: &mut StdRng, probability: f64) -> bool {
    probability > 0.0 && rng.gen_bool(probability.min(1.0))
}

/// [`MemoryNetwork`] 위의 소켓
pub struct MemorySocket {
    addr: SocketAddr,
    network: MemoryNetwork,
}

impl DatagramSocket for MemorySocket {
    fn send_to(&self, datagram: &[u8], peer: SocketAddr) -> io::Result<()> {
        self.network.deliver(self.addr, peer, datagram);
        Ok(())
    }

    fn try_recv_from(&self, buf: &mut [u8]) -> io::Result<Option<(usize, SocketAddr)>> {
        Ok(self.network.take(self.addr).map(|(datagram, from)| {
            // UDP처럼 버퍼보다 긴 데이터그램은 잘림
            let len = datagram.len().min(buf.len());
            buf[..len].copy_from_slice(&datagram[..len]);
            (len, from)
        }))
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        Ok(self.addr)
    }
}

impl Drop for MemorySocket {
    fn drop(&mut self) {
        self.network.unbind(self.addr);
    }
}
