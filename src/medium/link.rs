//! 메모리 양방향 링크 (장애 주입)
//!
//! 두 끝점이 채널로 연결된 가상 무선/위성 링크. 송신 시점에 손실, 중복,
//! 순서 뒤바꿈, 특정 ID의 첫 전송 폐기를 적용한다. 상대가 닫혀 있으면
//! 프레임은 허공으로 사라진다.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::trace;

use super::{Medium, MediumKind};
use crate::packet::{Packet, SeqId};
use crate::{Error, Result};

/// 장애 모델 (확률은 0.0 ~ 1.0)
#[derive(Debug, Clone, Default)]
pub struct LinkFaults {
    /// 프레임 손실 확률
    pub loss_rate: f64,

    /// 프레임 중복 확률
    pub duplicate_rate: f64,

    /// 다음 프레임 뒤로 밀릴 확률
    pub reorder_rate: f64,

    /// 첫 전송만 버릴 데이터 패킷 ID (ACK/핸드쉐이크 제외)
    pub drop_first_of: Vec<SeqId>,

    /// 난수 시드 (재현 가능한 테스트용)
    pub seed: u64,
}

impl LinkFaults {
    /// 손실만 있는 링크
    pub fn lossy(loss_rate: f64, seed: u64) -> Self {
        Self {
            loss_rate,
            seed,
            ..Self::default()
        }
    }
}

#[derive(Debug)]
struct FaultState {
    rng: StdRng,
    held: Option<Bytes>,
    dropped: HashSet<SeqId>,
}

/// 링크 한쪽 끝점
#[derive(Debug)]
pub struct LinkMedium {
    kind: MediumKind,
    reliable: bool,
    side: usize,
    open: Arc<[AtomicBool; 2]>,
    tx: Sender<Bytes>,
    rx: Receiver<Bytes>,
    faults: LinkFaults,
    state: Mutex<FaultState>,
}

impl LinkMedium {
    /// 장애 없는 링크 쌍
    pub fn pair(kind: MediumKind) -> (Self, Self) {
        Self::pair_with(kind, false, LinkFaults::default())
    }

    /// 양방향에 같은 장애 모델을 적용한 링크 쌍
    pub fn pair_with(kind: MediumKind, reliable: bool, faults: LinkFaults) -> (Self, Self) {
        let (a_tx, b_rx) = unbounded();
        let (b_tx, a_rx) = unbounded();
        let open = Arc::new([AtomicBool::new(false), AtomicBool::new(false)]);

        let end = |side: usize, tx, rx| Self {
            kind,
            reliable,
            side,
            open: open.clone(),
            tx,
            rx,
            state: Mutex::new(FaultState {
                rng: StdRng::seed_from_u64(faults.seed.wrapping_add(side as u64)),
                held: None,
                dropped: HashSet::new(),
            }),
            faults: faults.clone(),
        };

        (end(0, a_tx, a_rx), end(1, b_tx, b_rx))
    }

    fn is_open(&self) -> bool {
        self.open[self.side].load(Ordering::SeqCst)
    }

    fn peer_open(&self) -> bool {
        self.open[1 - self.side].load(Ordering::SeqCst)
    }

    fn deliver(&self, frame: Bytes) {
        if self.peer_open() {
            let _ = self.tx.send(frame);
        }
    }

    fn drop_first(&self, frame: &[u8], state: &mut FaultState) -> bool {
        if self.faults.drop_first_of.is_empty() {
            return false;
        }
        match Packet::decode(frame) {
            Ok(packet) if !packet.kind.is_ack() && !packet.kind.is_handshake() => {
                self.faults.drop_first_of.contains(&packet.id) && state.dropped.insert(packet.id)
            }
            _ => false,
        }
    }
}

fn chance(rng: &mut StdRng, probability: f64) -> bool {
    probability > 0.0 && rng.gen_bool(probability.min(1.0))
}

impl Medium for LinkMedium {
    fn start(&self) -> Result<()> {
        self.open[self.side].store(true, Ordering::SeqCst);
        Ok(())
    }

    fn close(&self) {
        self.open[self.side].store(false, Ordering::SeqCst);
        while self.rx.try_recv().is_ok() {}
        self.state.lock().held = None;
    }

    fn write(&self, frame: &[u8]) -> Result<()> {
        if !self.is_open() {
            return Err(Error::MediumUnavailable(format!("{} link (closed)", self.kind)));
        }

        let mut state = self.state.lock();
        if self.drop_first(frame, &mut state) {
            trace!("링크: 첫 전송 폐기");
            return Ok(());
        }
        if chance(&mut state.rng, self.faults.loss_rate) {
            trace!("링크: 프레임 손실");
            return Ok(());
        }

        let frame = Bytes::copy_from_slice(frame);
        let copies = if chance(&mut state.rng, self.faults.duplicate_rate) {
            2
        } else {
            1
        };

        if state.held.is_none() && chance(&mut state.rng, self.faults.reorder_rate) {
            // 다음 프레임 뒤에 전달
            state.held = Some(frame);
            return Ok(());
        }

        for _ in 0..copies {
            self.deliver(frame.clone());
        }
        if let Some(held) = state.held.take() {
            self.deliver(held);
        }
        Ok(())
    }

    fn read_next(&self) -> Option<Bytes> {
        if !self.is_open() {
            return None;
        }
        self.rx.try_recv().ok()
    }

    fn is_reliable(&self) -> bool {
        self.reliable
    }

    fn kind(&self) -> MediumKind {
        self.kind
    }
}
