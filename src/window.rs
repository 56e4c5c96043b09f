//! 송신/수신 슬라이딩 윈도우
//!
//! 두 윈도우 모두 `(id - base) mod MAX_ID`로 주소를 계산하는 고정 크기 원형 버퍼다.
//! I/O는 하지 않으며 락은 호출자(엔진)가 잡는다.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crate::error::FlowControlError;
use crate::packet::{Packet, SeqId};
use crate::MAX_ID;

/// `(id - base) mod MAX_ID`
#[inline]
pub fn seq_offset(id: SeqId, base: SeqId) -> u32 {
    id.wrapping_sub(base) & (MAX_ID - 1)
}

/// `(id + n) mod MAX_ID`
#[inline]
pub fn seq_add(id: SeqId, n: u32) -> SeqId {
    id.wrapping_add(n) & (MAX_ID - 1)
}

/// 송신 윈도우 슬롯
#[derive(Debug, Clone)]
pub enum TxSlot {
    Empty,
    /// 전송됐지만 ACK 대기 중 (재전송용 사본 보관)
    Pending { packet: Packet, sent_at: Instant },
    Acked,
}

impl TxSlot {
    fn is_empty(&self) -> bool {
        matches!(self, TxSlot::Empty)
    }
}

/// 송신 윈도우
///
/// ```text
///  base               next_seq
///   │                    │
///  ─┼────────────────────┼────────────▶ seq space (mod 2^24)
///   │ <── in flight ───▶ │ <── sendable while in_flight < size
/// ```
#[derive(Debug)]
pub struct TxWindow {
    base: SeqId,
    next_seq: SeqId,
    size: usize,
    slots: VecDeque<TxSlot>,
}

impl TxWindow {
    pub fn new(size: usize, base: SeqId) -> Self {
        Self {
            base: base % MAX_ID,
            next_seq: base % MAX_ID,
            size,
            slots: (0..size).map(|_| TxSlot::Empty).collect(),
        }
    }

    pub fn base(&self) -> SeqId {
        self.base
    }

    pub fn next_seq(&self) -> SeqId {
        self.next_seq
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// 전송 후 아직 윈도우에서 빠지지 않은 ID 수 (`next_seq - base`)
    pub fn in_flight(&self) -> usize {
        seq_offset(self.next_seq, self.base) as usize
    }

    pub fn has_capacity(&self) -> bool {
        self.in_flight() < self.size
    }

    /// 비어 있지 않은 슬롯 수
    pub fn occupied(&self) -> usize {
        self.slots.iter().filter(|s| !s.is_empty()).count()
    }

    /// ACK 대기 중인 슬롯 수
    pub fn pending(&self) -> usize {
        self.slots
            .iter()
            .filter(|s| matches!(s, TxSlot::Pending { .. }))
            .count()
    }

    /// ID에 해당하는 슬롯
    pub fn slot(&self, id: SeqId) -> Option<&TxSlot> {
        self.index_of(id).ok().and_then(|i| self.slots.get(i))
    }

    /// 윈도우를 비우고 기준 ID를 재설정
    pub fn reset(&mut self, base: SeqId) {
        self.base = base % MAX_ID;
        self.next_seq = self.base;
        self.slots.iter_mut().for_each(|s| *s = TxSlot::Empty);
    }

    /// 다음 시퀀스 ID를 할당하고 사본을 윈도우에 보관
    ///
    /// 체크섬을 다시 계산한 전송용 패킷을 반환한다.
    pub fn admit(&mut self, mut packet: Packet, now: Instant) -> Result<Packet, FlowControlError> {
        if !self.has_capacity() {
            return Err(FlowControlError::OutsideWindow {
                id: self.next_seq,
                base: self.base,
            });
        }

        let index = self.in_flight();
        if !self.slots[index].is_empty() {
            return Err(FlowControlError::SlotOccupied(self.next_seq));
        }

        packet.id = self.next_seq;
        packet.seal();
        self.slots[index] = TxSlot::Pending {
            packet: packet.clone(),
            sent_at: now,
        };
        self.next_seq = seq_add(self.next_seq, 1);

        Ok(packet)
    }

    /// 선택적/중복 ACK 처리
    pub fn mark_acked(&mut self, id: SeqId) -> Result<(), FlowControlError> {
        let index = self.index_of(id)?;
        match self.slots[index] {
            TxSlot::Empty => Err(FlowControlError::EmptySlot(id)),
            TxSlot::Acked => Err(FlowControlError::AlreadyAcked(id)),
            TxSlot::Pending { .. } => {
                self.slots[index] = TxSlot::Acked;
                Ok(())
            }
        }
    }

    /// 누적 ACK 처리: `id`까지 윈도우를 민다
    pub fn cumulative_ack(&mut self, id: SeqId) -> Result<usize, FlowControlError> {
        let offset = seq_offset(id, self.base) as usize;
        if offset >= self.in_flight() {
            return Err(FlowControlError::OutsideWindow {
                id,
                base: self.base,
            });
        }
        self.shift(offset + 1);
        Ok(offset + 1)
    }

    /// 선두의 ACK된 구간만큼 윈도우를 민다
    pub fn advance_acked(&mut self) -> usize {
        let mut shifted = 0;
        while matches!(self.slots.front(), Some(TxSlot::Acked)) {
            self.shift(1);
            shifted += 1;
        }
        shifted
    }

    /// 타임아웃된 패킷 수집 (타임스탬프 갱신)
    pub fn due_for_retransmit(&mut self, now: Instant, timeout: Duration) -> Vec<Packet> {
        self.slots
            .iter_mut()
            .filter_map(|slot| match slot {
                TxSlot::Pending { packet, sent_at }
                    if now.saturating_duration_since(*sent_at) >= timeout =>
                {
                    *sent_at = now;
                    Some(packet.clone())
                }
                _ => None,
            })
            .collect()
    }

    fn index_of(&self, id: SeqId) -> Result<usize, FlowControlError> {
        let offset = seq_offset(id, self.base) as usize;
        if offset >= self.size {
            return Err(FlowControlError::OutsideWindow {
                id,
                base: self.base,
            });
        }
        Ok(offset)
    }

    fn shift(&mut self, count: usize) {
        for _ in 0..count.min(self.size) {
            self.slots.pop_front();
            self.slots.push_back(TxSlot::Empty);
        }
        self.base = seq_add(self.base, count as u32);
    }
}

/// 수신 윈도우 슬롯
#[derive(Debug, Clone)]
pub enum RxSlot {
    Empty,
    /// 순서가 앞선 ID를 기다리는 패킷
    Buffered(Packet),
    /// 순서 보장 비활성 시 이미 전달된 자리 표시
    Delivered,
}

impl RxSlot {
    fn is_empty(&self) -> bool {
        matches!(self, RxSlot::Empty)
    }
}

/// 수신 ID의 윈도우 내 위치
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    /// `id == rx_base`
    InOrder,
    /// 윈도우 안, 순서 어긋남 (슬롯 인덱스)
    InWindow(usize),
    /// base 뒤 window_size 이내: ACK 유실로 인한 재전송
    Lookback,
    /// 관계없는 트래픽
    Stale,
}

/// 수신 윈도우
#[derive(Debug)]
pub struct RxWindow {
    base: SeqId,
    size: usize,
    slots: VecDeque<RxSlot>,
}

impl RxWindow {
    pub fn new(size: usize, base: SeqId) -> Self {
        Self {
            base: base % MAX_ID,
            size,
            slots: (0..size).map(|_| RxSlot::Empty).collect(),
        }
    }

    pub fn base(&self) -> SeqId {
        self.base
    }

    pub fn reset(&mut self, base: SeqId) {
        self.base = base % MAX_ID;
        self.slots.iter_mut().for_each(|s| *s = RxSlot::Empty);
    }

    pub fn classify(&self, id: SeqId) -> Placement {
        let ahead = seq_offset(id, self.base) as usize;
        if ahead == 0 {
            return Placement::InOrder;
        }
        if ahead < self.size {
            return Placement::InWindow(ahead);
        }

        let behind = seq_offset(self.base, id) as usize;
        if (1..=self.size).contains(&behind) {
            Placement::Lookback
        } else {
            Placement::Stale
        }
    }

    pub fn is_occupied(&self, index: usize) -> bool {
        self.slots.get(index).map_or(false, |s| !s.is_empty())
    }

    /// 슬롯에 저장 (비어 있는 슬롯만)
    pub fn store(&mut self, index: usize, slot: RxSlot) -> Result<(), FlowControlError> {
        let id = seq_add(self.base, index as u32);
        match self.slots.get_mut(index) {
            None => Err(FlowControlError::OutsideWindow {
                id,
                base: self.base,
            }),
            Some(current) if !current.is_empty() => Err(FlowControlError::SlotOccupied(id)),
            Some(current) => {
                *current = slot;
                Ok(())
            }
        }
    }

    /// 선두부터 연속으로 채워진 슬롯을 꺼내고 base를 전진
    ///
    /// 자리 표시(`Delivered`)는 건너뛰고 버퍼된 패킷만 최대 `limit`개 반환한다.
    /// 한도에 걸린 패킷은 선두에 남아 다음 스윕을 기다린다.
    pub fn sweep(&mut self, limit: usize) -> Vec<Packet> {
        let mut count = 0;
        let mut taken = 0;
        for slot in &self.slots {
            match slot {
                RxSlot::Empty => break,
                RxSlot::Buffered(_) if taken == limit => break,
                RxSlot::Buffered(_) => taken += 1,
                RxSlot::Delivered => {}
            }
            count += 1;
        }

        let delivered = self
            .slots
            .drain(..count)
            .filter_map(|slot| match slot {
                RxSlot::Buffered(packet) => Some(packet),
                _ => None,
            })
            .collect();

        self.slots.extend((0..count).map(|_| RxSlot::Empty));
        self.base = seq_add(self.base, count as u32);
        delivered
    }

    /// 선두 슬롯에 전달 대기 중인 패킷이 있는지
    pub fn has_ready(&self) -> bool {
        matches!(self.slots.front(), Some(RxSlot::Buffered(_)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::PacketType;
    use proptest::prelude::*;

    fn text(body: &str) -> Packet {
        Packet::text(body).unwrap()
    }

    #[test]
    fn test_seq_arithmetic_wraps() {
        assert_eq!(seq_add(MAX_ID - 1, 1), 0);
        assert_eq!(seq_offset(2, MAX_ID - 2), 4);
        assert_eq!(seq_offset(5, 5), 0);
    }

    #[test]
    fn test_admit_until_full() {
        let mut window = TxWindow::new(2, 10);
        let now = Instant::now();

        let first = window.admit(text("a"), now).unwrap();
        let second = window.admit(text("b"), now).unwrap();
        assert_eq!((first.id, second.id), (10, 11));
        assert!(first.verify().is_ok());

        assert!(!window.has_capacity());
        assert!(matches!(
            window.admit(text("c"), now),
            Err(FlowControlError::OutsideWindow { .. })
        ));
        assert_eq!(window.occupied(), 2);
        assert_eq!(window.next_seq(), 12);
    }

    #[test]
    fn test_selective_ack_then_advance() {
        let mut window = TxWindow::new(4, 0);
        let now = Instant::now();
        for body in ["a", "b", "c"] {
            window.admit(text(body), now).unwrap();
        }

        window.mark_acked(1).unwrap();
        assert_eq!(window.advance_acked(), 0);
        assert_eq!(window.base(), 0);

        window.mark_acked(0).unwrap();
        assert_eq!(window.advance_acked(), 2);
        assert_eq!(window.base(), 2);
        assert_eq!(window.in_flight(), 1);
    }

    #[test]
    fn test_ack_errors() {
        let mut window = TxWindow::new(4, 0);
        window.admit(text("a"), Instant::now()).unwrap();

        assert_eq!(window.mark_acked(2), Err(FlowControlError::EmptySlot(2)));
        assert!(matches!(
            window.mark_acked(9),
            Err(FlowControlError::OutsideWindow { id: 9, base: 0 })
        ));
        window.mark_acked(0).unwrap();
        assert_eq!(window.mark_acked(0), Err(FlowControlError::AlreadyAcked(0)));
    }

    #[test]
    fn test_cumulative_ack() {
        let mut window = TxWindow::new(4, MAX_ID - 2);
        let now = Instant::now();
        for body in ["a", "b", "c"] {
            window.admit(text(body), now).unwrap();
        }

        // MAX_ID-2, MAX_ID-1 까지 누적 ACK
        assert_eq!(window.cumulative_ack(MAX_ID - 1), Ok(2));
        assert_eq!(window.base(), 0);
        assert_eq!(window.in_flight(), 1);

        // 아직 보내지 않은 ID는 거부
        assert!(window.cumulative_ack(3).is_err());
    }

    #[test]
    fn test_retransmit_refreshes_timestamp() {
        let mut window = TxWindow::new(4, 0);
        let start = Instant::now();
        window.admit(text("a"), start).unwrap();

        let timeout = Duration::from_secs(2);
        assert!(window.due_for_retransmit(start, timeout).is_empty());

        let later = start + Duration::from_secs(3);
        let due = window.due_for_retransmit(later, timeout);
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].id, 0);
        assert!(window.due_for_retransmit(later, timeout).is_empty());
    }

    #[test]
    fn test_rx_classify() {
        let window = RxWindow::new(4, 1);
        assert_eq!(window.classify(1), Placement::InOrder);
        assert_eq!(window.classify(3), Placement::InWindow(2));
        assert_eq!(window.classify(5), Placement::Stale);
        assert_eq!(window.classify(0), Placement::Lookback);
        assert_eq!(window.classify(MAX_ID - 3), Placement::Lookback);
        assert_eq!(window.classify(MAX_ID - 4), Placement::Stale);
    }

    #[test]
    fn test_rx_sweep_stops_at_gap() {
        let mut window = RxWindow::new(4, 0);
        window
            .store(0, RxSlot::Buffered(text("a").with_id(0)))
            .unwrap();
        window.store(1, RxSlot::Delivered).unwrap();
        window
            .store(3, RxSlot::Buffered(text("d").with_id(3)))
            .unwrap();

        let delivered = window.sweep(usize::MAX);
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].id, 0);
        assert_eq!(window.base(), 2);
        assert!(window.is_occupied(1));
        assert_eq!(
            window.store(1, RxSlot::Delivered),
            Err(FlowControlError::SlotOccupied(3))
        );
    }

    #[test]
    fn test_rx_sweep_full_window() {
        let mut window = RxWindow::new(2, 7);
        window.store(1, RxSlot::Buffered(text("b").with_id(8))).unwrap();
        window.store(0, RxSlot::Buffered(text("a").with_id(7))).unwrap();

        let ids: Vec<_> = window.sweep(usize::MAX).iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![7, 8]);
        assert_eq!(window.base(), 9);
        assert!(!window.is_occupied(0));
    }

    #[test]
    fn test_rx_sweep_respects_limit() {
        let mut window = RxWindow::new(4, 0);
        window.store(0, RxSlot::Buffered(text("a").with_id(0))).unwrap();
        window.store(1, RxSlot::Delivered).unwrap();
        window.store(2, RxSlot::Buffered(text("c").with_id(2))).unwrap();

        assert!(window.sweep(0).is_empty());
        assert_eq!(window.base(), 0);
        assert!(window.has_ready());

        let ids: Vec<_> = window.sweep(1).iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![0]);
        // 자리 표시는 한도와 무관하게 지나간다
        assert_eq!(window.base(), 2);
        assert!(window.has_ready());

        let ids: Vec<_> = window.sweep(1).iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![2]);
        assert_eq!(window.base(), 3);
        assert!(!window.has_ready());
    }

    #[derive(Debug, Clone)]
    enum Op {
        Admit,
        Sack(u32),
        Cack(u32),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            3 => Just(Op::Admit),
            2 => (0u32..16).prop_map(Op::Sack),
            1 => (0u32..16).prop_map(Op::Cack),
        ]
    }

    proptest! {
        #[test]
        fn window_capacity_invariant(
            size in 1usize..8,
            start in prop_oneof![Just(0u32), Just(MAX_ID - 3), 0u32..MAX_ID],
            ops in prop::collection::vec(op(), 1..200),
        ) {
            let mut window = TxWindow::new(size, start);
            let now = Instant::now();
            let payload = Packet::new(PacketType::Text, &b"x"[..]).unwrap();

            for op in ops {
                match op {
                    Op::Admit => { let _ = window.admit(payload.clone(), now); }
                    Op::Sack(delta) => {
                        let _ = window.mark_acked(seq_add(window.base(), delta));
                        window.advance_acked();
                    }
                    Op::Cack(delta) => {
                        let _ = window.cumulative_ack(seq_add(window.base(), delta));
                        window.advance_acked();
                    }
                }
                prop_assert!(window.in_flight() <= size);
                prop_assert!(window.occupied() <= window.in_flight());
            }
        }
    }
}
