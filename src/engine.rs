//! ARQ 엔진
//!
//! 송신 윈도우, 수신 윈도우, 모드 상태 기계를 소유한다. 워커 루프는 세션이
//! 돌리고 엔진은 한 번의 반복을 `egress_step` / `ingress_step`으로 제공한다.
//!
//! 락 순서: `tx` 또는 `rx` 하나만 잡고, 매체 쓰기와 큐 전달은 락을 놓은 뒤 한다.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use parking_lot::{Mutex, RwLock};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::error::FlowControlError;
use crate::medium::{Medium, MediumKind, MediumSet};
use crate::packet::{Packet, PacketType, SeqId};
use crate::stats::LinkStats;
use crate::window::{seq_add, Placement, RxSlot, RxWindow, TxWindow};
use crate::{Config, Error, Result};

/// 동작 모드
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mode {
    /// 세션 수립 중: HANDSHAKE만 송신, 모든 매체 사용
    Handshake,
    Radio,
    Satellite,
    /// 로컬 테스트용 루프백
    Debug,
}

impl Mode {
    /// 모드에 대응하는 단일 매체 (Handshake는 None)
    pub fn medium(self) -> Option<MediumKind> {
        match self {
            Mode::Handshake => None,
            Mode::Radio => Some(MediumKind::Radio),
            Mode::Satellite => Some(MediumKind::Satellite),
            Mode::Debug => Some(MediumKind::Debug),
        }
    }
}

impl From<MediumKind> for Mode {
    fn from(kind: MediumKind) -> Self {
        match kind {
            MediumKind::Radio => Mode::Radio,
            MediumKind::Satellite => Mode::Satellite,
            MediumKind::Debug => Mode::Debug,
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Handshake => write!(f, "handshake"),
            Mode::Radio => write!(f, "radio"),
            Mode::Satellite => write!(f, "satellite"),
            Mode::Debug => write!(f, "debug"),
        }
    }
}

/// 윈도우 진단 스냅샷
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowStatus {
    pub mode: Mode,
    pub window_size: usize,
    pub tx_base: SeqId,
    pub tx_next_seq: SeqId,
    /// `tx_next_seq - tx_base`
    pub in_flight: usize,
    /// ACK 대기 슬롯 수
    pub unacked: usize,
    pub rx_base: SeqId,
    pub outbound_queued: usize,
    pub inbound_queued: usize,
}

#[derive(Debug)]
struct TxState {
    window: TxWindow,

    /// 마지막으로 보낸 HANDSHAKE의 ID
    pending_handshake: Option<SeqId>,

    /// 수립된 세션의 핸드쉐이크 ID (중복 응답 식별용)
    established_id: Option<SeqId>,

    /// 윈도우가 가득 찬 상태 (경고는 한 번만)
    stalled: bool,
}

#[derive(Debug)]
struct RxState {
    window: RxWindow,

    /// 수락한 HANDSHAKE의 ID
    accepted_handshake: Option<SeqId>,
}

/// 수신 패킷 처리 결과
enum Verdict {
    Ack(PacketType),
    Drop,
}

/// ARQ 엔진
pub struct Engine {
    config: Config,
    mediums: MediumSet,

    tx: Mutex<TxState>,
    rx: Mutex<RxState>,
    mode: RwLock<Mode>,

    outbound_tx: Sender<Packet>,
    outbound_rx: Receiver<Packet>,
    inbound_tx: Sender<Packet>,
    inbound_rx: Receiver<Packet>,

    established: watch::Sender<bool>,
    stats: Mutex<LinkStats>,
    running: AtomicBool,
}

impl Engine {
    pub fn new(config: Config, mediums: MediumSet) -> Self {
        let (outbound_tx, outbound_rx) = bounded(config.outbound_capacity);
        let (inbound_tx, inbound_rx) = bounded(config.inbound_capacity);
        let (established, _) = watch::channel(false);

        Self {
            tx: Mutex::new(TxState {
                window: TxWindow::new(config.window_size, 0),
                pending_handshake: None,
                established_id: None,
                stalled: false,
            }),
            rx: Mutex::new(RxState {
                window: RxWindow::new(config.window_size, 0),
                accepted_handshake: None,
            }),
            mode: RwLock::new(Mode::Handshake),
            outbound_tx,
            outbound_rx,
            inbound_tx,
            inbound_rx,
            established,
            stats: Mutex::new(LinkStats::new()),
            running: AtomicBool::new(false),
            config,
            mediums,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn mediums(&self) -> &MediumSet {
        &self.mediums
    }

    pub fn mode(&self) -> Mode {
        *self.mode.read()
    }

    pub fn set_mode(&self, mode: Mode) {
        *self.mode.write() = mode;
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::SeqCst);
    }

    pub fn subscribe_established(&self) -> watch::Receiver<bool> {
        self.established.subscribe()
    }

    /// 새 세션 준비: 모드 설정, 윈도우와 기준 ID 재설정, 수립 신호 해제
    pub fn begin(&self, mode: Mode, base: SeqId) {
        self.set_mode(mode);
        self.reset(base, base);
        self.established.send_replace(false);
        self.stats.lock().reset();
    }

    /// 두 윈도우와 기준 ID 재설정
    pub fn reset(&self, tx_base: SeqId, rx_base: SeqId) {
        {
            let mut tx = self.tx.lock();
            tx.window.reset(tx_base);
            tx.pending_handshake = None;
            tx.established_id = None;
            tx.stalled = false;
        }
        let mut rx = self.rx.lock();
        rx.window.reset(rx_base);
        rx.accepted_handshake = None;
    }

    /// 송신/수신 큐 비우기
    pub fn clear_queues(&self) {
        let dropped = self.outbound_rx.try_iter().count() + self.inbound_rx.try_iter().count();
        if dropped > 0 {
            debug!("큐 정리: {}개 패킷 폐기", dropped);
        }
    }

    // ===== 애플리케이션 인터페이스 =====

    /// 송신 큐에 추가 (가득 차면 대기)
    pub fn enqueue(&self, packet: Packet) -> Result<()> {
        self.outbound_tx
            .send(packet)
            .map_err(|_| Error::ChannelClosed)
    }

    /// 송신 큐에 추가 (가득 차면 실패)
    pub fn try_enqueue(&self, packet: Packet) -> Result<()> {
        match self.outbound_tx.try_send(packet) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(Error::QueueFull),
            Err(TrySendError::Disconnected(_)) => Err(Error::ChannelClosed),
        }
    }

    pub fn try_receive(&self) -> Option<Packet> {
        self.inbound_rx.try_recv().ok()
    }

    pub fn has_pending(&self) -> bool {
        !self.inbound_rx.is_empty()
    }

    pub fn stats(&self) -> LinkStats {
        self.stats.lock().clone()
    }

    pub fn window_status(&self) -> WindowStatus {
        let mode = self.mode();
        let (tx_base, tx_next_seq, in_flight, unacked) = {
            let tx = self.tx.lock();
            (
                tx.window.base(),
                tx.window.next_seq(),
                tx.window.in_flight(),
                tx.window.pending(),
            )
        };
        let rx_base = self.rx.lock().window.base();

        WindowStatus {
            mode,
            window_size: self.config.window_size,
            tx_base,
            tx_next_seq,
            in_flight,
            unacked,
            rx_base,
            outbound_queued: self.outbound_rx.len(),
            inbound_queued: self.inbound_rx.len(),
        }
    }

    // ===== 송신 경로 =====

    /// 송신 루프 1회: 재전송 스윕 후 송신 큐에서 하나를 꺼내 처리
    ///
    /// 진행이 있었으면 true (호출자는 바로 다시 돌고, false면 잠시 쉰다)
    pub fn egress_step(&self, now: Instant) -> bool {
        let targets = self.active_mediums();
        let mut progressed = false;

        let due = self
            .tx
            .lock()
            .window
            .due_for_retransmit(now, self.config.tx_timeout());
        for packet in due {
            debug!("재전송: {:?} ID {}", packet.kind, packet.id);
            self.transmit(&packet, &targets);
            self.stats.lock().retransmissions += 1;
            progressed = true;
        }

        match self.outbound_rx.try_recv() {
            Ok(packet) => self.admit(packet, now, &targets) || progressed,
            Err(_) => progressed,
        }
    }

    fn admit(&self, mut packet: Packet, now: Instant, targets: &[Arc<dyn Medium>]) -> bool {
        if self.mode() == Mode::Handshake && packet.kind != PacketType::Handshake {
            debug!("핸드쉐이크 모드: {:?} 패킷 폐기", packet.kind);
            return true;
        }

        let simple = all_reliable(targets)
            || self.is_unreliable_class(packet.kind)
            || packet.kind.is_ack()
            || packet.kind == PacketType::HandshakeResponse;

        let mut tx = self.tx.lock();

        if simple {
            // 윈도우 없이 전송: ID만 찍고 next_seq는 그대로
            packet.id = tx.window.next_seq();
            packet.seal();
            if packet.kind == PacketType::Handshake {
                tx.pending_handshake = Some(packet.id);
            }
            drop(tx);

            debug!("단순 전송: {:?} ID {}", packet.kind, packet.id);
            self.transmit(&packet, targets);
            self.stats.lock().simple_sent += 1;
            return true;
        }

        let admitted = tx.window.admit(packet.clone(), now);
        match admitted {
            Ok(sealed) => {
                tx.stalled = false;
                if sealed.kind == PacketType::Handshake {
                    tx.pending_handshake = Some(sealed.id);
                }
                drop(tx);

                debug!("윈도우 전송: {:?} ID {}", sealed.kind, sealed.id);
                self.transmit(&sealed, targets);
                self.stats.lock().reliable_sent += 1;
                true
            }
            Err(FlowControlError::OutsideWindow { .. }) => {
                let first = !tx.stalled;
                tx.stalled = true;
                let in_flight = tx.window.in_flight();
                drop(tx);

                if first {
                    warn!("송신 윈도우 가득 참 ({}개 전송 중): 송신 큐 뒤로 되돌림", in_flight);
                }
                self.requeue(packet);
                false
            }
            Err(e) => {
                drop(tx);
                warn!("흐름 제어 에러: {}", e);
                self.stats.lock().flow_errors += 1;
                self.requeue(packet);
                false
            }
        }
    }

    fn requeue(&self, packet: Packet) {
        match self.outbound_tx.try_send(packet) {
            Ok(()) => self.stats.lock().requeued += 1,
            Err(TrySendError::Full(packet)) | Err(TrySendError::Disconnected(packet)) => {
                warn!("송신 큐 가득 참: {:?} 패킷 폐기", packet.kind);
                self.stats.lock().queue_drops += 1;
            }
        }
    }

    fn is_unreliable_class(&self, kind: PacketType) -> bool {
        match kind {
            PacketType::Image => !self.config.reliable_img,
            PacketType::MtrCmd => !self.config.reliable_mtr_cmd,
            _ => false,
        }
    }

    /// 현재 모드의 송신 대상 매체
    fn active_mediums(&self) -> Vec<Arc<dyn Medium>> {
        match self.mode().medium() {
            None => self.mediums.iter().cloned().collect(),
            Some(kind) => self.mediums.get(kind).cloned().into_iter().collect(),
        }
    }

    fn transmit(&self, packet: &Packet, targets: &[Arc<dyn Medium>]) {
        let frame = packet.encode();
        for medium in targets {
            match medium.write(&frame) {
                Ok(()) => self.stats.lock().record_sent(frame.len()),
                Err(e) => {
                    warn!("{} 매체 쓰기 실패: {}", medium.kind(), e);
                    self.stats.lock().write_errors += 1;
                }
            }
        }
    }

    /// 패킷이 도착한 매체로 응답 (알 수 없으면 현재 모드의 매체)
    fn reply(&self, packet: Packet, via: Option<MediumKind>) {
        let targets = match via.and_then(|kind| self.mediums.get(kind)) {
            Some(medium) => vec![medium.clone()],
            None => self.active_mediums(),
        };
        self.transmit(&packet, &targets);
    }

    // ===== 수신 경로 =====

    /// 수신 루프 1회: 설정된 모든 매체에서 프레임을 하나씩 읽어 처리
    pub fn ingress_step(&self) -> bool {
        let mut progressed = self.release_ready();
        for medium in self.mediums.iter() {
            if let Some(frame) = medium.read_next() {
                self.handle_frame(&frame, medium.kind(), medium.is_reliable());
                progressed = true;
            }
        }
        progressed
    }

    fn handle_frame(&self, frame: &[u8], kind: MediumKind, reliable_medium: bool) {
        let mut packet = match Packet::decode(frame) {
            Ok(packet) => packet,
            Err(e) => {
                debug!("형식 에러로 폐기 ({}): {}", kind, e);
                self.stats.lock().format_errors += 1;
                return;
            }
        };
        if let Err(e) = packet.verify() {
            debug!("패킷 폐기 (ID {}, {}): {}", packet.id, kind, e);
            self.stats.lock().checksum_errors += 1;
            return;
        }

        packet.medium = Some(kind);
        self.stats.lock().record_received(frame.len());

        match packet.kind {
            k if k.is_ack() => self.handle_ack(&packet),
            PacketType::Handshake => self.handle_handshake(packet),
            PacketType::HandshakeResponse => self.handle_handshake_response(packet),
            _ if self.mode() == Mode::Handshake => {
                debug!("세션 수립 전 {:?} ID {} 폐기", packet.kind, packet.id);
                self.stats.lock().stale_dropped += 1;
            }
            _ if reliable_medium || self.is_unreliable_class(packet.kind) => self.deliver(packet),
            _ => self.handle_reliable(packet),
        }
    }

    fn inbound_room(&self) -> usize {
        self.config
            .inbound_capacity
            .saturating_sub(self.inbound_tx.len())
    }

    /// 수신 큐가 가득 차 선두에 남겨 둔 패킷을 여유만큼 전달
    fn release_ready(&self) -> bool {
        let ready = {
            let mut rx = self.rx.lock();
            if !rx.window.has_ready() {
                return false;
            }
            let room = self.inbound_room();
            rx.window.sweep(room)
        };

        let progressed = !ready.is_empty();
        for packet in ready {
            self.deliver(packet);
        }
        progressed
    }

    fn refuse_full(&self, id: SeqId) -> Verdict {
        debug!("수신 큐 가득 참: ID {} 무응답 폐기", id);
        self.stats.lock().queue_drops += 1;
        Verdict::Drop
    }

    fn handle_reliable(&self, packet: Packet) {
        let id = packet.id;
        let via = packet.medium;
        let ordered = self.config.ordered_delivery;
        let mut delivered = Vec::new();

        let verdict = {
            let mut rx = self.rx.lock();
            // 수신 큐 생산자는 수신 루프 하나뿐이므로 여기서 본 여유는 줄지 않는다
            let room = self.inbound_room();
            match rx.window.classify(id) {
                // 수신 큐 여유를 기다리며 선두에 남아 있는 패킷의 재전송
                Placement::InOrder if rx.window.is_occupied(0) => {
                    self.stats.lock().duplicates += 1;
                    Verdict::Ack(PacketType::Dack)
                }
                // 곧바로 전달할 패킷인데 수신 큐에 자리가 없으면 ACK 없이 버려 재전송에 맡긴다
                Placement::InOrder if room == 0 => self.refuse_full(id),
                Placement::InWindow(index) if room == 0 && !ordered && !rx.window.is_occupied(index) => {
                    self.refuse_full(id)
                }
                Placement::InOrder => match rx.window.store(0, RxSlot::Buffered(packet)) {
                    Ok(()) => {
                        delivered = rx.window.sweep(room);
                        Verdict::Ack(PacketType::Cack)
                    }
                    Err(e) => {
                        warn!("수신 윈도우 에러: {}", e);
                        Verdict::Ack(PacketType::Dack)
                    }
                },
                Placement::InWindow(index) if rx.window.is_occupied(index) => {
                    self.stats.lock().duplicates += 1;
                    Verdict::Ack(PacketType::Dack)
                }
                Placement::InWindow(index) => {
                    let slot = if ordered {
                        RxSlot::Buffered(packet)
                    } else {
                        delivered.push(packet);
                        RxSlot::Delivered
                    };
                    match rx.window.store(index, slot) {
                        Ok(()) => Verdict::Ack(PacketType::Sack),
                        Err(e) => {
                            warn!("수신 윈도우 에러: {}", e);
                            Verdict::Ack(PacketType::Dack)
                        }
                    }
                }
                Placement::Lookback => {
                    self.stats.lock().duplicates += 1;
                    Verdict::Ack(PacketType::Dack)
                }
                Placement::Stale => {
                    debug!("윈도우와 무관한 ID {} 폐기 (rx_base {})", id, rx.window.base());
                    self.stats.lock().stale_dropped += 1;
                    Verdict::Drop
                }
            }
        };

        for packet in delivered {
            self.deliver(packet);
        }

        if let Verdict::Ack(kind) = verdict {
            debug!("{:?} 전송: ID {}", kind, id);
            self.reply(Packet::control(kind, id), via);
            self.stats.lock().acks_sent += 1;
        }
    }

    fn handle_ack(&self, ack: &Packet) {
        self.stats.lock().acks_received += 1;

        let (result, base) = {
            let mut tx = self.tx.lock();
            let result = match ack.kind {
                PacketType::Cack => tx.window.cumulative_ack(ack.id).map(|_| ()),
                _ => tx.window.mark_acked(ack.id),
            };
            tx.window.advance_acked();
            (result, tx.window.base())
        };

        match result {
            Ok(()) => debug!("{:?} ID {} 처리: tx_base {}", ack.kind, ack.id, base),
            Err(e) => {
                warn!("{:?} 처리 실패: {}", ack.kind, e);
                self.stats.lock().flow_errors += 1;
            }
        }
    }

    /// HANDSHAKE 수신 (응답자)
    fn handle_handshake(&self, packet: Packet) {
        let id = packet.id;
        let via = packet.medium;

        // 재전송된 HANDSHAKE: 그 사이 상대의 데이터가 없었으면 응답만 다시 보냄
        let duplicate = {
            let rx = self.rx.lock();
            rx.accepted_handshake == Some(id) && rx.window.base() == seq_add(id, 1)
        };
        if duplicate {
            debug!("중복 HANDSHAKE ID {}: 응답 재전송", id);
            self.adopt_medium(via);
            self.reply(Packet::control(PacketType::HandshakeResponse, id), via);
            return;
        }

        info!("HANDSHAKE 수신 (ID {}, {:?}): 세션 재설정", id, via);
        self.reset(id, seq_add(id, 1));
        self.rx.lock().accepted_handshake = Some(id);
        self.adopt_medium(via);
        self.reply(Packet::control(PacketType::HandshakeResponse, id), via);

        self.stats.lock().handshakes += 1;
        self.deliver(packet);
        self.established.send_replace(true);
    }

    /// HANDSHAKE_RESPONSE 수신 (개시자)
    fn handle_handshake_response(&self, packet: Packet) {
        let id = packet.id;
        let via = packet.medium;

        {
            let mut tx = self.tx.lock();
            if tx.established_id == Some(id) {
                drop(tx);
                debug!("중복 HANDSHAKE_RESPONSE ID {}", id);
                self.adopt_medium(via);
                return;
            }
            if tx.pending_handshake != Some(id) {
                drop(tx);
                warn!("{}", FlowControlError::StaleHandshake(id));
                self.stats.lock().flow_errors += 1;
                return;
            }
            // 신뢰 매체로 보낸 HANDSHAKE는 윈도우에 없다
            let _ = tx.window.mark_acked(id);
        }

        info!("세션 수립 (ID {}, {:?})", id, via);
        self.reset(seq_add(id, 1), id);
        self.tx.lock().established_id = Some(id);
        self.adopt_medium(via);

        self.stats.lock().handshakes += 1;
        self.deliver(packet);
        self.established.send_replace(true);
    }

    /// 도착 매체를 활성 모드로 채택 (Radio가 이미 활성이면 Satellite보다 우선)
    fn adopt_medium(&self, via: Option<MediumKind>) {
        let Some(kind) = via else {
            return;
        };
        let mut mode = self.mode.write();
        let next = match (*mode, kind) {
            (Mode::Radio, MediumKind::Satellite) => Mode::Radio,
            _ => Mode::from(kind),
        };
        if *mode != next {
            info!("모드 변경: {} → {}", *mode, next);
            *mode = next;
        }
    }

    fn deliver(&self, packet: Packet) {
        match self.inbound_tx.try_send(packet) {
            Ok(()) => self.stats.lock().delivered += 1,
            Err(TrySendError::Full(packet)) | Err(TrySendError::Disconnected(packet)) => {
                warn!("수신 큐 가득 참: {:?} ID {} 폐기", packet.kind, packet.id);
                self.stats.lock().queue_drops += 1;
            }
        }
    }
}

fn all_reliable(mediums: &[Arc<dyn Medium>]) -> bool {
    !mediums.is_empty() && mediums.iter().all(|m| m.is_reliable())
}
