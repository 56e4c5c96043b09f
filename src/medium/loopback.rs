//! 디버그 루프백 매체
//!
//! 쓰기는 메모리 버퍼에 쌓이고, 읽기는 테스트가 주입한 프레임을 꺼낸다.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use parking_lot::Mutex;

use super::{Medium, MediumKind};
use crate::packet::Packet;
use crate::{Error, Result};

/// 메모리 루프백 매체
#[derive(Debug)]
pub struct LoopbackMedium {
    kind: MediumKind,
    reliable: bool,
    open: AtomicBool,

    /// 전송된 프레임
    sent: Mutex<Vec<Bytes>>,

    /// 수신 대기 프레임
    inbox: Mutex<VecDeque<Bytes>>,
}

impl LoopbackMedium {
    pub fn new() -> Self {
        Self::with_kind(MediumKind::Debug)
    }

    /// 다른 매체 종류로 위장 (핸드쉐이크/모드 테스트용)
    pub fn with_kind(kind: MediumKind) -> Self {
        Self {
            kind,
            reliable: false,
            open: AtomicBool::new(false),
            sent: Mutex::new(Vec::new()),
            inbox: Mutex::new(VecDeque::new()),
        }
    }

    pub fn reliable(mut self, reliable: bool) -> Self {
        self.reliable = reliable;
        self
    }

    /// 수신 프레임 주입
    pub fn inject(&self, packet: &Packet) {
        self.inject_raw(packet.encode());
    }

    /// 원시 바이트 주입 (손상 프레임 테스트용)
    pub fn inject_raw(&self, frame: impl Into<Bytes>) {
        self.inbox.lock().push_back(frame.into());
    }

    /// 지금까지 전송된 패킷 (디코드 실패 프레임은 제외)
    pub fn sent(&self) -> Vec<Packet> {
        self.sent
            .lock()
            .iter()
            .filter_map(|frame| Packet::decode(frame).ok())
            .collect()
    }

    /// 전송 버퍼를 비우고 반환
    pub fn take_sent(&self) -> Vec<Packet> {
        std::mem::take(&mut *self.sent.lock())
            .iter()
            .filter_map(|frame| Packet::decode(frame).ok())
            .collect()
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}

impl Default for LoopbackMedium {
    fn default() -> Self {
        Self::new()
    }
}

impl Medium for LoopbackMedium {
    fn start(&self) -> Result<()> {
        self.open.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
    }

    fn write(&self, frame: &[u8]) -> Result<()> {
        if !self.is_open() {
            return Err(Error::MediumUnavailable(format!("{} (closed)", self.kind)));
        }
        self.sent.lock().push(Bytes::copy_from_slice(frame));
        Ok(())
    }

    fn read_next(&self) -> Option<Bytes> {
        if !self.is_open() {
            return None;
        }
        self.inbox.lock().pop_front()
    }

    fn is_reliable(&self) -> bool {
        self.reliable
    }

    fn kind(&self) -> MediumKind {
        self.kind
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::PacketType;

    #[test]
    fn test_closed_loopback_rejects_io() {
        let medium = LoopbackMedium::new();
        assert!(medium.write(b"abc").is_err());

        medium.inject(&Packet::control(PacketType::Sack, 1));
        assert!(medium.read_next().is_none());

        medium.start().unwrap();
        assert!(medium.read_next().is_some());
    }

    #[test]
    fn test_sent_frames_are_recorded() {
        let medium = LoopbackMedium::new();
        medium.start().unwrap();
        medium
            .write(&Packet::control(PacketType::Cack, 4).encode())
            .unwrap();

        let sent = medium.take_sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].kind, PacketType::Cack);
        assert!(medium.sent().is_empty());
    }
}
