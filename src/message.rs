//! 애플리케이션 메시지 정의
//!
//! 패킷 페이로드에 실리는 구조화된 메시지. bincode 기본 인코딩(리틀엔디언,
//! 고정 길이 정수)을 쓰므로 모터 명령은 `f32 ‖ f32 ‖ u8` 9바이트가 된다.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::medium::MediumKind;
use crate::packet::{Packet, PacketType};
use crate::{Error, Result, PROTOCOL_VERSION};

/// 패킷 타입에 대응하는 페이로드
pub trait Payload: Serialize + DeserializeOwned {
    /// 이 메시지를 싣는 패킷 타입
    const KIND: PacketType;

    /// 패킷으로 변환
    fn to_packet(&self) -> Result<Packet> {
        Packet::new(Self::KIND, bincode::serialize(self)?)
    }

    /// 패킷에서 복원
    fn from_packet(packet: &Packet) -> Result<Self> {
        if packet.kind != Self::KIND {
            return Err(Error::UnexpectedType {
                expected: Self::KIND,
                got: packet.kind,
            });
        }
        Ok(bincode::deserialize(&packet.payload)?)
    }
}

/// 좌/우 모터 출력 명령
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MotorCommand {
    /// 좌측 모터 (-1.0 ~ 1.0)
    pub left: f32,

    /// 우측 모터 (-1.0 ~ 1.0)
    pub right: f32,

    /// 예약
    pub flags: u8,
}

impl MotorCommand {
    pub fn drive(left: f32, right: f32) -> Self {
        Self {
            left: left.clamp(-1.0, 1.0),
            right: right.clamp(-1.0, 1.0),
            flags: 0,
        }
    }

    pub fn stop() -> Self {
        Self::drive(0.0, 0.0)
    }
}

impl Payload for MotorCommand {
    const KIND: PacketType = PacketType::MtrCmd;
}

/// 자율 주행 목표 좌표
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MoveTo {
    pub latitude: f32,
    pub longitude: f32,
    pub flags: u8,
}

impl Payload for MoveTo {
    const KIND: PacketType = PacketType::GpsCmd;
}

/// 실시간 조종 요청 (1바이트: 0 또는 1)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlRequest {
    pub enable: bool,
}

impl Payload for ControlRequest {
    const KIND: PacketType = PacketType::CtrlReq;
}

/// GPS + 지자기 측정값 (로봇 → 랜드베이스)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GpsFix {
    pub latitude: f64,
    pub longitude: f64,

    /// 방위각 (도)
    pub heading: f32,
}

impl Payload for GpsFix {
    const KIND: PacketType = PacketType::GpsData;
}

/// 통신 매체 변경 요청
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommChange {
    pub medium: MediumKind,
}

impl Payload for CommChange {
    const KIND: PacketType = PacketType::CommChange;
}

/// Heartbeat 메시지
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatMessage {
    pub version: u8,
    pub sequence: u64,
    pub timestamp_us: u64,
}

impl HeartbeatMessage {
    pub fn new(sequence: u64) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            sequence,
            timestamp_us: now_us(),
        }
    }

    /// 보낸 시각부터 지금까지 (마이크로초, 같은 호스트 시계 기준)
    pub fn age_us(&self) -> u64 {
        now_us().saturating_sub(self.timestamp_us)
    }
}

impl Payload for HeartbeatMessage {
    const KIND: PacketType = PacketType::Heartbeat;
}

/// 현재 시각 (microseconds since epoch)
pub fn now_us() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_micros() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_motor_command_wire_layout() {
        let packet = MotorCommand::drive(0.5, -2.0).to_packet().unwrap();
        assert_eq!(packet.kind, PacketType::MtrCmd);

        let mut expected = Vec::new();
        expected.extend_from_slice(&0.5f32.to_le_bytes());
        expected.extend_from_slice(&(-1.0f32).to_le_bytes());
        expected.push(0);
        assert_eq!(&packet.payload[..], &expected[..]);
    }

    #[test]
    fn test_control_request_is_one_byte() {
        let packet = ControlRequest { enable: true }.to_packet().unwrap();
        assert_eq!(&packet.payload[..], &[0x01]);
        assert_eq!(
            ControlRequest::from_packet(&packet).unwrap(),
            ControlRequest { enable: true }
        );
    }

    #[test]
    fn test_heartbeat_through_packet() {
        let beat = HeartbeatMessage::new(42);
        let packet = beat.to_packet().unwrap();
        let decoded = HeartbeatMessage::from_packet(&packet).unwrap();
        assert_eq!(decoded.sequence, 42);
        assert_eq!(decoded.version, PROTOCOL_VERSION);
    }

    #[test]
    fn test_wrong_kind_rejected() {
        let packet = MotorCommand::stop().to_packet().unwrap();
        assert!(matches!(
            GpsFix::from_packet(&packet),
            Err(Error::UnexpectedType {
                expected: PacketType::GpsData,
                got: PacketType::MtrCmd
            })
        ));
    }

    #[test]
    fn test_truncated_payload_is_error() {
        let packet = Packet::new(PacketType::GpsData, vec![0u8; 3]).unwrap();
        assert!(matches!(
            GpsFix::from_packet(&packet),
            Err(Error::Serialization(_))
        ));
    }
}
