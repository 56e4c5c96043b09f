//! 패킷 정의와 와이어 코덱
//!
//! ```text
//! offset 0  : SYNC_WORD    4 bytes
//! offset 4  : type         1 byte
//! offset 5  : sequence_id  3 bytes (big-endian, mod 2^24)
//! offset 8  : checksum     2 bytes (one's-complement Internet checksum)
//! offset 10 : length       2 bytes (big-endian)
//! offset 12 : payload      length bytes
//! ```

use bytes::Bytes;

use crate::error::FormatError;
use crate::medium::MediumKind;
use crate::{Error, Result, MAX_ID, MAX_PAYLOAD_SIZE, MIN_PACKET_SIZE, SYNC_WORD};

/// 시퀀스 ID (하위 24비트만 사용)
pub type SeqId = u32;

const OFF_TYPE: usize = 4;
const OFF_ID: usize = 5;
const OFF_CHECKSUM: usize = 8;
const OFF_LENGTH: usize = 10;

/// 패킷 타입
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketType {
    Null = 0x00,
    Text = 0x01,
    /// 로봇 상태 정보 (로그용)
    Info = 0x02,
    /// 치명적 에러 정보
    Error = 0x03,
    Handshake = 0x04,
    HandshakeResponse = 0x05,
    /// 선택적 ACK
    Sack = 0x06,
    /// 모터 명령
    MtrCmd = 0x07,
    /// GPS + 지자기 데이터 (로봇 → 랜드베이스)
    GpsData = 0x08,
    GpsCmd = 0x09,
    Image = 0x0A,
    /// 누적 ACK
    Cack = 0x0B,
    /// 중복 ACK
    Dack = 0x0C,
    MtrSwitchCmd = 0x0D,
    CtrlReq = 0x0E,
    HeartbeatReq = 0x0F,
    Udp = 0x10,
    Heartbeat = 0x11,
    /// 통신 매체 변경 요청
    CommChange = 0x12,
}

impl PacketType {
    /// ACK 계열 여부 (SACK/CACK/DACK)
    pub fn is_ack(self) -> bool {
        matches!(self, PacketType::Sack | PacketType::Cack | PacketType::Dack)
    }

    /// 핸드쉐이크 계열 여부
    pub fn is_handshake(self) -> bool {
        matches!(self, PacketType::Handshake | PacketType::HandshakeResponse)
    }
}

impl TryFrom<u8> for PacketType {
    type Error = FormatError;

    fn try_from(tag: u8) -> std::result::Result<Self, FormatError> {
        let kind = match tag {
            0x00 => PacketType::Null,
            0x01 => PacketType::Text,
            0x02 => PacketType::Info,
            0x03 => PacketType::Error,
            0x04 => PacketType::Handshake,
            0x05 => PacketType::HandshakeResponse,
            0x06 => PacketType::Sack,
            0x07 => PacketType::MtrCmd,
            0x08 => PacketType::GpsData,
            0x09 => PacketType::GpsCmd,
            0x0A => PacketType::Image,
            0x0B => PacketType::Cack,
            0x0C => PacketType::Dack,
            0x0D => PacketType::MtrSwitchCmd,
            0x0E => PacketType::CtrlReq,
            0x0F => PacketType::HeartbeatReq,
            0x10 => PacketType::Udp,
            0x11 => PacketType::Heartbeat,
            0x12 => PacketType::CommChange,
            other => return Err(FormatError::UnknownType(other)),
        };
        Ok(kind)
    }
}

/// 프로토콜 메시지 단위
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// 패킷 타입
    pub kind: PacketType,

    /// 시퀀스 ID (엔진이 할당)
    pub id: SeqId,

    /// 체크섬 (직렬화된 패킷 전체, 체크섬 필드는 0으로 계산)
    pub checksum: u16,

    /// 페이로드 (불변 공유 버퍼이므로 윈도우에 보관된 사본은 애플리케이션이 변경할 수 없음)
    pub payload: Bytes,

    /// 수신/송신 매체 (직렬화되지 않음)
    pub medium: Option<MediumKind>,
}

impl Packet {
    /// 새 패킷 생성
    pub fn new(kind: PacketType, payload: impl Into<Bytes>) -> Result<Self> {
        let payload = payload.into();
        if payload.len() > MAX_PAYLOAD_SIZE {
            return Err(FormatError::PayloadTooLarge(payload.len()).into());
        }

        Ok(Self {
            kind,
            id: 0,
            checksum: 0,
            payload,
            medium: None,
        })
    }

    /// 페이로드 없는 제어 패킷 (ACK, 핸드쉐이크 응답)
    pub fn control(kind: PacketType, id: SeqId) -> Self {
        let mut packet = Self {
            kind,
            id: id % MAX_ID,
            checksum: 0,
            payload: Bytes::new(),
            medium: None,
        };
        packet.seal();
        packet
    }

    /// 텍스트 패킷
    pub fn text(text: &str) -> Result<Self> {
        Self::new(PacketType::Text, Bytes::copy_from_slice(text.as_bytes()))
    }

    /// 시퀀스 ID 지정
    pub fn with_id(mut self, id: SeqId) -> Self {
        self.id = id % MAX_ID;
        self
    }

    /// 페이로드 길이
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// 직렬화된 크기
    pub fn wire_len(&self) -> usize {
        MIN_PACKET_SIZE + self.payload.len()
    }

    fn header(&self, checksum: u16) -> [u8; MIN_PACKET_SIZE] {
        let mut header = [0u8; MIN_PACKET_SIZE];
        header[..OFF_TYPE].copy_from_slice(&SYNC_WORD);
        header[OFF_TYPE] = self.kind as u8;
        header[OFF_ID..OFF_CHECKSUM].copy_from_slice(&(self.id % MAX_ID).to_be_bytes()[1..]);
        header[OFF_CHECKSUM..OFF_LENGTH].copy_from_slice(&checksum.to_be_bytes());
        header[OFF_LENGTH..].copy_from_slice(&(self.payload.len() as u16).to_be_bytes());
        header
    }

    /// 체크섬 재계산 (체크섬 필드를 0으로 간주)
    pub fn calc_checksum(&self) -> u16 {
        // 헤더 길이가 짝수이므로 페이로드도 16비트 워드 경계에서 시작한다
        let sum = ones_sum(&self.header(0), 0);
        fold(ones_sum(&self.payload, sum))
    }

    /// 체크섬 필드 갱신
    pub fn seal(&mut self) {
        self.checksum = self.calc_checksum();
    }

    /// 저장된 체크섬 검증
    pub fn verify(&self) -> Result<()> {
        let got = self.calc_checksum();
        if got != self.checksum {
            return Err(Error::ChecksumMismatch {
                expected: self.checksum,
                got,
            });
        }
        Ok(())
    }

    /// 바이트로 직렬화 (저장된 체크섬 그대로)
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.wire_len());
        buf.extend_from_slice(&self.header(self.checksum));
        buf.extend_from_slice(&self.payload);
        buf
    }

    /// 바이트에서 역직렬화 (뒤따르는 바이트는 무시)
    pub fn decode(bytes: &[u8]) -> std::result::Result<Self, FormatError> {
        Self::decode_prefix(bytes).map(|(packet, _)| packet)
    }

    /// 앞부분의 패킷 하나를 역직렬화하고 사용한 바이트 수를 함께 반환
    pub fn decode_prefix(bytes: &[u8]) -> std::result::Result<(Self, usize), FormatError> {
        if bytes.len() < MIN_PACKET_SIZE {
            return Err(FormatError::TooShort {
                min: MIN_PACKET_SIZE,
                got: bytes.len(),
            });
        }

        if bytes[..OFF_TYPE] != SYNC_WORD {
            return Err(FormatError::BadSyncWord);
        }

        let kind = PacketType::try_from(bytes[OFF_TYPE])?;
        let id = u32::from_be_bytes([0, bytes[OFF_ID], bytes[OFF_ID + 1], bytes[OFF_ID + 2]]);
        let checksum = u16::from_be_bytes([bytes[OFF_CHECKSUM], bytes[OFF_CHECKSUM + 1]]);
        let length = u16::from_be_bytes([bytes[OFF_LENGTH], bytes[OFF_LENGTH + 1]]) as usize;

        let available = bytes.len() - MIN_PACKET_SIZE;
        if length > available {
            return Err(FormatError::Truncated {
                declared: length,
                available,
            });
        }

        let end = MIN_PACKET_SIZE + length;
        let packet = Self {
            kind,
            id,
            checksum,
            payload: Bytes::copy_from_slice(&bytes[MIN_PACKET_SIZE..end]),
            medium: None,
        };

        Ok((packet, end))
    }
}

/// 직렬화된 프레임의 체크섬 (체크섬 필드는 0으로 간주)
pub fn frame_checksum(frame: &[u8]) -> u16 {
    if frame.len() < OFF_LENGTH {
        return internet_checksum(frame);
    }
    let sum = ones_sum(&frame[..OFF_CHECKSUM], 0);
    fold(ones_sum(&frame[OFF_LENGTH..], sum))
}

/// Internet checksum (RFC 1071)
///
/// 빅엔디언 16비트 워드 합을 캐리 순환으로 접고 1의 보수를 취한다.
/// 홀수 길이의 마지막 바이트는 오른쪽에 0을 채운다.
pub fn internet_checksum(data: &[u8]) -> u16 {
    fold(ones_sum(data, 0))
}

fn ones_sum(data: &[u8], mut sum: u64) -> u64 {
    let mut words = data.chunks_exact(2);
    for word in &mut words {
        sum += u64::from(u16::from_be_bytes([word[0], word[1]]));
    }
    if let [last] = words.remainder() {
        sum += u64::from(*last) << 8;
    }
    sum
}

fn fold(mut sum: u64) -> u16 {
    while sum >> 16 != 0 {
        sum = (sum & 0xffff) + (sum >> 16);
    }
    !(sum as u16)
}
