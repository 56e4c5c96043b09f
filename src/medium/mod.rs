//! 물리 매체 추상화
//!
//! 엔진은 모든 매체를 같은 인터페이스로 다룬다. 매체는 동기 워드 탐색,
//! 체크섬 검증, 손상 데이터 폐기를 내부에서 처리하고 검증된 프레임만 돌려준다.

pub mod link;
pub mod loopback;
pub mod udp;

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::Result;

pub use link::{LinkFaults, LinkMedium};
pub use loopback::LoopbackMedium;
pub use udp::UdpMedium;

/// 매체 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediumKind {
    /// 무선 모뎀 (저지연, 손실 있음)
    Radio,
    /// 위성 모뎀 (저장 후 전달)
    Satellite,
    /// 로컬 테스트용 루프백
    Debug,
}

impl fmt::Display for MediumKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediumKind::Radio => write!(f, "radio"),
            MediumKind::Satellite => write!(f, "satellite"),
            MediumKind::Debug => write!(f, "debug"),
        }
    }
}

/// 매체 인터페이스
///
/// 모든 메서드는 짧게 반환해야 한다. `read_next`는 절대 무한 대기하지 않는다.
pub trait Medium: Send + Sync {
    /// 매체 열기 (재시작 가능)
    fn start(&self) -> Result<()>;

    /// 매체 닫기
    fn close(&self);

    /// 직렬화된 패킷 한 개 쓰기
    fn write(&self, frame: &[u8]) -> Result<()>;

    /// 검증된 다음 프레임 (없으면 None, 논블로킹)
    fn read_next(&self) -> Option<Bytes>;

    /// 매체 자체가 전달을 보장하는지 여부
    fn is_reliable(&self) -> bool;

    fn kind(&self) -> MediumKind;
}

/// 세션이 사용할 수 있는 매체 묶음 (종류별 최대 하나)
#[derive(Clone, Default)]
pub struct MediumSet {
    radio: Option<Arc<dyn Medium>>,
    satellite: Option<Arc<dyn Medium>>,
    debug: Option<Arc<dyn Medium>>,
}

impl MediumSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// 매체 추가 (같은 종류는 교체)
    pub fn with(mut self, medium: Arc<dyn Medium>) -> Self {
        match medium.kind() {
            MediumKind::Radio => self.radio = Some(medium),
            MediumKind::Satellite => self.satellite = Some(medium),
            MediumKind::Debug => self.debug = Some(medium),
        }
        self
    }

    pub fn get(&self, kind: MediumKind) -> Option<&Arc<dyn Medium>> {
        match kind {
            MediumKind::Radio => self.radio.as_ref(),
            MediumKind::Satellite => self.satellite.as_ref(),
            MediumKind::Debug => self.debug.as_ref(),
        }
    }

    /// 설정된 모든 매체 (radio, satellite, debug 순)
    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Medium>> {
        self.radio
            .iter()
            .chain(self.satellite.iter())
            .chain(self.debug.iter())
    }

    pub fn is_empty(&self) -> bool {
        self.iter().next().is_none()
    }

    pub fn kinds(&self) -> Vec<MediumKind> {
        self.iter().map(|m| m.kind()).collect()
    }
}

impl fmt::Debug for MediumSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.kinds()).finish()
    }
}
