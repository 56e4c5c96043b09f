//! 전송 세션
//!
//! 애플리케이션이 쓰는 핸들. 송신 루프와 수신 루프를 tokio 태스크로 띄우고,
//! 애플리케이션과는 송신/수신 큐로만 주고받는다.
//!
//! ```text
//! send() ─▶ outbound ─▶ [egress loop] ─▶ Medium ~~~ Medium ─▶ [ingress loop] ─▶ inbound ─▶ try_receive()
//! ```

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rand::Rng;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::Role;
use crate::engine::{Engine, Mode, WindowStatus};
use crate::medium::{Medium, MediumSet};
use crate::packet::{Packet, PacketType};
use crate::stats::LinkStats;
use crate::{Config, Error, Result, MAX_ID};

/// 전송 세션
pub struct Session {
    engine: Arc<Engine>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl Session {
    /// 새 세션 생성 (정지 상태)
    pub fn new(config: Config, mediums: MediumSet) -> Result<Self> {
        config.validate()?;
        if mediums.is_empty() {
            return Err(Error::MediumUnavailable("설정된 매체 없음".into()));
        }

        Ok(Self {
            engine: Arc::new(Engine::new(config, mediums)),
            workers: Mutex::new(Vec::new()),
        })
    }

    pub fn config(&self) -> &Config {
        self.engine.config()
    }

    /// 세션 시작
    ///
    /// `Mode::Handshake`면 핸드쉐이크가 끝날 때까지(최대 `handshake_timeout`) 대기한다.
    /// 개시자는 HANDSHAKE를 보내고, 응답자는 상대의 HANDSHAKE를 기다린다.
    pub async fn start(&self, mode: Mode) -> Result<()> {
        if self.engine.is_running() {
            return Err(Error::AlreadyRunning);
        }

        let mediums = self.mediums_for(mode)?;
        for (index, medium) in mediums.iter().enumerate() {
            if let Err(e) = medium.start() {
                for opened in &mediums[..index] {
                    opened.close();
                }
                return Err(Error::MediumUnavailable(format!("{}: {}", medium.kind(), e)));
            }
        }

        let config = self.engine.config();
        let base = match mode {
            Mode::Handshake => config
                .initial_seq
                .unwrap_or_else(|| rand::thread_rng().gen_range(0..MAX_ID)),
            _ => config.initial_seq.unwrap_or(0),
        } % MAX_ID;

        self.engine.begin(mode, base);

        // 워커를 띄우기 전에 넣어야 실패 시 정리할 것이 매체뿐이다
        if mode == Mode::Handshake && config.role == Role::Initiator {
            if let Err(e) = self
                .engine
                .try_enqueue(Packet::control(PacketType::Handshake, base))
            {
                warn!("HANDSHAKE 큐잉 실패: {}", e);
                mediums.iter().for_each(|m| m.close());
                return Err(e);
            }
        }

        self.spawn_workers();
        info!("세션 시작: {} 모드, 기준 ID {}", mode, base);

        if mode != Mode::Handshake {
            return Ok(());
        }

        let mut established = self.engine.subscribe_established();
        let timeout = config.handshake_timeout();
        let done = matches!(
            tokio::time::timeout(timeout, established.wait_for(|up| *up)).await,
            Ok(Ok(_))
        );

        if done {
            info!("핸드쉐이크 완료: {} 모드", self.engine.mode());
            return Ok(());
        }

        warn!("핸드쉐이크 타임아웃 ({}ms)", config.handshake_timeout_ms);
        let _ = self.stop().await;
        Err(Error::HandshakeTimeout {
            timeout_ms: config.handshake_timeout_ms,
        })
    }

    /// 세션 정지: 두 루프가 끝날 때까지 기다린 뒤 매체를 닫는다
    pub async fn stop(&self) -> Result<()> {
        if !self.engine.is_running() {
            return Err(Error::NotRunning);
        }
        self.engine.set_running(false);

        let workers = std::mem::take(&mut *self.workers.lock());
        for worker in workers {
            if let Err(e) = worker.await {
                warn!("워커 종료 에러: {}", e);
            }
        }

        for medium in self.engine.mediums().iter() {
            medium.close();
        }

        info!("세션 정지");
        Ok(())
    }

    /// 재부팅: 정지 후 윈도우, 기준 ID, 두 큐를 비우고 다시 시작
    pub async fn reboot(&self, mode: Mode) -> Result<()> {
        info!("세션 재부팅: {} 모드", mode);
        if self.engine.is_running() {
            self.stop().await?;
        }
        self.engine.clear_queues();
        self.engine.reset(0, 0);
        self.start(mode).await
    }

    /// 송신 큐에 추가 (가득 차면 대기하므로 비동기 문맥에서는 `try_send` 권장)
    pub fn send(&self, packet: Packet) -> Result<()> {
        self.engine.enqueue(packet)
    }

    /// 송신 큐에 추가 (가득 차면 `QueueFull`)
    pub fn try_send(&self, packet: Packet) -> Result<()> {
        self.engine.try_enqueue(packet)
    }

    /// 송신 큐에 자리가 날 때까지 비동기로 대기
    pub async fn send_async(&self, packet: Packet) -> Result<()> {
        loop {
            match self.engine.try_enqueue(packet.clone()) {
                Err(Error::QueueFull) => {
                    tokio::time::sleep(self.engine.config().poll_interval()).await;
                }
                other => return other,
            }
        }
    }

    /// 가장 오래된 수신 패킷 (논블로킹)
    pub fn try_receive(&self) -> Option<Packet> {
        self.engine.try_receive()
    }

    /// 수신 패킷을 최대 `timeout` 동안 기다림
    pub async fn recv_timeout(&self, timeout: Duration) -> Option<Packet> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(packet) = self.engine.try_receive() {
                return Some(packet);
            }
            if Instant::now() >= deadline {
                return None;
            }
            tokio::time::sleep(self.engine.config().poll_interval()).await;
        }
    }

    pub fn has_pending(&self) -> bool {
        self.engine.has_pending()
    }

    pub fn is_running(&self) -> bool {
        self.engine.is_running()
    }

    pub fn mode(&self) -> Mode {
        self.engine.mode()
    }

    pub fn stats(&self) -> LinkStats {
        self.engine.stats()
    }

    pub fn window_status(&self) -> WindowStatus {
        self.engine.window_status()
    }

    fn mediums_for(&self, mode: Mode) -> Result<Vec<Arc<dyn Medium>>> {
        let mediums = self.engine.mediums();
        let selected: Vec<_> = match mode.medium() {
            None => mediums.iter().cloned().collect(),
            Some(kind) => mediums.get(kind).cloned().into_iter().collect(),
        };
        if selected.is_empty() {
            return Err(Error::MediumUnavailable(format!("{} 모드용 매체 없음", mode)));
        }
        Ok(selected)
    }

    fn spawn_workers(&self) {
        self.engine.set_running(true);
        let poll = self.engine.config().poll_interval();

        let engine = self.engine.clone();
        let egress = tokio::spawn(async move {
            info!("송신 루프 시작");
            while engine.is_running() {
                if engine.egress_step(Instant::now()) {
                    tokio::task::yield_now().await;
                } else {
                    tokio::time::sleep(poll).await;
                }
            }
            info!("송신 루프 종료");
        });

        let engine = self.engine.clone();
        let ingress = tokio::spawn(async move {
            info!("수신 루프 시작");
            while engine.is_running() {
                if engine.ingress_step() {
                    tokio::task::yield_now().await;
                } else {
                    tokio::time::sleep(poll).await;
                }
            }
            info!("수신 루프 종료");
        });

        let mut workers = self.workers.lock();
        workers.push(egress);
        workers.push(ingress);
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        // 분리된 태스크가 다음 반복에서 빠져나가도록
        self.engine.set_running(false);
    }
}
