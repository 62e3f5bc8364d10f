//! Narrow adapter over the external media worker. The coordinator drives
//! this surface and nothing else: worker → router → transports →
//! producers/consumers, plus a death signal. Adapter types stay behind
//! these traits and never leak into gateway handlers.

use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use remus_shared::api::voice::MediaKind;
use remus_shared::ids::{ConsumerId, ProducerId, TransportId};
use tokio::sync::watch;

pub type MediaResult<T> = Result<T, MediaError>;

#[derive(Debug, thiserror::Error)]
pub enum MediaError {
    #[error("transport is not connected")]
    NotConnected,

    #[error("unknown producer")]
    UnknownProducer,

    #[error("cannot consume producer")]
    CannotConsume,

    #[error("media worker failure: {0}")]
    Worker(String),
}

#[derive(Debug, Clone)]
pub struct RtpCodecCapability {
    pub kind: MediaKind,
    pub mime_type: String,
    pub clock_rate: u32,
    pub channels: Option<u8>,
}

/// Opus audio at 48 kHz stereo; VP8 video at 90 kHz.
pub fn default_media_codecs() -> Vec<RtpCodecCapability> {
    vec![
        RtpCodecCapability {
            kind: MediaKind::Audio,
            mime_type: "audio/opus".into(),
            clock_rate: 48_000,
            channels: Some(2),
        },
        RtpCodecCapability {
            kind: MediaKind::Video,
            mime_type: "video/VP8".into(),
            clock_rate: 90_000,
            channels: None,
        },
    ]
}

#[derive(Debug, Clone)]
pub struct WebRtcTransportOptions {
    pub listen_ip: String,
    pub announced_ip: Option<String>,
    pub port_range: (u16, u16),
    pub enable_udp: bool,
    pub enable_tcp: bool,
    pub prefer_udp: bool,
}

#[async_trait]
pub trait MediaWorker: Send + Sync {
    async fn create_router(
        &self,
        codecs: Vec<RtpCodecCapability>,
    ) -> MediaResult<Arc<dyn MediaRouter>>;

    /// Flips to `true` exactly once if the worker dies. The node treats
    /// that as fatal.
    fn died(&self) -> watch::Receiver<bool>;
}

#[async_trait]
pub trait MediaRouter: Send + Sync {
    fn rtp_capabilities(&self) -> serde_json::Value;

    async fn create_webrtc_transport(
        &self,
        options: WebRtcTransportOptions,
    ) -> MediaResult<Arc<dyn MediaTransport>>;

    fn can_consume(&self, producer_id: &ProducerId, rtp_capabilities: &serde_json::Value) -> bool;
}

#[async_trait]
pub trait MediaTransport: Send + Sync {
    fn id(&self) -> TransportId;
    fn ice_parameters(&self) -> serde_json::Value;
    fn ice_candidates(&self) -> serde_json::Value;
    fn dtls_parameters(&self) -> serde_json::Value;

    async fn connect(&self, dtls_parameters: serde_json::Value) -> MediaResult<()>;

    async fn produce(
        &self,
        kind: MediaKind,
        rtp_parameters: serde_json::Value,
        app_data: serde_json::Value,
    ) -> MediaResult<Arc<dyn MediaProducer>>;

    async fn consume(
        &self,
        producer_id: &ProducerId,
        rtp_capabilities: serde_json::Value,
        paused: bool,
    ) -> MediaResult<Arc<dyn MediaConsumer>>;

    async fn close(&self);
}

#[async_trait]
pub trait MediaProducer: Send + Sync + std::fmt::Debug {
    fn id(&self) -> ProducerId;
    fn kind(&self) -> MediaKind;
    fn app_data(&self) -> serde_json::Value;
    async fn close(&self);
}

#[async_trait]
pub trait MediaConsumer: Send + Sync {
    fn id(&self) -> ConsumerId;
    fn producer_id(&self) -> ProducerId;
    fn kind(&self) -> MediaKind;
    fn rtp_parameters(&self) -> serde_json::Value;
    async fn resume(&self) -> MediaResult<()>;
    async fn close(&self);
}

// ─── In-process signaling worker ────────────────────────────
//
// Default adapter implementation used when no external RTP worker is wired
// in: it performs the full signaling bookkeeping (ids, ICE/DTLS parameter
// generation, producer registry, can-consume checks) without routing media.

pub struct SignalingWorker {
    died_tx: watch::Sender<bool>,
}

impl SignalingWorker {
    pub fn spawn() -> Arc<Self> {
        let (died_tx, _) = watch::channel(false);
        Arc::new(Self { died_tx })
    }
}

#[async_trait]
impl MediaWorker for SignalingWorker {
    async fn create_router(
        &self,
        codecs: Vec<RtpCodecCapability>,
    ) -> MediaResult<Arc<dyn MediaRouter>> {
        let codec_caps: Vec<serde_json::Value> = codecs
            .iter()
            .map(|codec| {
                serde_json::json!({
                    "kind": codec.kind,
                    "mimeType": codec.mime_type,
                    "clockRate": codec.clock_rate,
                    "channels": codec.channels,
                })
            })
            .collect();
        Ok(Arc::new(SignalingRouter {
            capabilities: serde_json::json!({ "codecs": codec_caps }),
            producers: Arc::new(DashMap::new()),
            next_port: AtomicU16::new(0),
        }))
    }

    fn died(&self) -> watch::Receiver<bool> {
        self.died_tx.subscribe()
    }
}

#[derive(Debug)]
struct ProducerState {
    kind: MediaKind,
    rtp_parameters: serde_json::Value,
    app_data: serde_json::Value,
}

struct SignalingRouter {
    capabilities: serde_json::Value,
    producers: Arc<DashMap<ProducerId, ProducerState>>,
    next_port: AtomicU16,
}

#[async_trait]
impl MediaRouter for SignalingRouter {
    fn rtp_capabilities(&self) -> serde_json::Value {
        self.capabilities.clone()
    }

    async fn create_webrtc_transport(
        &self,
        options: WebRtcTransportOptions,
    ) -> MediaResult<Arc<dyn MediaTransport>> {
        let (min, max) = options.port_range;
        if max <= min {
            return Err(MediaError::Worker("empty port range".into()));
        }
        let offset = self.next_port.fetch_add(1, Ordering::Relaxed);
        let port = min + offset % (max - min);
        let advertised = options
            .announced_ip
            .clone()
            .unwrap_or_else(|| options.listen_ip.clone());

        let mut candidates = Vec::new();
        if options.enable_udp {
            candidates.push(candidate(&advertised, port, "udp", options.prefer_udp));
        }
        if options.enable_tcp {
            candidates.push(candidate(&advertised, port, "tcp", false));
        }

        Ok(Arc::new(SignalingTransport {
            id: TransportId::generate(),
            ice_parameters: serde_json::json!({
                "usernameFragment": uuid::Uuid::new_v4().simple().to_string(),
                "password": uuid::Uuid::new_v4().simple().to_string(),
                "iceLite": true,
            }),
            ice_candidates: serde_json::Value::Array(candidates),
            dtls_parameters: serde_json::json!({
                "role": "auto",
                "fingerprints": [{
                    "algorithm": "sha-256",
                    "value": uuid::Uuid::new_v4().simple().to_string(),
                }],
            }),
            connected: AtomicBool::new(false),
            producers: Arc::clone(&self.producers),
        }))
    }

    fn can_consume(&self, producer_id: &ProducerId, rtp_capabilities: &serde_json::Value) -> bool {
        let has_codecs = rtp_capabilities
            .get("codecs")
            .and_then(|c| c.as_array())
            .map(|c| !c.is_empty())
            .unwrap_or(false);
        has_codecs && self.producers.contains_key(producer_id)
    }
}

fn candidate(ip: &str, port: u16, protocol: &str, preferred: bool) -> serde_json::Value {
    serde_json::json!({
        "foundation": format!("{protocol}candidate"),
        "priority": if preferred { 1_076_302_079u32 } else { 1_076_302_078u32 },
        "ip": ip,
        "port": port,
        "protocol": protocol,
        "type": "host",
    })
}

struct SignalingTransport {
    id: TransportId,
    ice_parameters: serde_json::Value,
    ice_candidates: serde_json::Value,
    dtls_parameters: serde_json::Value,
    connected: AtomicBool,
    producers: Arc<DashMap<ProducerId, ProducerState>>,
}

#[async_trait]
impl MediaTransport for SignalingTransport {
    fn id(&self) -> TransportId {
        self.id.clone()
    }

    fn ice_parameters(&self) -> serde_json::Value {
        self.ice_parameters.clone()
    }

    fn ice_candidates(&self) -> serde_json::Value {
        self.ice_candidates.clone()
    }

    fn dtls_parameters(&self) -> serde_json::Value {
        self.dtls_parameters.clone()
    }

    async fn connect(&self, _dtls_parameters: serde_json::Value) -> MediaResult<()> {
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn produce(
        &self,
        kind: MediaKind,
        rtp_parameters: serde_json::Value,
        app_data: serde_json::Value,
    ) -> MediaResult<Arc<dyn MediaProducer>> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(MediaError::NotConnected);
        }
        let id = ProducerId::generate();
        self.producers.insert(
            id.clone(),
            ProducerState {
                kind,
                rtp_parameters,
                app_data: app_data.clone(),
            },
        );
        Ok(Arc::new(SignalingProducer {
            id,
            kind,
            app_data,
            producers: Arc::clone(&self.producers),
        }))
    }

    async fn consume(
        &self,
        producer_id: &ProducerId,
        rtp_capabilities: serde_json::Value,
        paused: bool,
    ) -> MediaResult<Arc<dyn MediaConsumer>> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(MediaError::NotConnected);
        }
        if !rtp_capabilities
            .get("codecs")
            .map(|c| c.is_array())
            .unwrap_or(false)
        {
            return Err(MediaError::CannotConsume);
        }
        let producer = self
            .producers
            .get(producer_id)
            .ok_or(MediaError::UnknownProducer)?;
        Ok(Arc::new(SignalingConsumer {
            id: ConsumerId::generate(),
            producer_id: producer_id.clone(),
            kind: producer.kind,
            rtp_parameters: producer.rtp_parameters.clone(),
            paused: AtomicBool::new(paused),
        }))
    }

    async fn close(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }
}

#[derive(Debug)]
struct SignalingProducer {
    id: ProducerId,
    kind: MediaKind,
    app_data: serde_json::Value,
    producers: Arc<DashMap<ProducerId, ProducerState>>,
}

#[async_trait]
impl MediaProducer for SignalingProducer {
    fn id(&self) -> ProducerId {
        self.id.clone()
    }

    fn kind(&self) -> MediaKind {
        self.kind
    }

    fn app_data(&self) -> serde_json::Value {
        self.app_data.clone()
    }

    async fn close(&self) {
        self.producers.remove(&self.id);
    }
}

struct SignalingConsumer {
    id: ConsumerId,
    producer_id: ProducerId,
    kind: MediaKind,
    rtp_parameters: serde_json::Value,
    paused: AtomicBool,
}

#[async_trait]
impl MediaConsumer for SignalingConsumer {
    fn id(&self) -> ConsumerId {
        self.id.clone()
    }

    fn producer_id(&self) -> ProducerId {
        self.producer_id.clone()
    }

    fn kind(&self) -> MediaKind {
        self.kind
    }

    fn rtp_parameters(&self) -> serde_json::Value {
        self.rtp_parameters.clone()
    }

    async fn resume(&self) -> MediaResult<()> {
        self.paused.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) {}
}
