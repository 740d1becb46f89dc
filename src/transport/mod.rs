//! Media transport seam
//!
//! The peer connection stack (ICE, DTLS, SRTP, codec packetization) lives
//! behind these traits. The session only needs to create a connection, hand
//! it the outbound frame source, trade session descriptions and watch its
//! events.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::mpsc::UnboundedReceiver;

use crate::audio::{AudioFrame, FrameSource};
use crate::constants::DEFAULT_STUN_SERVER;
use crate::error::TransportError;

/// Which side of the offer/answer exchange a description belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Answer,
}

/// Opaque session description exchanged through signaling
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    pub kind: SdpType,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpType::Answer,
            sdp: sdp.into(),
        }
    }
}

/// Peer connection state as reported by the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::New => "new",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Failed => "failed",
            ConnectionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// STUN/TURN server used for connectivity checks
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceServer {
    pub urls: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

impl IceServer {
    pub fn stun(url: impl Into<String>) -> Self {
        Self {
            urls: vec![url.into()],
            username: None,
            credential: None,
        }
    }
}

/// The public STUN server used when none is configured
pub fn default_ice_servers() -> Vec<IceServer> {
    vec![IceServer::stun(DEFAULT_STUN_SERVER)]
}

/// Inbound media track; yields decoded frames
#[async_trait]
pub trait RemoteTrack: Send {
    fn id(&self) -> &str;

    /// Next inbound frame, or `StreamEnded` once the remote side stops sending
    async fn recv(&mut self) -> Result<AudioFrame, TransportError>;
}

/// Something the transport reports asynchronously
pub enum TransportEvent {
    ConnectionStateChanged(ConnectionState),
    RemoteTrack(Box<dyn RemoteTrack>),
    /// Text received on the data channel
    DataMessage(String),
}

impl fmt::Debug for TransportEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportEvent::ConnectionStateChanged(state) => {
                f.debug_tuple("ConnectionStateChanged").field(state).finish()
            }
            TransportEvent::RemoteTrack(track) => {
                f.debug_tuple("RemoteTrack").field(&track.id()).finish()
            }
            TransportEvent::DataMessage(text) => f.debug_tuple("DataMessage").field(text).finish(),
        }
    }
}

/// One peer connection
#[async_trait]
pub trait PeerSession: Send + Sync {
    /// Attach the outbound audio source; the transport drains it at its own pace
    async fn add_local_source(&self, source: FrameSource) -> Result<(), TransportError>;

    async fn create_local_description(&self) -> Result<SessionDescription, TransportError>;

    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), TransportError>;

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), TransportError>;

    /// Close the connection; idempotent
    async fn close(&self);
}

/// A freshly created peer connection and its event stream
pub struct PeerConnection {
    pub session: Box<dyn PeerSession>,
    pub events: UnboundedReceiver<TransportEvent>,
}

/// Factory for peer connections
#[async_trait]
pub trait MediaTransport: Send + Sync {
    async fn create_session(&self, ice_servers: &[IceServer]) -> Result<PeerConnection, TransportError>;
}
