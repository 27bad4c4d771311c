//! Entry point for opening live sessions.

use live_wire::{JsonCodec, MessageCodec};
use std::sync::Arc;
use tracing::info;

use crate::auth::{AttestationTokenProvider, IdentityTokenProvider, TokenProviders};
use crate::config::LiveSessionConfig;
use crate::error::LiveSessionError;
use crate::service::LiveSessionService;
use crate::session::LiveSession;
use crate::transport::{Connector, WebSocketConnector};

/// A model that can be talked to over live sessions
///
/// Defaults to the WebSocket transport and the JSON codec.
pub struct LiveModel {
    config: LiveSessionConfig,
    connector: Arc<dyn Connector>,
    codec: Arc<dyn MessageCodec>,
    tokens: TokenProviders,
}

impl LiveModel {
    /// Create a model handle
    pub fn new(config: LiveSessionConfig) -> Self {
        Self {
            config,
            connector: Arc::new(WebSocketConnector::new()),
            codec: Arc::new(JsonCodec),
            tokens: TokenProviders::default(),
        }
    }

    /// Use a different transport
    pub fn with_connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = connector;
        self
    }

    /// Use a different codec
    pub fn with_codec(mut self, codec: Arc<dyn MessageCodec>) -> Self {
        self.codec = codec;
        self
    }

    /// Send an identity token with every connection
    pub fn with_identity_provider(mut self, provider: Arc<dyn IdentityTokenProvider>) -> Self {
        self.tokens.identity = Some(provider);
        self
    }

    /// Send an attestation token with every connection
    pub fn with_attestation_provider(
        mut self,
        provider: Arc<dyn AttestationTokenProvider>,
    ) -> Self {
        self.tokens.attestation = Some(provider);
        self
    }

    /// Session configuration
    pub fn config(&self) -> &LiveSessionConfig {
        &self.config
    }

    /// Open a session and complete its handshake
    ///
    /// On failure everything opened so far is torn down and no session is
    /// returned.
    pub async fn connect(&self) -> Result<LiveSession, LiveSessionError> {
        let (service, responses) = LiveSessionService::new(
            self.config.clone(),
            self.connector.clone(),
            self.codec.clone(),
            self.tokens.clone(),
        );
        service.connect().await?;
        info!(model = %self.config.model, "Live session connected");
        Ok(LiveSession::new(service, responses))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::StaticToken;
    use crate::error::SetupError;
    use crate::service::SessionState;
    use crate::transport::{CloseCode, MemoryConnector, MemoryListener, MemoryPeer, TransportMessage};
    use futures::StreamExt;
    use live_wire::{FunctionResponse, LiveServerMessage, Part};
    use serde_json::json;
    use std::time::Duration;

    const WAIT: Duration = Duration::from_secs(2);

    fn model() -> (LiveModel, MemoryListener) {
        let (connector, listener) = MemoryConnector::new();
        let model = LiveModel::new(LiveSessionConfig {
            model: "projects/demo/models/gemini-live".to_string(),
            ..LiveSessionConfig::default()
        })
        .with_connector(Arc::new(connector))
        .with_identity_provider(Arc::new(StaticToken::new("id-token")));
        (model, listener)
    }

    async fn serve_handshake(listener: &mut MemoryListener) -> MemoryPeer {
        let mut peer = listener.accept().await.unwrap();
        assert_eq!(
            peer.request().header_value("Authorization"),
            Some("Firebase id-token")
        );
        let setup = peer.recv_json().await.unwrap();
        assert!(setup.get("setup").is_some());
        peer.send_json(&json!({ "setupComplete": {} }));
        peer
    }

    #[tokio::test]
    async fn test_session_round_trip() {
        let (model, mut listener) = model();
        let server = tokio::spawn(async move {
            let mut peer = serve_handshake(&mut listener).await;

            let first = peer.recv_json().await.unwrap();
            assert_eq!(first["clientContent"]["turnComplete"], false);
            let second = peer.recv_json().await.unwrap();
            assert_eq!(second["clientContent"]["turnComplete"], true);

            peer.send_json(&json!({
                "serverContent": {
                    "modelTurn": { "parts": [{ "text": "Yes" }] },
                    "turnComplete": true
                }
            }));
            peer
        });

        let mut session = tokio::time::timeout(WAIT, model.connect())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(session.state(), SessionState::Ready);

        session.send_content(vec![Part::text("Does five plus")], false);
        session.send_content(vec![Part::text(" five equal ten?")], true);

        let Some(Ok(LiveServerMessage::Content(content))) =
            tokio::time::timeout(WAIT, session.responses().next()).await.unwrap()
        else {
            panic!("expected server content");
        };
        assert_eq!(content.text(), "Yes");

        let mut peer = server.await.unwrap();
        session.close().await;
        session.close().await;
        assert!(session.responses().next().await.is_none());
        assert_eq!(session.state(), SessionState::Closed);
        assert!(matches!(
            tokio::time::timeout(WAIT, peer.recv()).await.unwrap(),
            Some(TransportMessage::Close {
                code: CloseCode::GOING_AWAY,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_concurrent_senders_share_the_queue() {
        let (model, mut listener) = model();
        let server = tokio::spawn(async move {
            let mut peer = serve_handshake(&mut listener).await;
            let mut received = Vec::new();
            for _ in 0..3 {
                received.push(peer.recv_json().await.unwrap());
            }
            received
        });

        let session = model.connect().await.unwrap();
        for name in ["a", "b", "c"] {
            let sender = session.sender();
            tokio::spawn(async move {
                sender.send_function_responses(vec![FunctionResponse::new(
                    name,
                    json!({ "ok": true }),
                    Some(format!("call-{}", name)),
                )]);
            })
            .await
            .unwrap();
        }

        let received = tokio::time::timeout(WAIT, server).await.unwrap().unwrap();
        let names: Vec<_> = received
            .iter()
            .map(|m| m["toolResponse"]["functionResponses"][0]["name"].clone())
            .collect();
        assert_eq!(names, vec![json!("a"), json!("b"), json!("c")]);
    }

    #[tokio::test]
    async fn test_failed_handshake_returns_no_session() {
        let (model, mut listener) = model();
        let server = tokio::spawn(async move {
            let mut peer = listener.accept().await.unwrap();
            peer.recv_json().await.unwrap();
            peer.send_frame(live_wire::Frame::from(b"not json".to_vec()));
            peer
        });

        let result = tokio::time::timeout(WAIT, model.connect()).await.unwrap();
        let Err(LiveSessionError::Setup(SetupError::Rejected(cause))) = result else {
            panic!("expected a rejected setup");
        };
        assert!(matches!(*cause, LiveSessionError::UnsupportedMessage(_)));

        let mut peer = server.await.unwrap();
        assert!(matches!(
            tokio::time::timeout(WAIT, peer.recv()).await.unwrap(),
            Some(TransportMessage::Close { .. }) | None
        ));
    }

    #[tokio::test]
    async fn test_realtime_helpers_encode_blobs() {
        let (model, mut listener) = model();
        let server = tokio::spawn(async move {
            let mut peer = serve_handshake(&mut listener).await;
            let mut received = Vec::new();
            for _ in 0..4 {
                received.push(peer.recv_json().await.unwrap());
            }
            received
        });

        let session = model.connect().await.unwrap();
        session.send_text_realtime("hello");
        session.send_audio_realtime(&[0, 1, 2]);
        session.send_audio_stream_end();
        session.send_video_realtime(b"frame", "image/jpeg");

        let received = tokio::time::timeout(WAIT, server).await.unwrap().unwrap();
        assert_eq!(received[0], json!({ "realtimeInput": { "text": "hello" } }));
        assert_eq!(
            received[1],
            json!({ "realtimeInput": { "audio": { "mimeType": "audio/pcm", "data": "AAEC" } } })
        );
        assert_eq!(
            received[2],
            json!({ "realtimeInput": { "audioStreamEnd": true } })
        );
        assert_eq!(received[3]["realtimeInput"]["video"]["mimeType"], "image/jpeg");
    }

    #[tokio::test]
    async fn test_dropping_session_closes_connection() {
        let (model, mut listener) = model();
        let server = tokio::spawn(async move { serve_handshake(&mut listener).await });

        let session = model.connect().await.unwrap();
        let sender = session.sender();
        let mut peer = server.await.unwrap();

        drop(session);
        assert!(matches!(
            tokio::time::timeout(WAIT, peer.recv()).await.unwrap(),
            Some(TransportMessage::Close {
                code: CloseCode::GOING_AWAY,
                ..
            })
        ));

        // Late sends are discarded quietly
        sender.send_text_realtime("too late");
    }
}
