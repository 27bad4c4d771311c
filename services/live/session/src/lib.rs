//! Duplex connection, handshake and ordered send loop for live model sessions.
//!
//! This crate keeps one long-lived connection to a generative-model backend,
//! runs the SETUP handshake before any user traffic, delivers outbound
//! messages in order through a single sender loop, and reports how the
//! connection ended through one response stream.
//!
//! ## Features
//!
//! - **Transport seam**: WebSocket via tokio-tungstenite, or in-memory for tests
//! - **Handshake gate**: nothing but SETUP is written before `setupComplete`
//! - **Ordered sends**: any number of callers, one FIFO queue, one writer
//! - **Typed termination**: `LostConnection`, `UnexpectedClosure`,
//!   `UnsupportedMessage`, or a clean end after `close`
//!
//! ## Example
//!
//! ```rust,no_run
//! use futures::StreamExt;
//! use live_session::{ApiConfig, LiveModel, LiveSessionConfig};
//! use live_wire::LiveServerMessage;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let mut config = LiveSessionConfig::new(ApiConfig::default(), "my-project", "gemini-live");
//! config.app.api_key = "api-key".to_string();
//!
//! let mut session = LiveModel::new(config).connect().await?;
//! session.send_text_realtime("Does five plus five equal ten?");
//!
//! while let Some(message) = session.responses().next().await {
//!     if let LiveServerMessage::Content(content) = message? {
//!         print!("{}", content.text());
//!         if content.turn_complete {
//!             break;
//!         }
//!     }
//! }
//! session.close().await;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod adapter;
pub mod auth;
pub mod config;
pub mod endpoint;
pub mod error;
pub mod gate;
pub mod model;
pub mod response;
pub mod service;
pub mod session;
pub mod transport;

// Re-export main types
pub use adapter::{ConnectionPhase, DuplexSocketAdapter, InboundFrames};
pub use auth::{
    AttestationTokenProvider, IdentityTokenProvider, StaticToken, TokenError, TokenProviders,
};
pub use config::{AppInfo, LiveSessionConfig, DEFAULT_REQUEST_TIMEOUT};
pub use endpoint::{ApiConfig, ApiVersion, Backend};
pub use error::{classify_closure, ClosedError, LiveSessionError, SetupError, TransportError};
pub use gate::HandshakeGate;
pub use model::LiveModel;
pub use response::ResponseStream;
pub use service::{LiveSessionService, SessionState};
pub use session::{LiveSender, LiveSession};
pub use transport::{
    CloseCode, ConnectRequest, Connector, MemoryConnector, MemoryListener, MemoryPeer,
    TransportMessage, WebSocketConnector,
};
