//! Resilient channel core for a long-lived AI chat client.
//!
//! This crate owns the persistent, bidirectional, message-oriented
//! connection to the chat backend: connection lifecycle, reconnection policy
//! (exponential backoff with jitter, health-check-gated retry for suspected
//! backend restarts), outbound FIFO queuing across disconnects, and inbound
//! batching so message bursts cannot starve the transport.
//!
//! Collaborators touch the core through two narrow contracts: ask the
//! [`ChannelRegistry`] for a channel by logical path, and receive decoded
//! payloads through the `on_message` callback. Payloads are opaque here;
//! interpreting them is a collaborator concern.

pub mod channel;
pub mod close_code;
pub mod config;
pub mod error;
pub mod health;
pub mod inbound;
pub mod outbound;
pub mod registry;
pub mod retry;
pub mod transport;
pub mod url;

pub use channel::{ChannelHandle, ChannelOptions, ConnectionState, FallbackReason};
pub use channel::{FallbackHandler, MessageHandler};
pub use close_code::{classify_close, CloseClass, CloseInfo};
pub use config::ChannelConfig;
pub use error::ChannelError;
pub use registry::ChannelRegistry;
pub use retry::{next_decision, RetryAttempt, RetryCounts, RetryDecision};
pub use transport::{Connect, Transport, TransportEvent, WsConnect};
pub use url::{health_check_url, resolve_channel_url};
