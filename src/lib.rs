//! # content-dispatch
//!
//! 内容 API 客户端的请求调度核心：有界队列、令牌刷新重试与先缓存后网络的读取。
//!
//! Request-dispatch core for a content API client.
//!
//! ## Overview
//!
//! Every request an application submits goes through one bounded queue and
//! one consumer task. The consumer attaches the current bearer token, runs
//! the HTTP exchange, refreshes the session once when the token has
//! expired, and reports the outcome to the caller's listener. GETs are
//! answered from a local cache first and then from the network.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use content_dispatch::{listener_channel, ClientConfig, ContentClient, ListenerEvent};
//!
//! #[tokio::main]
//! async fn main() -> content_dispatch::Result<()> {
//!     let config = ClientConfig::new("https://api.example.com/v1")
//!         .with_credentials("app", "secret");
//!     let client: ContentClient<serde_json::Value> = ContentClient::builder(config).build()?;
//!
//!     let (listener, mut events) = listener_channel();
//!     client.get("item/5", listener);
//!
//!     while let Some(event) = events.recv().await {
//!         if let ListenerEvent::Success { payload, origin, .. } = &event {
//!             println!("{origin}: {payload:?}");
//!         }
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`client`] | Dispatcher, auth guard, executor, reporter, and the client facade |
//! | [`cache`] | Cache stores and the read-through handler |
//! | [`transport`] | Network boundary and the reqwest implementation |
//! | [`types`] | Envelopes, results, sessions |
//! | [`config`] | YAML and environment configuration |

pub mod cache;
pub mod client;
pub mod config;
pub mod transport;
pub mod types;

pub use client::{listener_channel, ContentClient, ContentClientBuilder, ListenerEvent, ResultListener};
pub use config::ClientConfig;
pub use types::{Operation, Origin, RequestDescriptor, RequestEnvelope, RequestResult, Session, Ticket};

/// Result type alias for the library
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for the library
pub mod error;
pub use error::{Error, ErrorContext};
