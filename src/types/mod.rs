//! 类型系统模块：定义请求信封、请求结果与会话等核心数据类型。
//!
//! # Types Module
//!
//! This module defines the value types that flow through the dispatch engine.
//! Everything here is plain data: the behavior lives in [`crate::client`] and
//! [`crate::cache`].
//!
//! ## Key Types
//!
//! | Type | Description |
//! |------|-------------|
//! | [`RequestEnvelope`] | One submitted request: operation, descriptor, payload, ticket, listener |
//! | [`RequestDescriptor`] | Value-comparable resource address that resolves to a canonical URI |
//! | [`Ticket`] | Correlation identity between a submission and its delivered result(s) |
//! | [`RequestResult`] | Outcome of one phase (cache or network) of a request |
//! | [`Session`] | Access/refresh token pair with its expiry |
//!
//! ## Example
//!
//! ```rust
//! use content_dispatch::types::{Operation, RequestDescriptor, RequestEnvelope};
//!
//! let envelope: RequestEnvelope<serde_json::Value> =
//!     RequestEnvelope::builder(Operation::Get, RequestDescriptor::parse("item/5"))
//!         .build();
//! assert_eq!(envelope.ticket().as_str(), "item/5");
//! ```

pub mod envelope;
pub mod result;
pub mod session;

pub use envelope::{Operation, RequestDescriptor, RequestEnvelope, RequestEnvelopeBuilder, Ticket};
pub use result::{ErrorKind, Origin, RequestResult};
pub use session::Session;
