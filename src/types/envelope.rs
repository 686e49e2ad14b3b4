//! Request envelope, descriptor and ticket.

use crate::client::reporter::ResultListener;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use uuid::Uuid;

/// Operation kind carried by an envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Operation {
    Get,
    Post,
    Put,
    Delete,
    /// Token grant against the token endpoint. Never carries a bearer header.
    Authorize,
}

impl Operation {
    pub fn is_read(&self) -> bool {
        matches!(self, Operation::Get)
    }

    pub fn has_body(&self) -> bool {
        matches!(self, Operation::Post | Operation::Put)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Get => "GET",
            Operation::Post => "POST",
            Operation::Put => "PUT",
            Operation::Delete => "DELETE",
            Operation::Authorize => "AUTHORIZE",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Base used only to borrow `Url`'s path-segment encoding.
const SEGMENT_SCRATCH_URL: &str = "descriptor:/";

/// Value-comparable resource address.
///
/// Two descriptors are equal when their path segments and query pairs are
/// equal; query order never matters because pairs are kept sorted. The
/// canonical form (`item/5?lang=en`) is shared by the network URI and the
/// cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestDescriptor {
    segments: Vec<String>,
    query: BTreeMap<String, String>,
}

impl RequestDescriptor {
    pub fn new<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            segments: segments
                .into_iter()
                .map(Into::into)
                .filter(|s: &String| !s.is_empty())
                .collect(),
            query: BTreeMap::new(),
        }
    }

    /// Parse a relative path such as `item/5?lang=en`.
    ///
    /// Path segments are taken literally and encoded on output, so `%` in
    /// the input is a literal percent sign.
    pub fn parse(path: &str) -> Self {
        let (path, query) = match path.split_once('?') {
            Some((p, q)) => (p, Some(q)),
            None => (path, None),
        };
        let mut descriptor = Self::new(path.split('/'));
        if let Some(q) = query {
            for (k, v) in url::form_urlencoded::parse(q.as_bytes()) {
                descriptor.query.insert(k.into_owned(), v.into_owned());
            }
        }
        descriptor
    }

    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.insert(key.into(), value.into());
        self
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn query(&self) -> &BTreeMap<String, String> {
        &self.query
    }

    /// Canonical relative form: percent-encoded segments joined by `/`,
    /// then sorted query pairs.
    pub fn canonical(&self) -> String {
        let mut out = self.encoded_path();
        if !self.query.is_empty() {
            let query = url::form_urlencoded::Serializer::new(String::new())
                .extend_pairs(self.query.iter())
                .finish();
            out.push('?');
            out.push_str(&query);
        }
        out
    }

    fn encoded_path(&self) -> String {
        let Ok(mut scratch) = url::Url::parse(SEGMENT_SCRATCH_URL) else {
            return self.segments.join("/");
        };
        if let Ok(mut path) = scratch.path_segments_mut() {
            path.clear().extend(&self.segments);
        }
        scratch.path().trim_start_matches('/').to_string()
    }

    /// Resolve against a base URL (`https://api.example.com/v1` + `item/5`).
    pub fn to_uri(&self, base_url: &str) -> String {
        format!("{}/{}", base_url.trim_end_matches('/'), self.canonical())
    }
}

impl fmt::Display for RequestDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical())
    }
}

impl From<&str> for RequestDescriptor {
    fn from(s: &str) -> Self {
        Self::parse(s)
    }
}

/// Correlation identity between a submission and its delivered result(s).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Ticket(String);

impl Ticket {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Ticket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&RequestDescriptor> for Ticket {
    fn from(d: &RequestDescriptor) -> Self {
        Self(d.canonical())
    }
}

impl From<&str> for Ticket {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for Ticket {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// One submitted request.
///
/// Built once through [`RequestEnvelope::builder`] and never mutated
/// afterwards. `T` is the result shape the response body deserializes into.
pub struct RequestEnvelope<T> {
    operation: Operation,
    descriptor: RequestDescriptor,
    payload: Option<serde_json::Value>,
    ticket: Ticket,
    listener: Option<Arc<dyn ResultListener<T>>>,
    request_id: String,
    _shape: PhantomData<fn() -> T>,
}

impl<T> RequestEnvelope<T> {
    pub fn builder(operation: Operation, descriptor: RequestDescriptor) -> RequestEnvelopeBuilder<T> {
        RequestEnvelopeBuilder::new(operation, descriptor)
    }

    pub fn operation(&self) -> Operation {
        self.operation
    }

    pub fn descriptor(&self) -> &RequestDescriptor {
        &self.descriptor
    }

    pub fn payload(&self) -> Option<&serde_json::Value> {
        self.payload.as_ref()
    }

    pub fn ticket(&self) -> &Ticket {
        &self.ticket
    }

    pub fn listener(&self) -> Option<&Arc<dyn ResultListener<T>>> {
        self.listener.as_ref()
    }

    /// Log correlation id, unique per envelope.
    pub fn request_id(&self) -> &str {
        &self.request_id
    }
}

impl<T> Clone for RequestEnvelope<T> {
    fn clone(&self) -> Self {
        Self {
            operation: self.operation,
            descriptor: self.descriptor.clone(),
            payload: self.payload.clone(),
            ticket: self.ticket.clone(),
            listener: self.listener.clone(),
            request_id: self.request_id.clone(),
            _shape: PhantomData,
        }
    }
}

impl<T> fmt::Debug for RequestEnvelope<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestEnvelope")
            .field("operation", &self.operation)
            .field("descriptor", &self.descriptor)
            .field("ticket", &self.ticket)
            .field("has_payload", &self.payload.is_some())
            .field("has_listener", &self.listener.is_some())
            .field("request_id", &self.request_id)
            .finish()
    }
}

pub struct RequestEnvelopeBuilder<T> {
    operation: Operation,
    descriptor: RequestDescriptor,
    payload: Option<serde_json::Value>,
    ticket: Option<Ticket>,
    listener: Option<Arc<dyn ResultListener<T>>>,
}

impl<T> RequestEnvelopeBuilder<T> {
    pub fn new(operation: Operation, descriptor: RequestDescriptor) -> Self {
        Self {
            operation,
            descriptor,
            payload: None,
            ticket: None,
            listener: None,
        }
    }

    pub fn payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Serialize any value as the request body.
    pub fn try_payload<P: Serialize>(mut self, payload: &P) -> crate::Result<Self> {
        self.payload = Some(serde_json::to_value(payload)?);
        Ok(self)
    }

    pub fn ticket(mut self, ticket: impl Into<Ticket>) -> Self {
        self.ticket = Some(ticket.into());
        self
    }

    pub fn listener(mut self, listener: Arc<dyn ResultListener<T>>) -> Self {
        self.listener = Some(listener);
        self
    }

    pub fn build(self) -> RequestEnvelope<T> {
        let ticket = self
            .ticket
            .unwrap_or_else(|| Ticket::from(&self.descriptor));
        RequestEnvelope {
            operation: self.operation,
            descriptor: self.descriptor,
            payload: self.payload,
            ticket,
            listener: self.listener,
            request_id: Uuid::new_v4().to_string(),
            _shape: PhantomData,
        }
    }
}
