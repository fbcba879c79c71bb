//! Custom protocol handlers, keyed by protocol tag.
//!
//! A handler receives an opaque request for its tag and produces a
//! response. The table only routes; what a protocol means is entirely the
//! handler's business.

use std::sync::Arc;

use bytes::Bytes;
use dashmap::DashMap;

use ferry_core::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolRequest {
    pub protocol: String,
    pub payload: Bytes,
}

impl ProtocolRequest {
    pub fn new(protocol: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            protocol: protocol.into(),
            payload: payload.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ProtocolResponse {
    pub payload: Bytes,
}

/// A handler for one custom protocol.
pub trait ProtocolHandler: Send + Sync {
    fn handle(&self, request: &ProtocolRequest) -> Result<ProtocolResponse>;
}

impl<F> ProtocolHandler for F
where
    F: Fn(&ProtocolRequest) -> Result<ProtocolResponse> + Send + Sync,
{
    fn handle(&self, request: &ProtocolRequest) -> Result<ProtocolResponse> {
        self(request)
    }
}

/// Maps protocol tags to handlers. Clones share the same table.
#[derive(Clone, Default)]
pub struct ProtocolTable {
    handlers: Arc<DashMap<String, Arc<dyn ProtocolHandler>>>,
}

impl ProtocolTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `tag`, replacing any previous one.
    pub fn register(&self, tag: impl Into<String>, handler: Arc<dyn ProtocolHandler>) -> Result<()> {
        let tag = tag.into();
        if tag.is_empty() {
            return Err(Error::Protocol("protocol tag must not be empty".into()));
        }
        if self.handlers.insert(tag.clone(), handler).is_some() {
            tracing::debug!(protocol = %tag, "protocol handler replaced");
        } else {
            tracing::debug!(protocol = %tag, "protocol handler registered");
        }
        Ok(())
    }

    pub fn unregister(&self, tag: &str) -> bool {
        self.handlers.remove(tag).is_some()
    }

    pub fn lookup(&self, tag: &str) -> Option<Arc<dyn ProtocolHandler>> {
        self.handlers.get(tag).map(|h| h.value().clone())
    }

    /// Route `request` to the handler registered for its tag.
    pub fn dispatch(&self, request: &ProtocolRequest) -> Result<ProtocolResponse> {
        // Clone the handler out so no shard lock is held while it runs.
        let handler = self
            .lookup(&request.protocol)
            .ok_or_else(|| Error::Protocol(format!("no handler for '{}'", request.protocol)))?;
        let result = handler.handle(request);
        if let Err(e) = &result {
            tracing::warn!(protocol = %request.protocol, error = %e, "protocol handler failed");
        }
        result
    }

    /// Registered tags, sorted.
    pub fn tags(&self) -> Vec<String> {
        let mut tags: Vec<String> = self.handlers.iter().map(|e| e.key().clone()).collect();
        tags.sort();
        tags
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Upper;

    impl ProtocolHandler for Upper {
        fn handle(&self, request: &ProtocolRequest) -> Result<ProtocolResponse> {
            Ok(ProtocolResponse {
                payload: Bytes::from(request.payload.to_ascii_uppercase()),
            })
        }
    }

    #[test]
    fn dispatch_routes_by_tag() {
        let table = ProtocolTable::new();
        table.register("upper", Arc::new(Upper)).unwrap();
        table
            .register(
                "len",
                Arc::new(|req: &ProtocolRequest| -> Result<ProtocolResponse> {
                    Ok(ProtocolResponse {
                        payload: Bytes::from(req.payload.len().to_string()),
                    })
                }),
            )
            .unwrap();

        let resp = table
            .dispatch(&ProtocolRequest::new("upper", &b"ferry"[..]))
            .unwrap();
        assert_eq!(resp.payload, Bytes::from_static(b"FERRY"));

        let resp = table
            .dispatch(&ProtocolRequest::new("len", &b"12345"[..]))
            .unwrap();
        assert_eq!(resp.payload, Bytes::from_static(b"5"));
        assert_eq!(table.tags(), vec!["len".to_string(), "upper".to_string()]);
    }

    #[test]
    fn unknown_tag_is_protocol_error() {
        let table = ProtocolTable::new();
        let err = table
            .dispatch(&ProtocolRequest::new("gopher", Bytes::new()))
            .unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }

    #[test]
    fn empty_tag_is_rejected() {
        let table = ProtocolTable::new();
        assert!(matches!(
            table.register("", Arc::new(Upper)),
            Err(Error::Protocol(_))
        ));
        assert!(table.tags().is_empty());
    }

    #[test]
    fn register_replaces_and_clones_share_state() {
        let table = ProtocolTable::new();
        let view = table.clone();
        table.register("p", Arc::new(Upper)).unwrap();
        table
            .register(
                "p",
                Arc::new(|_: &ProtocolRequest| -> Result<ProtocolResponse> {
                    Ok(ProtocolResponse::default())
                }),
            )
            .unwrap();

        let resp = view
            .dispatch(&ProtocolRequest::new("p", &b"abc"[..]))
            .unwrap();
        assert!(resp.payload.is_empty());
        assert!(view.unregister("p"));
        assert!(table.lookup("p").is_none());
    }
}
