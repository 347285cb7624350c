//! Ingress endpoints and the static table the registry is seeded from.

pub mod http;

use std::sync::Arc;

use async_trait::async_trait;

use crate::engine::QueryHandler;
use crate::error::Result;
use crate::registry::EndpointEntry;

/// A listener that feeds query contexts into the handler. Each endpoint
/// runs on its own long-lived task.
#[async_trait]
pub trait Endpoint: Send + Sync {
    /// Serve until `close` is called.
    async fn run(self: Arc<Self>) -> Result<()>;

    /// Ask the accept loop to stop.
    fn close(&self);
}

/// Everything an endpoint initializer gets: the directive arguments from
/// the root block and the resolve handler to invoke per request.
pub struct EndpointContext {
    pub args: Vec<String>,
    pub handler: QueryHandler,
}

pub fn builtin() -> Vec<EndpointEntry> {
    vec![http::http_entry(), http::https_entry()]
}
