//! Response cache plugin.
//!
//! Two hooks: `handle` serves hits early in the chain, `tail` populates
//! the store from responses resolved further down the chain.

mod store;

pub use store::{cache_key, ResponseCache, DEFAULT_CAPACITY};

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::config::Directive;
use crate::context::Context;
use crate::engine::Plugin;
use crate::error::{ApexError, Result};
use crate::registry::PluginEntry;

pub const NAME: &str = "cache";

pub fn entry() -> PluginEntry {
    PluginEntry {
        name: NAME,
        description: "DNS query cache",
        init: setup,
    }
}

fn setup(directive: &Directive) -> Result<Arc<dyn Plugin>> {
    if !directive.args.is_empty() || !directive.children.is_empty() {
        return Err(ApexError::Config(format!(
            "cache takes no arguments, got: {:?}",
            directive.args
        )));
    }
    Ok(Arc::new(CachePlugin::new(DEFAULT_CAPACITY)))
}

pub struct CachePlugin {
    store: ResponseCache,
}

impl CachePlugin {
    pub fn new(capacity: usize) -> Self {
        CachePlugin {
            store: ResponseCache::new(capacity),
        }
    }

    pub fn store(&self) -> &ResponseCache {
        &self.store
    }
}

#[async_trait]
impl Plugin for CachePlugin {
    fn name(&self) -> &'static str {
        NAME
    }

    async fn handle(&self, ctx: &Context) {
        if ctx.error().is_some() || ctx.response().is_some() {
            return;
        }

        let key = cache_key(ctx.client_ip(), ctx.query());
        match self.store.get(key) {
            Some(mut response) => {
                debug!(uuid = %ctx.uuid(), "Hit cache");
                // The stored message carries the id of whoever resolved it
                // first; answer with the current query's id.
                response.header.id = ctx.query().header.id;
                ctx.set_response(response);
                ctx.mark_cached_response();
                ctx.abort();
            }
            None => {
                debug!(uuid = %ctx.uuid(), "Cache missing");
            }
        }
    }

    async fn tail(&self, ctx: &Context) {
        if ctx.error().is_some() {
            return;
        }
        let Some(response) = ctx.response() else {
            return;
        };
        if ctx.is_cached_response() {
            return;
        }
        if response.header.tc || response.answers.is_empty() {
            return;
        }

        let ttl = response.answers[0].ttl;
        let key = cache_key(ctx.client_ip(), ctx.query());
        self.store.insert(key, response, ttl);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::{Message, Record, RecordType};

    fn query_ctx(ip: &str, name: &str) -> Context {
        Context::new(
            Some(ip.parse().unwrap()),
            Message::query(name, RecordType::A),
        )
    }

    fn answered(name: &str, ttl: u32) -> Message {
        let mut msg = Message::query(name, RecordType::A);
        msg.header.qr = true;
        msg.answers
            .push(Record::new(name, RecordType::A, ttl, "93.184.216.34"));
        msg
    }

    #[tokio::test]
    async fn tail_then_handle_serves_from_cache() {
        let plugin = CachePlugin::new(1024);

        let first = query_ctx("203.0.113.7", "example.com.");
        first.set_response(answered("example.com.", 300));
        plugin.tail(&first).await;
        assert_eq!(plugin.store().len(), 1);

        // Same /24, different host byte.
        let second = query_ctx("203.0.113.42", "example.com.");
        plugin.handle(&second).await;
        assert!(second.is_aborted());
        assert!(second.is_cached_response());
        let hit = second.response().unwrap();
        assert_eq!(hit.answers[0].data, "93.184.216.34");
        assert!(hit.answers[0].ttl <= 300);
    }

    #[tokio::test]
    async fn truncated_and_empty_responses_are_not_cached() {
        let plugin = CachePlugin::new(1024);

        let truncated = query_ctx("203.0.113.7", "example.com.");
        let mut msg = answered("example.com.", 300);
        msg.header.tc = true;
        truncated.set_response(msg);
        plugin.tail(&truncated).await;

        let empty = query_ctx("203.0.113.7", "empty.example.com.");
        let mut msg = Message::query("empty.example.com.", RecordType::A);
        msg.header.qr = true;
        empty.set_response(msg);
        plugin.tail(&empty).await;

        assert!(plugin.store().is_empty());
    }

    #[tokio::test]
    async fn cache_hits_are_not_written_back() {
        let plugin = CachePlugin::new(1024);

        let warm = query_ctx("203.0.113.7", "example.com.");
        warm.set_response(answered("example.com.", 300));
        plugin.tail(&warm).await;

        let hit = query_ctx("203.0.113.7", "example.com.");
        plugin.handle(&hit).await;
        plugin.tail(&hit).await;

        assert_eq!(plugin.store().len(), 1);
    }

    #[tokio::test]
    async fn errored_context_is_ignored() {
        let plugin = CachePlugin::new(1024);

        let warm = query_ctx("203.0.113.7", "example.com.");
        warm.set_response(answered("example.com.", 300));
        plugin.tail(&warm).await;

        let errored = query_ctx("203.0.113.7", "example.com.");
        errored.abort_with_err(ApexError::Upstream("boom".into()));
        plugin.handle(&errored).await;
        assert!(errored.response().is_none());
    }

    #[tokio::test]
    async fn hit_takes_the_current_query_id() {
        let plugin = CachePlugin::new(1024);

        let warm = query_ctx("203.0.113.7", "example.com.");
        let mut msg = answered("example.com.", 300);
        msg.header.id = 1111;
        warm.set_response(msg);
        plugin.tail(&warm).await;

        let mut query = Message::query("example.com.", RecordType::A);
        query.header.id = 2222;
        let hit = Context::new(Some("203.0.113.7".parse().unwrap()), query);
        plugin.handle(&hit).await;
        assert_eq!(hit.response().unwrap().header.id, 2222);
    }
}
