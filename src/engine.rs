//! Zone engines: the ordered plugin chain bound to one DNS zone, and the
//! suffix-match dispatcher that picks an engine for a question name.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::context::Context;

/// A processing step in a zone's chain.
#[async_trait]
pub trait Plugin: Send + Sync {
    fn name(&self) -> &'static str;

    /// Called in declaration order while the chain is live.
    async fn handle(&self, ctx: &Context);

    /// Called in reverse declaration order after the chain completes,
    /// regardless of abort. Not called when a terminal error was set
    /// without a response.
    async fn tail(&self, _ctx: &Context) {}
}

/// Anything that can resolve a query context; the server implements this
/// and endpoints call it.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(&self, ctx: &Context);
}

pub type QueryHandler = Arc<dyn Handler>;

/// The plugin chain for one zone. Immutable after setup.
pub struct Engine {
    zone: String,
    chain: Vec<Arc<dyn Plugin>>,
}

impl Engine {
    pub fn new(zone: String, chain: Vec<Arc<dyn Plugin>>) -> Self {
        Engine { zone, chain }
    }

    pub fn zone(&self) -> &str {
        &self.zone
    }

    pub async fn handle(&self, ctx: &Context) {
        for plugin in &self.chain {
            if ctx.error().is_some() || ctx.is_aborted() {
                break;
            }
            debug!(uuid = %ctx.uuid(), zone = %self.zone, plugin = plugin.name(), "Running plugin");
            plugin.handle(ctx).await;
        }

        if ctx.error().is_some() && ctx.response().is_none() {
            return;
        }
        for plugin in self.chain.iter().rev() {
            plugin.tail(ctx).await;
        }
    }
}

/// Zone name → engine, looked up by the longest zone that is a suffix of
/// the question name on a label boundary.
#[derive(Default)]
pub struct ZoneMap {
    zones: Vec<(String, Arc<Engine>)>,
}

impl ZoneMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, engine: Arc<Engine>) {
        self.zones
            .push((engine.zone().to_ascii_lowercase(), engine));
    }

    pub fn is_empty(&self) -> bool {
        self.zones.is_empty()
    }

    pub fn lookup(&self, qname: &str) -> Option<Arc<Engine>> {
        let qname = qname.to_ascii_lowercase();
        self.zones
            .iter()
            .filter(|(zone, _)| zone_matches(zone, &qname))
            .max_by_key(|(zone, _)| zone.len())
            .map(|(_, engine)| engine.clone())
    }
}

/// `zone` and `name` are lowercased FQDNs. A match requires the zone to be
/// the whole name or a suffix starting at a label boundary.
fn zone_matches(zone: &str, name: &str) -> bool {
    if zone == "." {
        return true;
    }
    if name == zone {
        return true;
    }
    name.ends_with(zone) && name[..name.len() - zone.len()].ends_with('.')
}
