//! Server assembly: turns parsed Apexfile blocks into zone engines and
//! endpoints, dispatches queries by zone suffix, and owns the lifecycle.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::config::{Block, RootConfig, ROOT_BLOCK_KEY};
use crate::context::Context;
use crate::endpoints::{Endpoint, EndpointContext};
use crate::engine::{Engine, Handler, QueryHandler, ZoneMap};
use crate::error::{ApexError, Result};
use crate::registry::Registry;

pub const DEFAULT_CONFIG_PATH: &str = "/etc/apexdns/Apexfile";

#[derive(Clone, Debug)]
pub struct Options {
    pub config_path: String,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            config_path: DEFAULT_CONFIG_PATH.into(),
        }
    }
}

/// Looks up the zone engine by longest question-name suffix and runs it.
/// No matching engine leaves the context untouched, which the ingress
/// surfaces as an internal error.
struct Dispatcher {
    zones: ZoneMap,
}

#[async_trait]
impl Handler for Dispatcher {
    async fn handle(&self, ctx: &Context) {
        if let Some(err) = ctx.error() {
            warn!(uuid = %ctx.uuid(), error = %err, "Unable to handle context");
            return;
        }
        let Some(question) = ctx.query().question() else {
            warn!(uuid = %ctx.uuid(), "Query carries no question");
            return;
        };

        match self.zones.lookup(&question.name) {
            Some(engine) => {
                debug!(
                    uuid = %ctx.uuid(),
                    zone = engine.zone(),
                    qname = %question.name,
                    "Dispatching to zone engine"
                );
                engine.handle(ctx).await;
            }
            None => {
                warn!(uuid = %ctx.uuid(), qname = %question.name, "No zone engine matched");
            }
        }
    }
}

pub struct Server {
    endpoints: Vec<Arc<dyn Endpoint>>,
    tasks: Vec<JoinHandle<()>>,
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("endpoints", &self.endpoints.len())
            .field("tasks", &self.tasks.len())
            .finish()
    }
}

impl Server {
    /// Assemble engines and endpoints from parsed configuration. Must run
    /// inside the runtime: plugin initializers may spawn tasks.
    pub fn build(blocks: &[Block], root: &RootConfig, registry: &Registry) -> Result<Self> {
        let mut zones = ZoneMap::new();
        let mut seen = HashSet::new();

        for block in blocks.iter().filter(|b| b.key != ROOT_BLOCK_KEY) {
            if !block.key.ends_with('.') {
                return Err(ApexError::Config(format!(
                    "zone name must be fully qualified (end with `.`): {}",
                    block.key
                )));
            }
            if !seen.insert(block.key.to_ascii_lowercase()) {
                return Err(ApexError::Config(format!("duplicated zone: {}", block.key)));
            }

            let mut chain = Vec::with_capacity(block.directives.len());
            for directive in &block.directives {
                let entry = registry
                    .plugin(&directive.name)
                    .ok_or_else(|| ApexError::UnknownPlugin(directive.name.clone()))?;
                chain.push((entry.init)(directive)?);
                debug!(zone = %block.key, plugin = entry.name, "Loaded plugin: {}", entry.description);
            }
            zones.insert(Arc::new(Engine::new(block.key.clone(), chain)));
        }

        let handler: QueryHandler = Arc::new(Dispatcher { zones });

        let mut endpoints: Vec<Arc<dyn Endpoint>> = Vec::new();
        for endpoint in &root.endpoints {
            let entry = registry
                .endpoint(&endpoint.kind)
                .ok_or_else(|| ApexError::UnknownEndpoint(endpoint.kind.clone()))?;
            endpoints.push((entry.init)(EndpointContext {
                args: endpoint.args.clone(),
                handler: handler.clone(),
            })?);
        }

        Ok(Server {
            endpoints,
            tasks: Vec::new(),
        })
    }

    /// Spawn every endpoint on its own task.
    pub fn run(&mut self) {
        for endpoint in &self.endpoints {
            let endpoint = endpoint.clone();
            self.tasks.push(tokio::spawn(async move {
                if let Err(err) = endpoint.run().await {
                    error!(error = %err, "Endpoint failed");
                }
            }));
        }
    }

    /// Stop accept loops and reap the endpoint tasks.
    pub async fn close(self) {
        for endpoint in &self.endpoints {
            endpoint.close();
        }
        for task in self.tasks {
            let _ = task.await;
        }
    }
}
