//! Upstream multiplexer plugin: picks the resolver with the lowest
//! smoothed RTT, exchanges the query over its transport, and keeps the
//! ranking fresh with an EWMA update plus an idle decay applied to the
//! peers that were not picked.

pub mod transport;

pub use transport::Transport;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, error};

use crate::config::{parse_duration, Directive};
use crate::context::Context;
use crate::dns::Message;
use crate::engine::Plugin;
use crate::error::{ApexError, Result};
use crate::registry::PluginEntry;

pub const NAME: &str = "upstream";

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Saturation ceiling for a successful sample, in milliseconds.
const SRTT_CEILING_MS: f64 = 300.0;
/// Additive penalty for a failed exchange.
const SRTT_FAILURE_PENALTY_MS: f64 = 200.0;
/// EWMA weight of the newest sample.
const SRTT_ALPHA: f64 = 0.3;
/// Multiplier applied to unselected upstreams per selection.
const SRTT_DECAY: f64 = 0.98;

pub fn entry() -> PluginEntry {
    PluginEntry {
        name: NAME,
        description: "Multi-upstream DNS resolve plugin",
        init: setup,
    }
}

fn setup(directive: &Directive) -> Result<Arc<dyn Plugin>> {
    let timeout = match directive.args.first() {
        Some(raw) => parse_duration(raw)?,
        None => DEFAULT_TIMEOUT,
    };

    let mut upstreams = Vec::new();
    for child in &directive.children {
        match child.name.as_str() {
            "udp" | "tcp" | "tcp-tls" => {
                let transport: Transport = child.name.parse()?;
                let mut args = child.args.iter();
                let addr = args.next().ok_or_else(|| {
                    ApexError::Config(format!("upstream {} needs an address", child.name))
                })?;
                let proxy = args.next().cloned();
                upstreams.push(Upstream::new(transport, addr, proxy, timeout)?);
            }
            other => {
                return Err(ApexError::Config(format!(
                    "unknown config in upstream: {} {:?}",
                    other, child.args
                )));
            }
        }
    }
    if upstreams.is_empty() {
        return Err(ApexError::Config("upstream is required".into()));
    }

    Ok(Arc::new(UpstreamPlugin::new(upstreams)))
}

/// One upstream resolver. Immutable aside from its SRTT, which is kept as
/// f64 bits in an atomic so racy reads during selection stay harmless.
pub struct Upstream {
    transport: Transport,
    addr: String,
    tls_host: String,
    socks5_proxy: Option<String>,
    timeout: Duration,
    srtt_bits: AtomicU64,
}

impl Upstream {
    pub fn new(
        transport: Transport,
        addr: &str,
        socks5_proxy: Option<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let (host, _port) = addr
            .rsplit_once(':')
            .ok_or_else(|| ApexError::Config(format!("upstream address must be host:port: {}", addr)))?;
        let socks5_proxy = socks5_proxy
            .map(|raw| {
                raw.strip_prefix("socks5://")
                    .map(str::to_string)
                    .ok_or_else(|| {
                        ApexError::Config(format!("proxy must be a socks5:// address: {}", raw))
                    })
            })
            .transpose()?;

        Ok(Upstream {
            transport,
            addr: addr.to_string(),
            tls_host: host.trim_matches(['[', ']']).to_string(),
            socks5_proxy,
            timeout,
            srtt_bits: AtomicU64::new(0f64.to_bits()),
        })
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub fn srtt(&self) -> f64 {
        f64::from_bits(self.srtt_bits.load(Ordering::Relaxed))
    }

    fn store_srtt(&self, value: f64) {
        self.srtt_bits.store(value.to_bits(), Ordering::Relaxed);
    }

    pub fn record_success(&self, rtt_ms: f64) {
        let sample = rtt_ms.min(SRTT_CEILING_MS);
        self.store_srtt(self.srtt() * (1.0 - SRTT_ALPHA) + sample * SRTT_ALPHA);
    }

    pub fn record_failure(&self) {
        self.store_srtt(self.srtt() + SRTT_FAILURE_PENALTY_MS);
    }

    pub fn decay(&self) {
        self.store_srtt(self.srtt() * SRTT_DECAY);
    }

    pub async fn exchange(&self, query: &Message) -> Result<Message> {
        transport::exchange(
            self.transport,
            &self.addr,
            &self.tls_host,
            self.socks5_proxy.as_deref(),
            query,
            self.timeout,
        )
        .await
    }
}

pub struct UpstreamPlugin {
    upstreams: Arc<Vec<Upstream>>,
    decay_tx: mpsc::UnboundedSender<usize>,
}

impl UpstreamPlugin {
    pub fn new(upstreams: Vec<Upstream>) -> Self {
        let upstreams = Arc::new(upstreams);
        let (decay_tx, mut decay_rx) = mpsc::unbounded_channel::<usize>();

        // One long-lived task absorbs selection events and decays the
        // peers that were not picked, so unused fast upstreams stay
        // competitive without a task spawned per query.
        let peers = upstreams.clone();
        tokio::spawn(async move {
            while let Some(selected) = decay_rx.recv().await {
                for (index, upstream) in peers.iter().enumerate() {
                    if index != selected {
                        upstream.decay();
                    }
                }
            }
        });

        UpstreamPlugin {
            upstreams,
            decay_tx,
        }
    }

    pub fn upstreams(&self) -> &[Upstream] {
        &self.upstreams
    }

    /// Index of the upstream with the minimum SRTT; ties go to the first
    /// declared.
    pub fn best_upstream(&self) -> usize {
        let mut best = 0;
        for index in 1..self.upstreams.len() {
            if self.upstreams[index].srtt() < self.upstreams[best].srtt() {
                best = index;
            }
        }
        best
    }
}

#[async_trait]
impl Plugin for UpstreamPlugin {
    fn name(&self) -> &'static str {
        NAME
    }

    async fn handle(&self, ctx: &Context) {
        let selected = self.best_upstream();
        let _ = self.decay_tx.send(selected);
        let upstream = &self.upstreams[selected];

        let started = Instant::now();
        match upstream.exchange(ctx.query()).await {
            Ok(response) => {
                let rtt = started.elapsed();
                upstream.record_success(rtt.as_secs_f64() * 1000.0);
                debug!(
                    uuid = %ctx.uuid(),
                    upstream = upstream.addr(),
                    rtt_ms = rtt.as_millis() as u64,
                    "Exchanged query"
                );
                ctx.set_response(response);
            }
            Err(err) => {
                upstream.record_failure();
                error!(
                    uuid = %ctx.uuid(),
                    upstream = upstream.addr(),
                    error = %err,
                    "Unable to exchange query"
                );
                ctx.abort_with_err(err);
            }
        }
    }
}
