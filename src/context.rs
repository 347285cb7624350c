//! Per-query state carried through a zone's plugin chain.

use std::net::IpAddr;

use parking_lot::Mutex;
use uuid::Uuid;

use crate::dns::Message;
use crate::error::ApexError;

#[derive(Debug, Default)]
struct State {
    response: Option<Message>,
    aborted: bool,
    err: Option<ApexError>,
    /// Hand-off flag between the cache's two hooks: set on a cache hit so
    /// the tail hook does not write the entry straight back.
    cached_response: bool,
}

/// Mutable per-request state. The query message is set once at
/// construction; everything else is guarded by a mutex because plugins
/// may touch the context from background tasks.
#[derive(Debug)]
pub struct Context {
    uuid: String,
    client_ip: Option<IpAddr>,
    query: Message,
    state: Mutex<State>,
}

impl Context {
    pub fn new(client_ip: Option<IpAddr>, query: Message) -> Self {
        Context {
            uuid: Uuid::new_v4().to_string(),
            client_ip,
            query,
            state: Mutex::new(State::default()),
        }
    }

    pub fn uuid(&self) -> &str {
        &self.uuid
    }

    pub fn client_ip(&self) -> Option<IpAddr> {
        self.client_ip
    }

    pub fn query(&self) -> &Message {
        &self.query
    }

    /// Stop the chain, keeping any response already set.
    pub fn abort(&self) {
        self.state.lock().aborted = true;
    }

    /// Stop the chain with a terminal error.
    pub fn abort_with_err(&self, err: ApexError) {
        let mut state = self.state.lock();
        state.aborted = true;
        state.err = Some(err);
    }

    pub fn is_aborted(&self) -> bool {
        self.state.lock().aborted
    }

    pub fn error(&self) -> Option<ApexError> {
        self.state.lock().err.clone()
    }

    pub fn set_response(&self, msg: Message) {
        self.state.lock().response = Some(msg);
    }

    pub fn response(&self) -> Option<Message> {
        self.state.lock().response.clone()
    }

    pub fn mark_cached_response(&self) {
        self.state.lock().cached_response = true;
    }

    pub fn is_cached_response(&self) -> bool {
        self.state.lock().cached_response
    }
}
