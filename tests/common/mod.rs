#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::net::UdpSocket;

use apexdns::context::Context;
use apexdns::dns::{Message, Record, RecordType};
use apexdns::engine::Plugin;

/// A terminal plugin that answers every query with a fixed record, like a
/// wire-level stub resolver would.
pub struct StubResolver {
    pub rtype: RecordType,
    pub data: String,
    pub ttl: u32,
    pub truncated: bool,
    pub calls: AtomicUsize,
}

impl StubResolver {
    pub fn answering(rtype: RecordType, data: &str, ttl: u32) -> Arc<Self> {
        Arc::new(StubResolver {
            rtype,
            data: data.to_string(),
            ttl,
            truncated: false,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn truncating() -> Arc<Self> {
        Arc::new(StubResolver {
            rtype: RecordType::A,
            data: "192.0.2.1".to_string(),
            ttl: 300,
            truncated: true,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Plugin for StubResolver {
    fn name(&self) -> &'static str {
        "stub-resolver"
    }

    async fn handle(&self, ctx: &Context) {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let mut response = ctx.query().clone();
        response.header.qr = true;
        response.header.ra = true;
        response.header.tc = self.truncated;
        let name = ctx.query().question().unwrap().name.clone();
        response
            .answers
            .push(Record::new(&name, self.rtype, self.ttl, &self.data));
        ctx.set_response(response);
    }
}

/// Spawn a one-question-at-a-time UDP resolver answering `count` queries
/// with a fixed A record, returning its address.
pub async fn stub_udp_resolver(data: &'static str, ttl: u32, count: usize) -> SocketAddr {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let addr = socket.local_addr().unwrap();
    tokio::spawn(async move {
        let mut buf = vec![0u8; 4096];
        for _ in 0..count {
            let Ok((n, from)) = socket.recv_from(&mut buf).await else {
                return;
            };
            let Ok(query) = Message::unpack(&buf[..n]) else {
                continue;
            };
            let mut response = query.clone();
            response.header.qr = true;
            response.header.ra = true;
            let name = query.question().unwrap().name.clone();
            response
                .answers
                .push(Record::new(&name, RecordType::A, ttl, data));
            let _ = socket.send_to(&response.pack().unwrap(), from).await;
        }
    });
    addr
}
