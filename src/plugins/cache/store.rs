//! Sharded in-memory response store with TTL-driven expiry and
//! oldest-first eviction once capacity is reached.

use std::collections::{HashMap, VecDeque};
use std::net::IpAddr;
use std::time::Instant;

use parking_lot::Mutex;

use crate::dns::Message;

/// Reference capacity target: about a million entries.
pub const DEFAULT_CAPACITY: usize = 1 << 20;

const SHARD_COUNT: usize = 64;

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// FNV-1a-64 over: question type (big-endian), the byte-lowercased
/// question name, and the client subnet prefix (the address minus its
/// last byte, so a /24 or /120 shares one entry).
pub fn cache_key(client_ip: Option<IpAddr>, msg: &Message) -> u64 {
    let mut hash = FNV_OFFSET;
    let mut mix = |byte: u8| {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(FNV_PRIME);
    };

    if let Some(question) = msg.question() {
        for byte in u16::from(question.qtype).to_be_bytes() {
            mix(byte);
        }
        for byte in question.name.bytes() {
            mix(byte.to_ascii_lowercase());
        }
    }
    match client_ip {
        Some(IpAddr::V4(v4)) => {
            let octets = v4.octets();
            for byte in &octets[..3] {
                mix(*byte);
            }
        }
        Some(IpAddr::V6(v6)) => {
            let octets = v6.octets();
            for byte in &octets[..15] {
                mix(*byte);
            }
        }
        None => {}
    }
    hash
}

struct Entry {
    msg: Message,
    stored_at: Instant,
    ttl: u32,
}

#[derive(Default)]
struct Shard {
    entries: HashMap<u64, Entry>,
    order: VecDeque<u64>,
}

pub struct ResponseCache {
    shards: Vec<Mutex<Shard>>,
    capacity_per_shard: usize,
}

impl ResponseCache {
    pub fn new(capacity: usize) -> Self {
        ResponseCache {
            shards: (0..SHARD_COUNT).map(|_| Mutex::new(Shard::default())).collect(),
            capacity_per_shard: (capacity / SHARD_COUNT).max(1),
        }
    }

    fn shard(&self, key: u64) -> &Mutex<Shard> {
        &self.shards[(key % SHARD_COUNT as u64) as usize]
    }

    /// Fetch a TTL-adjusted copy. An entry whose TTL has fully elapsed is
    /// removed and reported as a miss.
    pub fn get(&self, key: u64) -> Option<Message> {
        let mut shard = self.shard(key).lock();
        let entry = shard.entries.get(&key)?;

        let elapsed = entry.stored_at.elapsed().as_secs();
        if elapsed >= entry.ttl as u64 {
            shard.entries.remove(&key);
            return None;
        }

        let elapsed = elapsed as u32;
        let mut msg = entry.msg.clone();
        for record in msg
            .answers
            .iter_mut()
            .chain(&mut msg.authorities)
            .chain(&mut msg.additionals)
        {
            record.ttl = record.ttl.saturating_sub(elapsed);
        }
        Some(msg)
    }

    /// Store a deep copy under `key` for `ttl` seconds. An existing entry
    /// is never overwritten.
    pub fn insert(&self, key: u64, msg: Message, ttl: u32) {
        self.insert_at(key, msg, ttl, Instant::now());
    }

    fn insert_at(&self, key: u64, msg: Message, ttl: u32, stored_at: Instant) {
        let mut shard = self.shard(key).lock();
        if shard.entries.contains_key(&key) {
            return;
        }

        while shard.entries.len() >= self.capacity_per_shard {
            match shard.order.pop_front() {
                Some(oldest) => {
                    shard.entries.remove(&oldest);
                }
                None => break,
            }
        }

        shard.entries.insert(
            key,
            Entry {
                msg,
                stored_at,
                ttl,
            },
        );
        shard.order.push_back(key);
    }

    /// Backdate an insert, for tests exercising TTL arithmetic.
    #[cfg(test)]
    pub fn insert_aged(&self, key: u64, msg: Message, ttl: u32, age_secs: u64) {
        let age = std::time::Duration::from_secs(age_secs);
        self.insert_at(key, msg, ttl, Instant::now() - age);
    }

    pub fn len(&self) -> usize {
        self.shards.iter().map(|shard| shard.lock().entries.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::{Message, Record, RecordType};

    fn response(name: &str, ttl: u32) -> Message {
        let mut msg = Message::query(name, RecordType::A);
        msg.header.qr = true;
        msg.answers.push(Record::new(name, RecordType::A, ttl, "192.0.2.1"));
        msg
    }

    fn key_for(ip: &str, name: &str) -> u64 {
        cache_key(
            Some(ip.parse().unwrap()),
            &Message::query(name, RecordType::A),
        )
    }

    #[test]
    fn key_ignores_ascii_case() {
        assert_eq!(
            key_for("203.0.113.7", "Example.COM."),
            key_for("203.0.113.7", "example.com.")
        );
    }

    #[test]
    fn key_coarsens_to_the_surrounding_subnet() {
        assert_eq!(
            key_for("203.0.113.7", "example.com."),
            key_for("203.0.113.42", "example.com.")
        );
        assert_ne!(
            key_for("203.0.113.7", "example.com."),
            key_for("203.0.112.7", "example.com.")
        );

        let v6_a = cache_key(
            Some("2001:db8::1".parse().unwrap()),
            &Message::query("example.com.", RecordType::A),
        );
        let v6_b = cache_key(
            Some("2001:db8::2".parse().unwrap()),
            &Message::query("example.com.", RecordType::A),
        );
        assert_eq!(v6_a, v6_b);
    }

    #[test]
    fn key_separates_types_and_missing_client() {
        let a = cache_key(None, &Message::query("example.com.", RecordType::A));
        let aaaa = cache_key(None, &Message::query("example.com.", RecordType::AAAA));
        assert_ne!(a, aaaa);
    }

    #[test]
    fn ttl_decays_by_elapsed_whole_seconds() {
        let cache = ResponseCache::new(16);
        cache.insert_aged(1, response("example.com.", 300), 300, 10);

        let hit = cache.get(1).unwrap();
        assert_eq!(hit.answers[0].ttl, 290);
    }

    #[test]
    fn expired_entry_is_a_miss() {
        let cache = ResponseCache::new(16);
        cache.insert_aged(1, response("example.com.", 5), 5, 5);
        assert!(cache.get(1).is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn insert_never_overwrites() {
        let cache = ResponseCache::new(16);
        cache.insert_aged(1, response("example.com.", 300), 300, 20);
        cache.insert(1, response("example.com.", 300), 300);

        // Still the backdated entry: TTLs reflect the original stored_at.
        assert_eq!(cache.get(1).unwrap().answers[0].ttl, 280);
    }

    #[test]
    fn capacity_evicts_oldest_first() {
        // One shard's worth of capacity to make eviction order observable.
        let cache = ResponseCache::new(SHARD_COUNT * 2);
        let shard = 7u64;
        let keys: Vec<u64> = (0..3)
            .map(|i| shard + i * SHARD_COUNT as u64)
            .collect();

        for key in &keys {
            cache.insert(*key, response("example.com.", 300), 300);
        }

        assert!(cache.get(keys[0]).is_none());
        assert!(cache.get(keys[1]).is_some());
        assert!(cache.get(keys[2]).is_some());
    }
}
