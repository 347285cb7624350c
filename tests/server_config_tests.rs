//! Full configuration path: Apexfile on disk through parsing, registry
//! lookups and server assembly.

use std::io::Write;

use apexdns::config::{parse_config, RootConfig};
use apexdns::registry::Registry;
use apexdns::server::Server;
use tempfile::NamedTempFile;

const APEXFILE: &str = r#"
apexdns {
  http 127.0.0.1:0
  log  debug
}

example.com. {
  cache
  upstream 2s {
    udp 127.0.0.1:5300
    tcp 127.0.0.1:5300
  }
}

example.org. {
  upstream {
    tcp-tls 1.1.1.1:853
  }
}
"#;

fn write_apexfile(content: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}

#[tokio::test]
async fn builds_and_runs_from_an_apexfile_on_disk() {
    let file = write_apexfile(APEXFILE);
    let raw = std::fs::read_to_string(file.path()).unwrap();

    let blocks = parse_config(&raw).unwrap();
    let root = RootConfig::from_blocks(&blocks).unwrap();
    assert_eq!(root.endpoints.len(), 1);

    let registry = Registry::builtin().unwrap();
    let mut server = Server::build(&blocks, &root, &registry).unwrap();

    // The endpoint binds, serves, and shuts down cleanly.
    server.run();
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    server.close().await;
}

#[tokio::test]
async fn upstream_without_servers_is_a_config_error() {
    let raw = "apexdns {\n http 127.0.0.1:0\n}\nexample.com. {\n upstream 5s {\n }\n}\n";
    let blocks = parse_config(raw).unwrap();
    let root = RootConfig::from_blocks(&blocks).unwrap();
    let registry = Registry::builtin().unwrap();

    let err = Server::build(&blocks, &root, &registry).unwrap_err();
    assert!(err.to_string().contains("upstream is required"));
}

#[tokio::test]
async fn bad_timeout_is_a_config_error() {
    let raw =
        "apexdns {\n http 127.0.0.1:0\n}\nexample.com. {\n upstream soon {\n  udp 8.8.8.8:53\n }\n}\n";
    let blocks = parse_config(raw).unwrap();
    let root = RootConfig::from_blocks(&blocks).unwrap();
    let registry = Registry::builtin().unwrap();

    let err = Server::build(&blocks, &root, &registry).unwrap_err();
    assert!(err.to_string().contains("invalid duration"));
}
