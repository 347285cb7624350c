//! Apexfile parsing: a line-oriented tokenizer with `{`/`}` nesting.
//!
//! ```text
//! apexdns {
//!   http  :8080
//!   https :8443 cert.pem key.pem
//!   log   debug
//! }
//!
//! example.com. {
//!   cache
//!   upstream 5s {
//!     tcp-tls 1.1.1.1:853
//!     udp     8.8.8.8:53   socks5://127.0.0.1:1080
//!   }
//! }
//! ```
//!
//! An opening brace ends its line; a closing brace stands alone. `#`
//! starts a comment.

use std::time::Duration;

use crate::error::{ApexError, Result};

/// Reserved key of the root block.
pub const ROOT_BLOCK_KEY: &str = "apexdns";

/// One configuration line: a name, its arguments, and any nested lines.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Directive {
    pub name: String,
    pub args: Vec<String>,
    pub children: Vec<Directive>,
}

/// A top-level `key { … }` block.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Block {
    pub key: String,
    pub directives: Vec<Directive>,
}

pub fn parse_config(input: &str) -> Result<Vec<Block>> {
    let lines = tokenize(input);
    let mut blocks = Vec::new();
    let mut index = 0;

    while index < lines.len() {
        let line = &lines[index];
        if line.len() != 2 || line[1] != "{" {
            return Err(ApexError::Config(format!(
                "expected `<key> {{` block header, got: {}",
                line.join(" ")
            )));
        }
        let (directives, next) = parse_directives(&lines, index + 1)?;
        blocks.push(Block {
            key: line[0].clone(),
            directives,
        });
        index = next;
    }

    Ok(blocks)
}

fn tokenize(input: &str) -> Vec<Vec<String>> {
    input
        .lines()
        .map(|line| {
            let line = line.split('#').next().unwrap_or("");
            line.split_whitespace().map(str::to_string).collect::<Vec<_>>()
        })
        .filter(|tokens: &Vec<String>| !tokens.is_empty())
        .collect()
}

fn parse_directives(lines: &[Vec<String>], mut index: usize) -> Result<(Vec<Directive>, usize)> {
    let mut directives = Vec::new();

    while index < lines.len() {
        let line = &lines[index];
        if line.len() == 1 && line[0] == "}" {
            return Ok((directives, index + 1));
        }

        if line.last().map(String::as_str) == Some("{") {
            let (children, next) = parse_directives(lines, index + 1)?;
            directives.push(Directive {
                name: line[0].clone(),
                args: line[1..line.len() - 1].to_vec(),
                children,
            });
            index = next;
        } else {
            directives.push(Directive {
                name: line[0].clone(),
                args: line[1..].to_vec(),
                children: Vec::new(),
            });
            index += 1;
        }
    }

    Err(ApexError::Config("unbalanced braces".into()))
}

/// The `apexdns` root block: endpoint listeners and the log level.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RootConfig {
    pub endpoints: Vec<EndpointDirective>,
    pub log_level: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EndpointDirective {
    pub kind: String,
    pub args: Vec<String>,
}

impl Default for RootConfig {
    fn default() -> Self {
        RootConfig {
            endpoints: Vec::new(),
            log_level: "debug".into(),
        }
    }
}

impl RootConfig {
    pub fn from_blocks(blocks: &[Block]) -> Result<Self> {
        let root = blocks
            .iter()
            .find(|block| block.key == ROOT_BLOCK_KEY)
            .ok_or_else(|| ApexError::Config(format!("missing `{}` block", ROOT_BLOCK_KEY)))?;

        let mut config = RootConfig::default();
        for directive in &root.directives {
            match directive.name.as_str() {
                "http" => {
                    if directive.args.len() != 1 {
                        return Err(ApexError::Config(format!(
                            "invalid HTTP endpoint config: {:?}",
                            directive.args
                        )));
                    }
                    config.endpoints.push(EndpointDirective {
                        kind: "http".into(),
                        args: directive.args.clone(),
                    });
                }
                "https" => {
                    if directive.args.len() != 3 {
                        return Err(ApexError::Config(format!(
                            "invalid HTTPS endpoint config: {:?}",
                            directive.args
                        )));
                    }
                    config.endpoints.push(EndpointDirective {
                        kind: "https".into(),
                        args: directive.args.clone(),
                    });
                }
                "log" => {
                    if directive.args.len() != 1 {
                        return Err(ApexError::Config(format!(
                            "invalid log config: {:?}",
                            directive.args
                        )));
                    }
                    config.log_level = directive.args[0].clone();
                }
                other => {
                    return Err(ApexError::Config(format!(
                        "unknown root directive: {}",
                        other
                    )));
                }
            }
        }
        Ok(config)
    }
}

/// Durations in the `5s` / `300ms` / `1m30s` style.
pub fn parse_duration(raw: &str) -> Result<Duration> {
    let invalid = || ApexError::Config(format!("invalid duration: {}", raw));

    let mut total = Duration::ZERO;
    let mut chars = raw.chars().peekable();
    let mut saw_segment = false;

    while chars.peek().is_some() {
        let mut digits = String::new();
        while let Some(c) = chars.peek() {
            if c.is_ascii_digit() {
                digits.push(*c);
                chars.next();
            } else {
                break;
            }
        }
        let mut unit = String::new();
        while let Some(c) = chars.peek() {
            if c.is_ascii_alphabetic() {
                unit.push(*c);
                chars.next();
            } else {
                break;
            }
        }
        if digits.is_empty() || unit.is_empty() {
            return Err(invalid());
        }
        let value: u64 = digits.parse().map_err(|_| invalid())?;
        total += match unit.as_str() {
            "ms" => Duration::from_millis(value),
            "s" => Duration::from_secs(value),
            "m" => Duration::from_secs(value * 60),
            "h" => Duration::from_secs(value * 3600),
            _ => return Err(invalid()),
        };
        saw_segment = true;
    }

    if !saw_segment {
        return Err(invalid());
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
# gateway configuration
apexdns {
  http  :8080
  https :8443 cert.pem key.pem
  log   info
}

example.com. {
  cache
  upstream 5s {
    tcp-tls 1.1.1.1:853
    udp     8.8.8.8:53     socks5://127.0.0.1:1080
    tcp     9.9.9.9:53
  }
}
"#;

    #[test]
    fn parses_the_reference_apexfile() {
        let blocks = parse_config(SAMPLE).unwrap();
        assert_eq!(blocks.len(), 2);

        let root = RootConfig::from_blocks(&blocks).unwrap();
        assert_eq!(root.log_level, "info");
        assert_eq!(root.endpoints.len(), 2);
        assert_eq!(root.endpoints[0].kind, "http");
        assert_eq!(root.endpoints[0].args, vec![":8080"]);
        assert_eq!(
            root.endpoints[1].args,
            vec![":8443", "cert.pem", "key.pem"]
        );

        let zone = &blocks[1];
        assert_eq!(zone.key, "example.com.");
        assert_eq!(zone.directives.len(), 2);
        assert_eq!(zone.directives[0].name, "cache");
        assert!(zone.directives[0].args.is_empty());

        let upstream = &zone.directives[1];
        assert_eq!(upstream.name, "upstream");
        assert_eq!(upstream.args, vec!["5s"]);
        assert_eq!(upstream.children.len(), 3);
        assert_eq!(upstream.children[0].name, "tcp-tls");
        assert_eq!(upstream.children[0].args, vec!["1.1.1.1:853"]);
        assert_eq!(
            upstream.children[1].args,
            vec!["8.8.8.8:53", "socks5://127.0.0.1:1080"]
        );
    }

    #[test]
    fn declaration_order_is_preserved() {
        let input = "zone. {\n  upstream 1s {\n    udp 8.8.8.8:53\n  }\n  cache\n}\n";
        let blocks = parse_config(input).unwrap();
        let names: Vec<&str> = blocks[0]
            .directives
            .iter()
            .map(|d| d.name.as_str())
            .collect();
        assert_eq!(names, vec!["upstream", "cache"]);
    }

    #[test]
    fn missing_root_block_is_an_error() {
        let blocks = parse_config("example.com. {\n cache\n}\n").unwrap();
        assert!(RootConfig::from_blocks(&blocks).is_err());
    }

    #[test]
    fn log_level_defaults_to_debug() {
        let blocks = parse_config("apexdns {\n http :8080\n}\n").unwrap();
        let root = RootConfig::from_blocks(&blocks).unwrap();
        assert_eq!(root.log_level, "debug");
    }

    #[test]
    fn unbalanced_braces_are_rejected() {
        assert!(parse_config("apexdns {\n http :8080\n").is_err());
        assert!(parse_config("stray tokens here\n").is_err());
    }

    #[test]
    fn duration_forms() {
        assert_eq!(parse_duration("5s").unwrap(), Duration::from_secs(5));
        assert_eq!(parse_duration("300ms").unwrap(), Duration::from_millis(300));
        assert_eq!(parse_duration("1m30s").unwrap(), Duration::from_secs(90));
        assert_eq!(parse_duration("2h").unwrap(), Duration::from_secs(7200));
        assert!(parse_duration("fast").is_err());
        assert!(parse_duration("10").is_err());
        assert!(parse_duration("").is_err());
    }
}
