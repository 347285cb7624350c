//! DNS-over-HTTPS ingress.
//!
//! Accepts both DoH dialects on any path: the Google JSON API form
//! (query parameters, `name=...`) and IETF RFC 8484 (base64url `dns=` or
//! a wire-format body). Responses are encoded as wire format or the JSON
//! document depending on `ct`/Accept negotiation.

mod tls;

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::extract::{DefaultBodyLimit, Extension, Query};
use axum::http::header::{ACCEPT, CONTENT_TYPE};
use axum::http::{HeaderMap, Method, StatusCode};
use axum::response::Response;
use axum::Router;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::service::TowerToHyperService;
use tokio::net::TcpListener;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use crate::context::Context;
use crate::dns::json::DohResponse;
use crate::dns::{ClientSubnet, EdnsOpt, Message, RecordType, EDNS0_SUBNET};
use crate::endpoints::{Endpoint, EndpointContext};
use crate::engine::QueryHandler;
use crate::error::{ApexError, Result};
use crate::registry::EndpointEntry;

/// Identification token sent in `Server` and `X-Powered-By`.
const USER_AGENT: &str = "ApexDNS";

/// Upper bound on request bodies.
const MAX_REQUEST_SIZE: usize = 16 << 20;

pub const CONTENT_TYPE_DNS_JSON: &str = "application/dns-json";
pub const CONTENT_TYPE_JSON: &str = "application/json";
pub const CONTENT_TYPE_X_JAVASCRIPT: &str = "application/x-javascript";
pub const CONTENT_TYPE_DNS_MESSAGE: &str = "application/dns-message";
pub const CONTENT_TYPE_UDP_WIREFORMAT: &str = "application/dns-udpwireformat";

const RECOGNIZED_CONTENT_TYPES: [&str; 5] = [
    CONTENT_TYPE_DNS_JSON,
    CONTENT_TYPE_JSON,
    CONTENT_TYPE_X_JAVASCRIPT,
    CONTENT_TYPE_DNS_MESSAGE,
    CONTENT_TYPE_UDP_WIREFORMAT,
];

pub fn http_entry() -> EndpointEntry {
    EndpointEntry {
        name: "http",
        description: "HTTP resolver endpoint",
        init: setup_http,
    }
}

pub fn https_entry() -> EndpointEntry {
    EndpointEntry {
        name: "https",
        description: "HTTPS resolver endpoint",
        init: setup_https,
    }
}

fn setup_http(ctx: EndpointContext) -> Result<Arc<dyn Endpoint>> {
    match ctx.args.as_slice() {
        [listen] => Ok(Arc::new(HttpEndpoint::new(listen, None, ctx.handler))),
        other => Err(ApexError::Config(format!(
            "invalid HTTP endpoint arguments: {:?}",
            other
        ))),
    }
}

fn setup_https(ctx: EndpointContext) -> Result<Arc<dyn Endpoint>> {
    match ctx.args.as_slice() {
        [listen, cert, key] => Ok(Arc::new(HttpEndpoint::new(
            listen,
            Some((cert.clone(), key.clone())),
            ctx.handler,
        ))),
        other => Err(ApexError::Config(format!(
            "invalid HTTPS endpoint arguments: {:?}",
            other
        ))),
    }
}

pub struct HttpEndpoint {
    listen: String,
    tls_files: Option<(String, String)>,
    handler: QueryHandler,
    shutdown: Notify,
}

impl HttpEndpoint {
    pub fn new(listen: &str, tls_files: Option<(String, String)>, handler: QueryHandler) -> Self {
        HttpEndpoint {
            listen: normalize_listen(listen),
            tls_files,
            handler,
            shutdown: Notify::new(),
        }
    }

    fn router(&self, peer: SocketAddr) -> Router {
        let state = ConnState {
            handler: self.handler.clone(),
            peer,
        };
        Router::new()
            .fallback(handle_request)
            .layer(Extension(state))
            .layer(DefaultBodyLimit::max(MAX_REQUEST_SIZE))
    }
}

#[async_trait::async_trait]
impl Endpoint for HttpEndpoint {
    async fn run(self: Arc<Self>) -> Result<()> {
        let acceptor = match &self.tls_files {
            Some((cert, key)) => Some(tls::acceptor(cert, key)?),
            None => None,
        };

        let listener = TcpListener::bind(&self.listen).await?;
        info!(
            listen = %self.listen,
            scheme = if acceptor.is_some() { "https" } else { "http" },
            "DoH endpoint listening"
        );

        loop {
            let (stream, peer) = tokio::select! {
                _ = self.shutdown.notified() => break,
                accepted = listener.accept() => match accepted {
                    Ok(conn) => conn,
                    Err(err) => {
                        warn!(error = %err, "Accept failed");
                        continue;
                    }
                },
            };

            let app = self.router(peer);
            let acceptor = acceptor.clone();
            tokio::spawn(async move {
                let service = TowerToHyperService::new(app);
                let builder =
                    hyper_util::server::conn::auto::Builder::new(TokioExecutor::new());
                let served = match acceptor {
                    Some(acceptor) => match acceptor.accept(stream).await {
                        Ok(tls_stream) => {
                            builder
                                .serve_connection_with_upgrades(TokioIo::new(tls_stream), service)
                                .await
                        }
                        Err(err) => {
                            debug!(peer = %peer, error = %err, "TLS handshake failed");
                            return;
                        }
                    },
                    None => {
                        builder
                            .serve_connection_with_upgrades(TokioIo::new(stream), service)
                            .await
                    }
                };
                if let Err(err) = served {
                    debug!(peer = %peer, error = %err, "Connection error");
                }
            });
        }

        Ok(())
    }

    fn close(&self) {
        // notify_one stores a permit, so a close racing the accept loop
        // still lands.
        self.shutdown.notify_one();
    }
}

/// `:8080` style listen addresses bind every interface.
fn normalize_listen(listen: &str) -> String {
    if listen.starts_with(':') {
        format!("0.0.0.0{}", listen)
    } else {
        listen.to_string()
    }
}

#[derive(Clone)]
struct ConnState {
    handler: QueryHandler,
    peer: SocketAddr,
}

async fn handle_request(
    Extension(state): Extension<ConnState>,
    method: Method,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if method == Method::OPTIONS {
        return finalize(
            Response::builder()
                .status(StatusCode::OK)
                .header(http::header::CONTENT_LENGTH, "0")
                .body(Body::empty())
                .unwrap(),
        );
    }

    let client_ip = client_ip_from_request(&headers, state.peer);

    let ctx = match parse_google_doh(&params, client_ip) {
        Some(ctx) => Some(ctx),
        None => parse_ietf_doh(&params, &body, client_ip),
    };
    let Some(ctx) = ctx else {
        return finalize(error_json(
            StatusCode::BAD_REQUEST,
            "unknown DoH protocol",
        ));
    };

    if ctx.error().is_none() {
        state.handler.handle(&ctx).await;
    }

    let content_type = negotiate_content_type(
        params.get("ct").map(String::as_str),
        headers.get(ACCEPT).and_then(|v| v.to_str().ok()),
    );

    let response = match content_type.as_str() {
        CONTENT_TYPE_DNS_MESSAGE | CONTENT_TYPE_UDP_WIREFORMAT => respond_wire(&ctx),
        _ => respond_json(&ctx),
    };
    finalize(response)
}

/// CORS and identity headers carried on every response.
fn finalize(mut response: Response) -> Response {
    let headers = response.headers_mut();
    headers.insert("Access-Control-Allow-Headers", "Content-Type".parse().unwrap());
    headers.insert(
        "Access-Control-Allow-Methods",
        "GET, HEAD, OPTIONS, POST".parse().unwrap(),
    );
    headers.insert("Access-Control-Allow-Origin", "*".parse().unwrap());
    headers.insert("Access-Control-Max-Age", "3600".parse().unwrap());
    headers.insert("Server", USER_AGENT.parse().unwrap());
    headers.insert("X-Powered-By", USER_AGENT.parse().unwrap());
    response
}

fn json_body(status: StatusCode, body: String) -> Response {
    Response::builder()
        .status(status)
        .header(CONTENT_TYPE, CONTENT_TYPE_JSON)
        .body(Body::from(body))
        .unwrap()
}

fn error_json(status: StatusCode, message: &str) -> Response {
    json_body(status, serde_json::json!({ "error": message }).to_string())
}

fn respond_json(ctx: &Context) -> Response {
    if let Some(err) = ctx.error() {
        return error_json(StatusCode::BAD_REQUEST, &err.to_string());
    }
    let Some(response) = ctx.response() else {
        return error_json(
            StatusCode::INTERNAL_SERVER_ERROR,
            &ApexError::Internal.to_string(),
        );
    };
    match serde_json::to_string(&DohResponse::from(&response)) {
        Ok(body) => json_body(StatusCode::OK, body),
        Err(err) => error_json(StatusCode::INTERNAL_SERVER_ERROR, &err.to_string()),
    }
}

fn respond_wire(ctx: &Context) -> Response {
    if let Some(err) = ctx.error() {
        return error_json(StatusCode::BAD_REQUEST, &err.to_string());
    }
    let Some(response) = ctx.response() else {
        return error_json(
            StatusCode::INTERNAL_SERVER_ERROR,
            &ApexError::Internal.to_string(),
        );
    };
    match response.pack() {
        Ok(wire) => Response::builder()
            .status(StatusCode::OK)
            .header(CONTENT_TYPE, CONTENT_TYPE_DNS_MESSAGE)
            .body(Body::from(wire))
            .unwrap(),
        Err(err) => error_json(StatusCode::BAD_REQUEST, &err.to_string()),
    }
}

/// `ct` form value wins, else the first recognized Accept entry, else
/// `application/json`.
pub fn negotiate_content_type(ct: Option<&str>, accept: Option<&str>) -> String {
    if let Some(ct) = ct {
        if !ct.is_empty() {
            return ct.to_string();
        }
    }
    if let Some(accept) = accept {
        for entry in accept.split(',') {
            let mime = entry.split(';').next().unwrap_or("").trim();
            if RECOGNIZED_CONTENT_TYPES.contains(&mime) {
                return mime.to_string();
            }
        }
    }
    CONTENT_TYPE_JSON.to_string()
}

/// Client address: first `X-Forwarded-For` entry, then `X-Real-IP`, then
/// the socket peer. A present but unparseable header yields no address.
pub fn client_ip_from_request(headers: &HeaderMap, peer: SocketAddr) -> Option<IpAddr> {
    if let Some(xff) = headers.get("X-Forwarded-For").and_then(|v| v.to_str().ok()) {
        if !xff.is_empty() {
            let first = xff.split(',').next().unwrap_or("");
            return first.trim().parse().ok();
        }
    }
    if let Some(real_ip) = headers.get("X-Real-IP").and_then(|v| v.to_str().ok()) {
        if !real_ip.is_empty() {
            return real_ip.trim().parse().ok();
        }
    }
    Some(peer.ip())
}

/// `de` is presence-based, not a tri-state boolean like `cd`/`do`: any
/// non-empty value (even `de=0`) disables ECS synthesis.
fn ecs_disabled(params: &HashMap<String, String>) -> bool {
    params.get("de").map(|v| !v.is_empty()).unwrap_or(false)
}

fn parse_generic_bool(raw: &str, default: bool) -> Option<bool> {
    match raw {
        "" => Some(default),
        "1" | "true" => Some(true),
        "0" | "false" => Some(false),
        _ => None,
    }
}

fn aborted_context(client_ip: Option<IpAddr>, message: String) -> Context {
    let ctx = Context::new(client_ip, Message::default());
    ctx.abort_with_err(ApexError::Parse(message));
    ctx
}

/// Google JSON API form. Recognized by the presence of a non-empty
/// `name` value; returns `None` otherwise so the IETF parser gets a try.
pub fn parse_google_doh(
    params: &HashMap<String, String>,
    client_ip: Option<IpAddr>,
) -> Option<Context> {
    let name = params.get("name").filter(|n| !n.is_empty())?;

    let name = match idna::domain_to_ascii(name) {
        Ok(ascii) => ascii,
        Err(err) => return Some(aborted_context(client_ip, err.to_string())),
    };

    let mut rtype = RecordType::A;
    if let Some(raw) = params.get("type").filter(|t| !t.is_empty()) {
        match raw.parse::<RecordType>() {
            Ok(parsed) => rtype = parsed,
            Err(()) => {
                return Some(aborted_context(
                    client_ip,
                    format!("invalid RR type: {}", raw),
                ));
            }
        }
    }

    let cd_raw = params.get("cd").map(String::as_str).unwrap_or("");
    let Some(checking_disabled) = parse_generic_bool(cd_raw, false) else {
        return Some(aborted_context(
            client_ip,
            format!("invalid DNSSEC checking disabled(cd): {}", cd_raw),
        ));
    };

    let do_raw = params.get("do").map(String::as_str).unwrap_or("");
    let Some(dnssec_ok) = parse_generic_bool(do_raw, false) else {
        return Some(aborted_context(client_ip, format!("invalid do: {}", do_raw)));
    };

    let mut msg = Message::query(&name, rtype);
    msg.header.id = rand::random();
    msg.header.cd = checking_disabled;

    let mut opt = EdnsOpt::new();
    opt.set_do_flag(dnssec_ok);

    if !ecs_disabled(params) {
        let subnet = match params.get("edns_client_subnet").filter(|s| !s.is_empty()) {
            Some(raw) => match parse_explicit_subnet(raw) {
                Ok(subnet) => Some(subnet),
                Err(message) => return Some(aborted_context(client_ip, message)),
            },
            None => client_ip.map(|ip| ClientSubnet::for_address(ip, None)),
        };
        if let Some(subnet) = subnet {
            opt.set_client_subnet(subnet);
        }
    }
    msg.edns = Some(opt);

    Some(Context::new(client_ip, msg))
}

fn parse_explicit_subnet(raw: &str) -> std::result::Result<ClientSubnet, String> {
    match raw.split_once('/') {
        Some((ip_raw, mask_raw)) => {
            let ip: IpAddr = ip_raw
                .parse()
                .map_err(|_| format!("invalid ECS IP(edns_client_subnet): {}", raw))?;
            let mask: u8 = mask_raw
                .parse()
                .map_err(|_| format!("invalid ECS subnet(edns_client_subnet): {}", raw))?;
            Ok(ClientSubnet::for_address(ip, Some(mask)))
        }
        None => {
            let ip: IpAddr = raw
                .parse()
                .map_err(|_| format!("invalid ECS IP(edns_client_subnet): {}", raw))?;
            Ok(ClientSubnet::for_address(ip, None))
        }
    }
}

/// IETF RFC 8484 form: base64url `dns=` value or raw body bytes. Empty
/// input is not a protocol match.
pub fn parse_ietf_doh(
    params: &HashMap<String, String>,
    body: &[u8],
    client_ip: Option<IpAddr>,
) -> Option<Context> {
    let raw = match params.get("dns").filter(|d| !d.is_empty()) {
        Some(encoded) => match URL_SAFE_NO_PAD.decode(encoded) {
            Ok(decoded) => decoded,
            Err(err) => {
                return Some(aborted_context(
                    client_ip,
                    format!("invalid request body: {}", err),
                ));
            }
        },
        None => body.to_vec(),
    };
    if raw.is_empty() {
        return None;
    }

    let mut msg = match Message::unpack(&raw) {
        Ok(msg) => msg,
        Err(err) => {
            return Some(aborted_context(
                client_ip,
                format!("invalid request body: {}", err),
            ));
        }
    };

    let mut opt = msg.edns.take().unwrap_or_default();
    let has_subnet = opt.find_option(EDNS0_SUBNET).is_some();
    if !ecs_disabled(params) && !has_subnet {
        if let Some(ip) = client_ip {
            opt.set_client_subnet(ClientSubnet::for_address(ip, None));
        }
    }
    msg.edns = Some(opt);

    Some(Context::new(client_ip, msg))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    const CLIENT: &str = "203.0.113.7";

    fn client() -> Option<IpAddr> {
        Some(CLIENT.parse().unwrap())
    }

    #[test]
    fn google_parse_builds_a_query_with_ecs() {
        let ctx = parse_google_doh(&params(&[("name", "example.com")]), client()).unwrap();
        assert!(ctx.error().is_none());

        let query = ctx.query();
        let question = query.question().unwrap();
        assert_eq!(question.name, "example.com.");
        assert_eq!(question.qtype, RecordType::A);
        assert!(query.header.rd);

        let opt = query.edns.as_ref().unwrap();
        assert!(!opt.do_flag());
        let subnet = opt.client_subnet().unwrap();
        assert_eq!(subnet.family, 1);
        assert_eq!(subnet.source_netmask, 24);
        assert_eq!(subnet.address, "203.0.113.0".parse::<IpAddr>().unwrap());
    }

    #[test]
    fn google_parse_accepts_type_mnemonics_and_numbers() {
        let ctx =
            parse_google_doh(&params(&[("name", "example.com"), ("type", "aaaa")]), client())
                .unwrap();
        assert_eq!(ctx.query().question().unwrap().qtype, RecordType::AAAA);

        let ctx =
            parse_google_doh(&params(&[("name", "example.com"), ("type", "65")]), client())
                .unwrap();
        assert_eq!(ctx.query().question().unwrap().qtype, RecordType::HTTPS);
    }

    #[test]
    fn google_parse_punycodes_idn_names() {
        let ctx = parse_google_doh(&params(&[("name", "bücher.example")]), client()).unwrap();
        assert_eq!(
            ctx.query().question().unwrap().name,
            "xn--bcher-kva.example."
        );
    }

    #[test]
    fn google_parse_rejects_bad_flags_with_the_documented_errors() {
        let ctx = parse_google_doh(
            &params(&[("name", "example.com"), ("cd", "maybe")]),
            client(),
        )
        .unwrap();
        assert_eq!(
            ctx.error().unwrap().to_string(),
            "invalid DNSSEC checking disabled(cd): maybe"
        );

        let ctx = parse_google_doh(
            &params(&[("name", "example.com"), ("do", "yes")]),
            client(),
        )
        .unwrap();
        assert_eq!(ctx.error().unwrap().to_string(), "invalid do: yes");

        let ctx = parse_google_doh(
            &params(&[("name", "example.com"), ("type", "NOPE")]),
            client(),
        )
        .unwrap();
        assert_eq!(ctx.error().unwrap().to_string(), "invalid RR type: NOPE");
    }

    #[test]
    fn google_parse_explicit_and_disabled_ecs() {
        let ctx = parse_google_doh(
            &params(&[("name", "example.com"), ("edns_client_subnet", "198.51.100.0/25")]),
            client(),
        )
        .unwrap();
        let subnet = ctx.query().edns.as_ref().unwrap().client_subnet().unwrap();
        assert_eq!(subnet.source_netmask, 25);

        let ctx = parse_google_doh(
            &params(&[("name", "example.com"), ("edns_client_subnet", "not-an-ip")]),
            client(),
        )
        .unwrap();
        assert_eq!(
            ctx.error().unwrap().to_string(),
            "invalid ECS IP(edns_client_subnet): not-an-ip"
        );

        let ctx =
            parse_google_doh(&params(&[("name", "example.com"), ("de", "1")]), client()).unwrap();
        assert!(ctx.query().edns.as_ref().unwrap().client_subnet().is_none());

        // `de` is presence-based: even a falsy value disables synthesis.
        let ctx =
            parse_google_doh(&params(&[("name", "example.com"), ("de", "0")]), client()).unwrap();
        assert!(ctx.query().edns.as_ref().unwrap().client_subnet().is_none());
    }

    #[test]
    fn ietf_parse_synthesizes_ecs_for_v6_clients() {
        let query = Message::query("example.org.", RecordType::AAAA);
        let body = query.pack().unwrap();

        let ctx = parse_ietf_doh(
            &HashMap::new(),
            &body,
            Some("2001:db8::1".parse().unwrap()),
        )
        .unwrap();
        assert!(ctx.error().is_none());

        let opt = ctx.query().edns.as_ref().unwrap();
        let subnet = opt.client_subnet().unwrap();
        assert_eq!(subnet.family, 2);
        assert_eq!(subnet.source_netmask, 56);
        assert_eq!(subnet.address, "2001:db8::".parse::<IpAddr>().unwrap());
        assert_eq!(opt.udp_payload_size, crate::dns::DEFAULT_UDP_PAYLOAD);
    }

    #[test]
    fn ietf_parse_keeps_an_existing_subnet_option() {
        let mut query = Message::query("example.org.", RecordType::A);
        let mut opt = EdnsOpt::new();
        opt.set_client_subnet(ClientSubnet::for_address("198.51.100.1".parse().unwrap(), None));
        query.edns = Some(opt);

        let encoded = URL_SAFE_NO_PAD.encode(query.pack().unwrap());
        let ctx = parse_ietf_doh(&params(&[("dns", &encoded)]), &[], client()).unwrap();

        let subnet = ctx.query().edns.as_ref().unwrap().client_subnet().unwrap();
        assert_eq!(subnet.address, "198.51.100.0".parse::<IpAddr>().unwrap());
    }

    #[test]
    fn ietf_parse_empty_input_is_no_match() {
        assert!(parse_ietf_doh(&HashMap::new(), &[], client()).is_none());
    }

    #[test]
    fn ietf_parse_garbage_is_a_parse_error() {
        let ctx = parse_ietf_doh(&HashMap::new(), &[1, 2, 3], client()).unwrap();
        assert!(ctx
            .error()
            .unwrap()
            .to_string()
            .starts_with("invalid request body"));
    }

    #[test]
    fn content_type_negotiation_order() {
        assert_eq!(
            negotiate_content_type(Some(CONTENT_TYPE_DNS_MESSAGE), Some(CONTENT_TYPE_JSON)),
            CONTENT_TYPE_DNS_MESSAGE
        );
        assert_eq!(
            negotiate_content_type(None, Some("text/html, application/dns-json;q=0.9")),
            CONTENT_TYPE_DNS_JSON
        );
        assert_eq!(
            negotiate_content_type(None, Some("text/html")),
            CONTENT_TYPE_JSON
        );
        assert_eq!(negotiate_content_type(None, None), CONTENT_TYPE_JSON);
    }

    #[test]
    fn client_ip_prefers_forwarded_headers() {
        let peer: SocketAddr = "192.0.2.9:4711".parse().unwrap();

        let mut headers = HeaderMap::new();
        headers.insert("X-Forwarded-For", "203.0.113.7, 10.0.0.1".parse().unwrap());
        assert_eq!(
            client_ip_from_request(&headers, peer),
            Some(CLIENT.parse().unwrap())
        );

        let mut headers = HeaderMap::new();
        headers.insert("X-Real-IP", "198.51.100.3".parse().unwrap());
        assert_eq!(
            client_ip_from_request(&headers, peer),
            Some("198.51.100.3".parse().unwrap())
        );

        let headers = HeaderMap::new();
        assert_eq!(
            client_ip_from_request(&headers, peer),
            Some("192.0.2.9".parse().unwrap())
        );

        let mut headers = HeaderMap::new();
        headers.insert("X-Forwarded-For", "garbage".parse().unwrap());
        assert_eq!(client_ip_from_request(&headers, peer), None);
    }
}
