use std::collections::BTreeMap;
use std::net::SocketAddr;

use axum::extract::Query;
use axum::http::{header, HeaderMap, Method, Uri};
use herald_core::config::{LAST_EVENT_ID_HEADER, LAST_EVENT_ID_QUERY, TOPIC_QUERY};

use crate::connection::ConnectionMeta;

/// A subscribe attempt, reduced to what admission and the connection need.
#[derive(Debug, Clone)]
pub struct StreamRequest {
    pub method: Method,
    pub client_address: String,
    pub user_agent: String,
    /// Lowercased header names; repeated headers joined with ", ".
    pub headers: BTreeMap<String, String>,
    /// Repeated keys joined with ",".
    pub query_parameters: BTreeMap<String, String>,
    pub topic: String,
    pub last_event_id: String,
}

impl StreamRequest {
    /// A bare `GET` with no topic and no replay cursor.
    pub fn get() -> Self {
        Self {
            method: Method::GET,
            client_address: "unknown".to_string(),
            user_agent: String::new(),
            headers: BTreeMap::new(),
            query_parameters: BTreeMap::new(),
            topic: String::new(),
            last_event_id: String::new(),
        }
    }

    pub fn with_method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = topic.into();
        self
    }

    pub fn with_last_event_id(mut self, id: impl Into<String>) -> Self {
        self.last_event_id = id.into();
        self
    }

    /// Extract everything from the incoming HTTP request.
    ///
    /// The replay cursor comes from the `Last-Event-ID` header, falling back
    /// to the `lastEventId` query parameter. Topic is the first `topic` value.
    pub fn from_http(
        method: &Method,
        headers: &HeaderMap,
        uri: &Uri,
        peer: Option<SocketAddr>,
    ) -> Self {
        let pairs = Query::<Vec<(String, String)>>::try_from_uri(uri)
            .map(|q| q.0)
            .unwrap_or_default();

        let first = |key: &str| {
            pairs
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.clone())
                .unwrap_or_default()
        };

        let last_event_id = header_str(headers, LAST_EVENT_ID_HEADER)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| first(LAST_EVENT_ID_QUERY));

        let mut query_parameters: BTreeMap<String, String> = BTreeMap::new();
        for (k, v) in &pairs {
            query_parameters
                .entry(k.clone())
                .and_modify(|existing| {
                    existing.push(',');
                    existing.push_str(v);
                })
                .or_insert_with(|| v.clone());
        }

        Self {
            method: method.clone(),
            client_address: client_address(headers, peer),
            user_agent: header_str(headers, header::USER_AGENT.as_str())
                .unwrap_or_default()
                .to_string(),
            headers: flatten_headers(headers),
            query_parameters,
            topic: first(TOPIC_QUERY),
            last_event_id,
        }
    }

    pub(crate) fn into_meta(self) -> ConnectionMeta {
        ConnectionMeta {
            client_address: self.client_address,
            user_agent: self.user_agent,
            headers: self.headers,
            query_parameters: self.query_parameters,
            topic: self.topic,
            last_event_id: self.last_event_id,
            ..ConnectionMeta::new()
        }
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok()).map(str::trim)
}

fn flatten_headers(headers: &HeaderMap) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();
    for name in headers.keys() {
        let joined = headers
            .get_all(name)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .collect::<Vec<_>>()
            .join(", ");
        out.insert(name.as_str().to_string(), joined);
    }
    out
}

/// Best guess at the real client: first `X-Forwarded-For` hop, then
/// `X-Real-IP`, then the socket peer.
pub fn client_address(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    if let Some(first_hop) = header_str(headers, "x-forwarded-for")
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
    {
        return first_hop.to_string();
    }
    if let Some(real_ip) = header_str(headers, "x-real-ip").filter(|v| !v.is_empty()) {
        return real_ip.to_string();
    }
    peer.map(|addr| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}
