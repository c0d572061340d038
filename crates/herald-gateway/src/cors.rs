use axum::http::{header, request::Parts, HeaderName, HeaderValue, Method};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::warn;

/// Which browser origins may subscribe.
///
/// Matching is exact after trimming. A `*` entry allows everything; there
/// is no other wildcard or suffix matching.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CorsPolicy {
    Any,
    Origins(Vec<String>),
}

impl CorsPolicy {
    /// Parse the comma-separated `cors_origins` setting.
    pub fn parse(origins: &str) -> Self {
        let list: Vec<String> = origins
            .split(',')
            .map(str::trim)
            .filter(|o| !o.is_empty())
            .map(str::to_string)
            .collect();
        if list.iter().any(|o| o == "*") {
            CorsPolicy::Any
        } else {
            CorsPolicy::Origins(list)
        }
    }

    pub fn allows(&self, origin: &str) -> bool {
        match self {
            CorsPolicy::Any => true,
            CorsPolicy::Origins(list) => list.iter().any(|o| o == origin),
        }
    }

    pub fn layer(&self) -> CorsLayer {
        let base = CorsLayer::new()
            .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
            .allow_headers([
                header::CACHE_CONTROL,
                header::CONTENT_TYPE,
                HeaderName::from_static(herald_core::config::LAST_EVENT_ID_HEADER),
            ]);

        match self {
            CorsPolicy::Any => base.allow_origin(AllowOrigin::any()),
            CorsPolicy::Origins(_) => {
                let policy = self.clone();
                base.allow_origin(AllowOrigin::predicate(
                    move |origin: &HeaderValue, _parts: &Parts| {
                        let origin = origin.to_str().unwrap_or_default();
                        let allowed = policy.allows(origin);
                        if !allowed {
                            warn!(origin, "CORS request from disallowed origin");
                        }
                        allowed
                    },
                ))
            }
        }
    }
}
