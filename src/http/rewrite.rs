//! Outbound URL rewriting.
//!
//! # Responsibilities
//! - Strip the tenant slug segment from the request path
//! - Retarget scheme and authority to the environment's upstream, or to an
//!   explicit origin override
//! - Keep the Host header in sync with the new authority
//!
//! # Design Decisions
//! - No resolved environment and no override = request left untouched
//! - Query strings are carried over unchanged

use axum::http::uri::{Authority, PathAndQuery, Scheme};
use axum::http::{header, request::Parts, HeaderValue, Uri};
use std::str::FromStr;

use crate::tenant::model::Environment;

/// Scheme and authority a request is forwarded to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Origin {
    pub scheme: Scheme,
    pub authority: Authority,
}

impl Origin {
    /// Parse `https://host:port`, `http://host` or a bare `host[:port]` (http).
    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim();
        if value.is_empty() {
            return None;
        }

        if value.contains("://") {
            let url = url::Url::parse(value).ok()?;
            let scheme = Scheme::from_str(url.scheme()).ok()?;
            let host = url.host_str()?;
            let authority = match url.port() {
                Some(port) => format!("{host}:{port}"),
                None => host.to_string(),
            };
            return Some(Self {
                scheme,
                authority: Authority::from_str(&authority).ok()?,
            });
        }

        Some(Self {
            scheme: Scheme::HTTP,
            authority: Authority::from_str(value).ok()?,
        })
    }

    /// Upstream origin for an environment.
    pub fn for_environment(env: &Environment) -> Option<Self> {
        Some(Self {
            scheme: if env.use_tls { Scheme::HTTPS } else { Scheme::HTTP },
            authority: Authority::from_str(&env.upstream_host).ok()?,
        })
    }
}

/// Remove the environment slug from the front of `path`.
///
/// `slug` → `/`, `slug/rest` → `/rest`, with or without a leading `/`.
/// Paths that do not start with the slug segment are returned unchanged.
pub fn strip_tenant_prefix(slug: &str, path: &str) -> String {
    let unchanged = || {
        if path.is_empty() {
            "/".to_string()
        } else {
            path.to_string()
        }
    };
    if slug.is_empty() {
        return unchanged();
    }

    let trimmed = path.strip_prefix('/').unwrap_or(path);
    match trimmed.strip_prefix(slug) {
        Some("") => "/".to_string(),
        Some(rest) if rest.starts_with('/') => rest.to_string(),
        _ => unchanged(),
    }
}

/// Pick the forwarding origin: override header, then environment, else none.
pub fn rewrite_target(override_host: Option<&str>, env: Option<&Environment>) -> Option<Origin> {
    if let Some(value) = override_host.filter(|v| !v.trim().is_empty()) {
        match Origin::parse(value) {
            Some(origin) => return Some(origin),
            None => tracing::warn!(value = %value, "Ignoring unparseable origin override"),
        }
    }

    let env = env?;
    let origin = Origin::for_environment(env);
    if origin.is_none() {
        tracing::warn!(slug = %env.slug, upstream_host = %env.upstream_host, "Environment has an invalid upstream host");
    }
    origin
}

/// Point the outbound request at `origin`, stripping the environment slug.
pub fn apply_rewrite(parts: &mut Parts, origin: &Origin, env: Option<&Environment>) {
    let path = parts.uri.path();
    let path = match env {
        Some(env) => strip_tenant_prefix(&env.slug, path),
        None => strip_tenant_prefix("", path),
    };
    let path_and_query = match parts.uri.query() {
        Some(q) => format!("{path}?{q}"),
        None => path,
    };

    let uri = PathAndQuery::from_str(&path_and_query).ok().and_then(|pq| {
        Uri::builder()
            .scheme(origin.scheme.clone())
            .authority(origin.authority.clone())
            .path_and_query(pq)
            .build()
            .ok()
    });

    match uri {
        Some(uri) => parts.uri = uri,
        None => {
            tracing::warn!(path = %path_and_query, "Could not rebuild outbound URI");
            return;
        }
    }

    if let Ok(host) = HeaderValue::from_str(origin.authority.as_str()) {
        parts.headers.insert(header::HOST, host);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    fn env(slug: &str, host: &str, use_tls: bool) -> Environment {
        Environment {
            id: "env-1".into(),
            slug: slug.into(),
            upstream_host: host.into(),
            use_tls,
            project_id: None,
            api_id: None,
            running: true,
        }
    }

    #[test]
    fn test_strip_tenant_prefix() {
        assert_eq!(strip_tenant_prefix("foo", "/foo"), "/");
        assert_eq!(strip_tenant_prefix("foo", "foo"), "/");
        assert_eq!(strip_tenant_prefix("foo", "/foo/bar"), "/bar");
        assert_eq!(strip_tenant_prefix("foo", "foo/bar"), "/bar");
        assert_eq!(strip_tenant_prefix("foo", "foo/bar/"), "/bar/");
        assert_eq!(strip_tenant_prefix("foo", "/foo/x/"), "/x/");
    }

    #[test]
    fn test_strip_leaves_other_paths_alone() {
        assert_eq!(strip_tenant_prefix("foo", "/foobar/x"), "/foobar/x");
        assert_eq!(strip_tenant_prefix("foo", "/bar/foo"), "/bar/foo");
        assert_eq!(strip_tenant_prefix("", "/bar"), "/bar");
        assert_eq!(strip_tenant_prefix("", ""), "/");
    }

    #[test]
    fn test_origin_parse() {
        let o = Origin::parse("https://api.example.com:8443").unwrap();
        assert_eq!(o.scheme, Scheme::HTTPS);
        assert_eq!(o.authority.as_str(), "api.example.com:8443");

        let o = Origin::parse("localhost:3000").unwrap();
        assert_eq!(o.scheme, Scheme::HTTP);
        assert_eq!(o.authority.as_str(), "localhost:3000");

        assert!(Origin::parse("").is_none());
        assert!(Origin::parse("http://").is_none());
    }

    #[test]
    fn test_target_priority() {
        let e = env("acme", "api.internal:9000", true);

        let o = rewrite_target(Some("http://override.test"), Some(&e)).unwrap();
        assert_eq!(o.authority.as_str(), "override.test");

        let o = rewrite_target(None, Some(&e)).unwrap();
        assert_eq!(o.scheme, Scheme::HTTPS);
        assert_eq!(o.authority.as_str(), "api.internal:9000");

        // Garbage override falls back to the environment.
        let o = rewrite_target(Some("http://"), Some(&e)).unwrap();
        assert_eq!(o.authority.as_str(), "api.internal:9000");

        assert!(rewrite_target(None, None).is_none());
    }

    #[test]
    fn test_apply_rewrite() {
        let e = env("acme", "api.internal:9000", false);
        let (mut parts, _) = Request::builder()
            .uri("/acme/widgets?x=1")
            .header("host", "proxy.local")
            .body(())
            .unwrap()
            .into_parts();

        let origin = rewrite_target(None, Some(&e)).unwrap();
        apply_rewrite(&mut parts, &origin, Some(&e));

        assert_eq!(parts.uri.scheme_str(), Some("http"));
        assert_eq!(parts.uri.authority().unwrap().as_str(), "api.internal:9000");
        assert_eq!(parts.uri.path_and_query().unwrap().as_str(), "/widgets?x=1");
        assert_eq!(parts.headers["host"], "api.internal:9000");
    }
}
