//! Connection string parsing.
//!
//! Accepted forms, with comma-separated hosts sharing one scheme:
//! `host`, `host:port`, `[v6]:port`, `http://…`, `https://…`,
//! `couchbase://…` and `couchbases://…`. The result is one management base
//! URL per host, e.g. `https://10.0.0.1:18091`.

use crate::error::ConnectError;

pub const MANAGEMENT_PORT: u16 = 8091;
pub const MANAGEMENT_TLS_PORT: u16 = 18091;

pub fn parse_connection_string(input: &str) -> Result<Vec<String>, ConnectError> {
    let input = input.trim();
    let invalid = |reason: &str| ConnectError::InvalidConnectionString(format!("{input:?}: {reason}"));

    let (tls, rest) = match input.split_once("://") {
        Some((scheme, rest)) => match scheme.to_ascii_lowercase().as_str() {
            "http" | "couchbase" => (false, rest),
            "https" | "couchbases" => (true, rest),
            _ => return Err(invalid("unsupported scheme")),
        },
        None => (false, input),
    };

    // Drop any path or query.
    let rest = rest
        .split(|c: char| c == '/' || c == '?')
        .next()
        .unwrap_or_default();

    let mut urls = Vec::new();
    for part in rest.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let (host, port) = split_host_port(part).map_err(|reason| invalid(reason))?;
        let url = base_url(&host, port, tls);
        if !urls.contains(&url) {
            urls.push(url);
        }
    }

    if urls.is_empty() {
        return Err(invalid("no hosts"));
    }
    Ok(urls)
}

/// Management base URL for a node's `hostname` as reported by the cluster
/// (`host:8091`), rewritten to the TLS port when the session uses TLS.
pub fn node_base_url(hostname: &str, tls: bool) -> Option<String> {
    let (host, port) = split_host_port(hostname).ok()?;
    let port = match port {
        Some(MANAGEMENT_PORT) if tls => Some(MANAGEMENT_TLS_PORT),
        other => other,
    };
    Some(base_url(&host, port, tls))
}

fn base_url(host: &str, port: Option<u16>, tls: bool) -> String {
    let (scheme, default_port) = if tls {
        ("https", MANAGEMENT_TLS_PORT)
    } else {
        ("http", MANAGEMENT_PORT)
    };
    format!("{scheme}://{host}:{}", port.unwrap_or(default_port))
}

/// Split `host[:port]`, bracketing IPv6 literals.
fn split_host_port(s: &str) -> Result<(String, Option<u16>), &'static str> {
    let (host, port) = if let Some(rest) = s.strip_prefix('[') {
        let (addr, after) = rest.split_once(']').ok_or("unterminated IPv6 literal")?;
        let port = match after {
            "" => None,
            p => Some(p.strip_prefix(':').ok_or("junk after IPv6 literal")?),
        };
        (format!("[{addr}]"), port)
    } else if s.matches(':').count() > 1 {
        (format!("[{s}]"), None)
    } else {
        match s.split_once(':') {
            Some((host, port)) => (host.to_string(), Some(port)),
            None => (s.to_string(), None),
        }
    };

    if host.is_empty() || host == "[]" {
        return Err("empty host");
    }
    let port = port
        .map(|p| p.parse::<u16>().ok().filter(|p| *p != 0).ok_or("invalid port"))
        .transpose()?;
    Ok((host, port))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_host_gets_default_port() {
        assert_eq!(
            parse_connection_string("10.0.0.1").unwrap(),
            vec!["http://10.0.0.1:8091"]
        );
    }

    #[test]
    fn explicit_port_is_kept() {
        assert_eq!(
            parse_connection_string("http://db.local:9000").unwrap(),
            vec!["http://db.local:9000"]
        );
    }

    #[test]
    fn tls_schemes_use_tls_port() {
        assert_eq!(
            parse_connection_string("couchbases://a,b").unwrap(),
            vec!["https://a:18091", "https://b:18091"]
        );
        assert_eq!(
            parse_connection_string("https://a/ui/index.html").unwrap(),
            vec!["https://a:18091"]
        );
    }

    #[test]
    fn multiple_hosts_are_deduplicated() {
        assert_eq!(
            parse_connection_string("couchbase://a, b ,a").unwrap(),
            vec!["http://a:8091", "http://b:8091"]
        );
    }

    #[test]
    fn ipv6_literals() {
        assert_eq!(
            parse_connection_string("[::1]:8091").unwrap(),
            vec!["http://[::1]:8091"]
        );
        assert_eq!(
            parse_connection_string("https://fe80::1").unwrap(),
            vec!["https://[fe80::1]:18091"]
        );
    }

    #[test]
    fn rejects_garbage() {
        for input in ["", "ftp://a", "a:notaport", "a:0", "[::1", "http://", ",,"] {
            assert!(
                matches!(
                    parse_connection_string(input),
                    Err(ConnectError::InvalidConnectionString(_))
                ),
                "{input}"
            );
        }
    }

    #[test]
    fn node_urls_follow_session_scheme() {
        assert_eq!(
            node_base_url("10.0.0.2:8091", true).as_deref(),
            Some("https://10.0.0.2:18091")
        );
        assert_eq!(
            node_base_url("10.0.0.2:8091", false).as_deref(),
            Some("http://10.0.0.2:8091")
        );
        assert_eq!(
            node_base_url("[::1]:9000", true).as_deref(),
            Some("https://[::1]:9000")
        );
    }
}
