use axum::{
    extract::{ConnectInfo, FromRequestParts},
    http::{request::Parts, HeaderMap},
};
use std::convert::Infallible;
use std::net::SocketAddr;

/// Best-effort client address used to key the login failure limiter.
#[derive(Debug, Clone)]
pub struct ClientIp(pub String);

/// The fronting proxy appends the peer it saw as the last `X-Forwarded-For`
/// entry; without a forwarded header the socket peer is used.
pub fn extract_client_ip(headers: &HeaderMap, socket: Option<&SocketAddr>) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.rsplit(',').next())
        .map(str::trim)
        .filter(|ip| !ip.is_empty())
        .map(String::from)
        .or_else(|| socket.map(|addr| addr.ip().to_string()))
        .unwrap_or_else(|| "unknown".to_string())
}

impl<S> FromRequestParts<S> for ClientIp
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let socket = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr);
        Ok(ClientIp(extract_client_ip(&parts.headers, socket)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_last_forwarded_entry_wins() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("1.1.1.1, 203.0.113.9"),
        );
        assert_eq!(extract_client_ip(&headers, None), "203.0.113.9");
    }

    #[test]
    fn test_falls_back_to_socket_then_unknown() {
        let headers = HeaderMap::new();
        let addr: SocketAddr = "192.0.2.4:5000".parse().unwrap();
        assert_eq!(extract_client_ip(&headers, Some(&addr)), "192.0.2.4");
        assert_eq!(extract_client_ip(&headers, None), "unknown");
    }
}
