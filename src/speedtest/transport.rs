use super::{ClientInfo, Endpoint};
use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::StreamExt;
use serde_json::Value;
use std::time::Duration;

/// Lengths of the chunks received by one download, in arrival order.
pub type ChunkStream = BoxStream<'static, Result<usize>>;

/// The wire protocol spoken with measurement servers.
///
/// Implementations do no timing of their own; probers measure around these calls
/// and bound them with their own deadlines.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// One lightweight round trip.
    async fn ping(&self, endpoint: &Endpoint) -> Result<()>;

    /// Starts a download of at most `max_bytes`.
    async fn download(&self, endpoint: &Endpoint, max_bytes: u64) -> Result<ChunkStream>;

    /// Sends one request body and returns the bytes the server accepted.
    async fn upload(&self, endpoint: &Endpoint, body: Bytes) -> Result<u64>;

    async fn client_info(&self, endpoint: &Endpoint) -> Result<ClientInfo>;
}

/// Talks to Cloudflare-style speed servers (`/__down`, `/__up`, `/meta`).
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .user_agent(concat!("ericspeed/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }

    fn url(endpoint: &Endpoint, path: &str) -> String {
        format!("{}{}", endpoint.host.trim_end_matches('/'), path)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn ping(&self, endpoint: &Endpoint) -> Result<()> {
        let url = Self::url(endpoint, "/__down?bytes=0");
        let response = self.client.get(&url).send().await?.error_for_status()?;
        // Drain the (empty) body so the connection goes back to the pool.
        response.bytes().await?;
        Ok(())
    }

    async fn download(&self, endpoint: &Endpoint, max_bytes: u64) -> Result<ChunkStream> {
        let url = Self::url(endpoint, &format!("/__down?bytes={}", max_bytes));
        let response = self.client.get(&url).send().await?.error_for_status()?;
        let stream = response
            .bytes_stream()
            .map(|chunk| chunk.map(|c| c.len()).map_err(anyhow::Error::from));
        Ok(stream.boxed())
    }

    async fn upload(&self, endpoint: &Endpoint, body: Bytes) -> Result<u64> {
        let url = Self::url(endpoint, "/__up");
        let len = body.len() as u64;
        self.client
            .post(&url)
            .body(body)
            .send()
            .await?
            .error_for_status()?;
        Ok(len)
    }

    async fn client_info(&self, endpoint: &Endpoint) -> Result<ClientInfo> {
        let url = Self::url(endpoint, "/meta");
        let meta: Value = self
            .client
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(parse_meta(&meta))
    }
}

/// Cloudflare reports coordinates as strings; accept numbers too.
fn parse_meta(meta: &Value) -> ClientInfo {
    let text = |key: &str| meta.get(key).and_then(Value::as_str).map(str::to_string);
    let coord = |key: &str| match meta.get(key) {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.parse().ok(),
        _ => None,
    };

    ClientInfo {
        ip: text("clientIp"),
        isp: text("asOrganization"),
        country: text("country"),
        lat: coord("latitude"),
        lon: coord("longitude"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_meta_with_string_coordinates() {
        let meta = json!({
            "clientIp": "203.0.113.9",
            "asOrganization": "Example ISP",
            "country": "NL",
            "latitude": "52.37",
            "longitude": 4.89,
        });
        let info = parse_meta(&meta);
        assert_eq!(info.ip.as_deref(), Some("203.0.113.9"));
        assert_eq!(info.isp.as_deref(), Some("Example ISP"));
        assert_eq!(info.lat, Some(52.37));
        assert_eq!(info.lon, Some(4.89));
    }

    #[test]
    fn missing_meta_fields_are_none() {
        let info = parse_meta(&json!({ "country": "DE", "latitude": "n/a" }));
        assert_eq!(info.country.as_deref(), Some("DE"));
        assert!(info.ip.is_none());
        assert!(info.lat.is_none());
    }

    #[test]
    fn joins_host_without_double_slash() {
        let endpoint = Endpoint {
            id: 1,
            host: "https://speed.example/".to_string(),
            sponsor: String::new(),
            country: String::new(),
            distance_km: 0.0,
        };
        assert_eq!(
            HttpTransport::url(&endpoint, "/__up"),
            "https://speed.example/__up"
        );
    }
}
