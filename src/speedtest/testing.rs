//! Scripted in-memory transport for unit tests. Timing is driven by tokio's clock,
//! so tests run with `start_paused = true` and see exact durations.

use super::transport::{ChunkStream, Transport};
use super::{ClientInfo, Endpoint};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

pub(crate) fn endpoint(id: u32) -> Endpoint {
    Endpoint {
        id,
        host: format!("https://speed{}.example", id),
        sponsor: format!("Sponsor {}", id),
        country: "NL".to_string(),
        distance_km: 0.0,
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum PingScript {
    Rtt(Duration),
    /// Each attempt fails after the given delay.
    Unreachable(Duration),
    /// Rtts used in turn; attempts past the end fail.
    Sequence(&'static [u64]),
}

#[derive(Debug, Clone)]
pub(crate) struct StreamScript {
    chunk_bytes: usize,
    delay: Duration,
    total_chunks: Option<usize>,
    error_after_chunks: Option<usize>,
    failing_opens: usize,
}

impl StreamScript {
    /// A chunk of `chunk_bytes` every `delay`, forever. For uploads the body size is
    /// what gets acknowledged and `delay` is the per-request latency.
    pub fn steady(chunk_bytes: usize, delay: Duration) -> Self {
        Self {
            chunk_bytes,
            delay,
            total_chunks: None,
            error_after_chunks: None,
            failing_opens: 0,
        }
    }

    pub fn with_total_chunks(mut self, chunks: usize) -> Self {
        self.total_chunks = Some(chunks);
        self
    }

    pub fn failing_after(mut self, chunks: usize) -> Self {
        self.error_after_chunks = Some(chunks);
        self
    }

    /// The first `count` download opens (or upload requests) fail.
    pub fn failing_opens(mut self, count: usize) -> Self {
        self.failing_opens = count;
        self
    }
}

pub(crate) struct FakeTransport {
    pings: HashMap<u32, PingScript>,
    ping_calls: Mutex<HashMap<u32, usize>>,
    download: StreamScript,
    upload: StreamScript,
    download_opens: AtomicUsize,
    upload_calls: AtomicUsize,
    upload_sizes: Mutex<Vec<usize>>,
    client: Option<ClientInfo>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self {
            pings: HashMap::new(),
            ping_calls: Mutex::new(HashMap::new()),
            download: StreamScript::steady(1_000_000, Duration::from_millis(100)),
            upload: StreamScript::steady(0, Duration::from_millis(100)),
            download_opens: AtomicUsize::new(0),
            upload_calls: AtomicUsize::new(0),
            upload_sizes: Mutex::new(Vec::new()),
            client: Some(ClientInfo {
                ip: Some("198.51.100.7".to_string()),
                isp: Some("Example Net".to_string()),
                country: Some("NL".to_string()),
                lat: Some(52.0),
                lon: Some(4.0),
            }),
        }
    }

    pub fn with_ping(mut self, endpoint_id: u32, script: PingScript) -> Self {
        self.pings.insert(endpoint_id, script);
        self
    }

    pub fn with_download(mut self, script: StreamScript) -> Self {
        self.download = script;
        self
    }

    pub fn with_upload(mut self, script: StreamScript) -> Self {
        self.upload = script;
        self
    }

    pub fn without_client_info(mut self) -> Self {
        self.client = None;
        self
    }

    pub fn upload_sizes(&self) -> Vec<usize> {
        self.upload_sizes.lock().clone()
    }

    pub fn download_opens(&self) -> usize {
        self.download_opens.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn ping(&self, endpoint: &Endpoint) -> Result<()> {
        let attempt = {
            let mut calls = self.ping_calls.lock();
            let count = calls.entry(endpoint.id).or_insert(0);
            *count += 1;
            *count - 1
        };

        match self.pings.get(&endpoint.id) {
            Some(PingScript::Rtt(rtt)) => {
                tokio::time::sleep(*rtt).await;
                Ok(())
            }
            Some(PingScript::Unreachable(after)) => {
                tokio::time::sleep(*after).await;
                Err(anyhow!("connection refused"))
            }
            Some(PingScript::Sequence(rtts)) => match rtts.get(attempt) {
                Some(ms) => {
                    tokio::time::sleep(Duration::from_millis(*ms)).await;
                    Ok(())
                }
                None => Err(anyhow!("connection reset")),
            },
            None => Err(anyhow!("no route to {}", endpoint.host)),
        }
    }

    async fn download(&self, _endpoint: &Endpoint, _max_bytes: u64) -> Result<ChunkStream> {
        let open = self.download_opens.fetch_add(1, Ordering::SeqCst);
        let script = self.download.clone();
        if open < script.failing_opens {
            return Err(anyhow!("download refused"));
        }

        let stream = futures::stream::unfold(0usize, move |sent| {
            let script = script.clone();
            async move {
                if script.total_chunks.is_some_and(|total| sent >= total) {
                    return None;
                }
                if script.error_after_chunks.is_some_and(|after| sent >= after) {
                    if sent == usize::MAX {
                        return None;
                    }
                    return Some((Err(anyhow!("connection reset")), usize::MAX));
                }
                tokio::time::sleep(script.delay).await;
                Some((Ok(script.chunk_bytes), sent + 1))
            }
        });
        Ok(stream.boxed())
    }

    async fn upload(&self, _endpoint: &Endpoint, body: Bytes) -> Result<u64> {
        let call = self.upload_calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.upload.delay).await;
        if call < self.upload.failing_opens {
            return Err(anyhow!("upload rejected"));
        }
        self.upload_sizes.lock().push(body.len());
        Ok(body.len() as u64)
    }

    async fn client_info(&self, _endpoint: &Endpoint) -> Result<ClientInfo> {
        self.client
            .clone()
            .ok_or_else(|| anyhow!("meta lookup failed"))
    }
}
