//! Sends RPC calls as HTTP POST requests to a list of equivalent endpoints,
//! failing over to the next endpoint when one misbehaves.

use {
    crate::{
        error::Error,
        instrumentation::Metrics,
        jsonrpc::{RequestId, RpcCall, RpcResponse},
        transport::Transport,
    },
    anyhow::{Result, ensure},
    reqwest::{Client, header},
    std::{
        fmt::{self, Debug, Formatter},
        sync::{
            Arc,
            atomic::{AtomicU64, AtomicUsize, Ordering},
        },
    },
    url::Url,
};

/// Performs a single POST of a serialized request.
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait HttpPost: Send + Sync + 'static {
    /// Returns the response body of a successful (2xx) response.
    async fn post(
        &self,
        url: Url,
        method: String,
        id: RequestId,
        body: String,
    ) -> Result<String, Error>;
}

/// [`HttpPost`] backed by `reqwest`.
pub struct ReqwestPost {
    client: Client,
    auth: Option<String>,
}

impl ReqwestPost {
    pub fn new(client: Client, auth: Option<String>) -> Self {
        Self { client, auth }
    }
}

#[async_trait::async_trait]
impl HttpPost for ReqwestPost {
    async fn post(
        &self,
        url: Url,
        method: String,
        id: RequestId,
        body: String,
    ) -> Result<String, Error> {
        let mut request = self
            .client
            .post(url)
            .header(header::CONTENT_TYPE, "application/json")
            .header("X-RPC-REQUEST-ID", id.to_string())
            .header("X-RPC-METHOD", method)
            .body(body);
        if let Some(auth) = &self.auth {
            request = request.basic_auth("", Some(auth));
        }

        let response = request
            .send()
            .await
            .map_err(|err| Error::Transport(err.to_string()))?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|err| Error::Transport(err.to_string()))?;
        if !status.is_success() {
            return Err(Error::Transport(format!("HTTP error {status}")));
        }
        Ok(text)
    }
}

#[derive(Clone, Debug)]
pub struct Config {
    /// How often a rate limited request is retried against the same endpoint
    /// before the endpoint counts as failed.
    pub rate_limit_max_retries: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            rate_limit_max_retries: 5,
        }
    }
}

#[derive(Clone)]
pub struct HttpTransport {
    inner: Arc<Inner>,
}

struct Inner {
    poster: Box<dyn HttpPost>,
    urls: Vec<Url>,
    /// Endpoint the next call starts with: the last one that answered.
    current: AtomicUsize,
    id: AtomicU64,
    config: Config,
    metrics: &'static Metrics,
}

impl HttpTransport {
    pub fn new(client: Client, urls: Vec<Url>, auth: Option<String>, config: Config) -> Result<Self> {
        Self::with_poster(ReqwestPost::new(client, auth), urls, config)
    }

    pub fn with_poster(poster: impl HttpPost, urls: Vec<Url>, config: Config) -> Result<Self> {
        ensure!(!urls.is_empty(), "at least one node url is required");
        Ok(Self {
            inner: Arc::new(Inner {
                poster: Box::new(poster),
                urls,
                current: AtomicUsize::new(0),
                id: AtomicU64::new(0),
                config,
                metrics: Metrics::get(),
            }),
        })
    }

    fn next_id(&self) -> RequestId {
        self.inner.id.fetch_add(1, Ordering::SeqCst) + 1
    }
}

impl Debug for HttpTransport {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpTransport")
            .field("urls", &self.inner.urls)
            .finish()
    }
}

fn endpoint(url: &Url) -> &str {
    url.host_str().unwrap_or("unknown")
}

impl Inner {
    /// Tries every endpoint twice, starting at the one that answered last.
    async fn execute(&self, call: &RpcCall, id: RequestId) -> Result<RpcResponse, Error> {
        let body = call.to_json(id);
        let start = self.current.load(Ordering::SeqCst);
        let attempts = 2 * self.urls.len();
        let mut last_error = Error::Transport("no attempt made".to_string());

        for attempt in 0..attempts {
            let index = (start + attempt) % self.urls.len();
            let url = &self.urls[index];
            match self.attempt(url, call, id, &body).await {
                Ok(response) => {
                    self.current.store(index, Ordering::SeqCst);
                    return Ok(response);
                }
                // Malformed envelopes rotate like transport errors: a broken
                // response says more about the endpoint than the request.
                Err(err) => {
                    tracing::warn!(url = %endpoint(url), %id, attempt, ?err, "rpc attempt failed");
                    self.metrics.on_failover(endpoint(url));
                    last_error = err;
                }
            }
        }
        Err(last_error)
    }

    /// One attempt against one endpoint. Rate limit responses are retried
    /// here after the delay the node asked for, so they never count as a
    /// failed attempt unless they keep coming.
    async fn attempt(
        &self,
        url: &Url,
        call: &RpcCall,
        id: RequestId,
        body: &str,
    ) -> Result<RpcResponse, Error> {
        let mut backoffs = 0;
        loop {
            let text = {
                let _timer = self
                    .metrics
                    .on_request_start(endpoint(url), &call.method);
                tracing::trace!(url = %endpoint(url), %id, %body, "executing request");
                self.poster
                    .post(url.clone(), call.method.to_string(), id, body.to_string())
                    .await?
            };
            tracing::trace!(url = %endpoint(url), %id, body = %text.trim(), "received response");

            let response = RpcResponse::from_str(&text)?;
            if response.id() != id {
                return Err(Error::Transport(format!(
                    "response id {} does not match request id {id}",
                    response.id()
                )));
            }

            let rate_limit = match response.fault() {
                Some(fault) if fault.is_rate_limit() => Some(fault.clone()),
                _ => None,
            };
            let Some(fault) = rate_limit else {
                return Ok(response);
            };
            if backoffs >= self.config.rate_limit_max_retries {
                return Err(Error::Rpc(fault));
            }
            let delay = fault.backoff();
            tracing::debug!(url = %endpoint(url), %id, ?delay, "rate limited, backing off");
            self.metrics.on_rate_limit(endpoint(url));
            backoffs += 1;
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait::async_trait]
impl Transport for HttpTransport {
    fn source(&self) -> String {
        self.inner
            .urls
            .iter()
            .map(endpoint)
            .collect::<Vec<_>>()
            .join(", ")
    }

    async fn send(&self, call: RpcCall) -> Result<RpcResponse, Error> {
        let id = self.next_id();
        self.inner.execute(&call, id).await
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{jsonrpc::methods, transport::TransportExt},
        serde_json::json,
        std::{sync::Mutex, time::Duration},
        tokio::time::Instant,
    };

    fn urls(hosts: &[&str]) -> Vec<Url> {
        hosts
            .iter()
            .map(|host| format!("http://{host}").parse().unwrap())
            .collect()
    }

    fn success(id: RequestId, result: &str) -> String {
        json!({ "jsonrpc": "2.0", "id": id, "result": result }).to_string()
    }

    fn fault(id: RequestId, code: i64, data: serde_json::Value) -> String {
        json!({
            "jsonrpc": "2.0",
            "id": id,
            "error": { "code": code, "message": "nope", "data": data },
        })
        .to_string()
    }

    /// Poster answering `0x1` from every host except the failing ones and
    /// recording which host every attempt went to.
    fn poster(failing: Vec<&'static str>, visited: Arc<Mutex<Vec<String>>>) -> MockHttpPost {
        let mut poster = MockHttpPost::new();
        poster.expect_post().returning(move |url, _, id, _| {
            let host = url.host_str().unwrap().to_string();
            visited.lock().unwrap().push(host.clone());
            if failing.iter().any(|failing| *failing == host) {
                Err(Error::Transport(format!("{host} is down")))
            } else {
                Ok(success(id, "0x1"))
            }
        });
        poster
    }

    #[tokio::test]
    async fn succeeds_iff_some_endpoint_answers() {
        let hosts = ["a", "b", "c"];
        for mask in 0..(1 << hosts.len()) {
            let failing: Vec<&'static str> = hosts
                .iter()
                .enumerate()
                .filter(|(i, _)| mask & (1 << i) != 0)
                .map(|(_, host)| *host)
                .collect();
            let visited = Arc::new(Mutex::new(Vec::new()));
            let transport = HttpTransport::with_poster(
                poster(failing.clone(), visited.clone()),
                urls(&hosts),
                Config::default(),
            )
            .unwrap();

            let result = transport.fetch(methods::block_number()).await;
            let visited = visited.lock().unwrap().clone();
            if failing.len() == hosts.len() {
                assert_eq!(visited.len(), 2 * hosts.len(), "{failing:?}");
                assert_eq!(result, Err(Error::Transport("c is down".into())));
            } else {
                assert_eq!(result, Ok(1), "{failing:?}");
                let first_healthy = hosts.iter().find(|host| !failing.contains(*host)).unwrap();
                assert_eq!(visited.last().unwrap(), first_healthy);
            }
        }
    }

    #[tokio::test]
    async fn next_call_starts_at_last_healthy_endpoint() {
        let visited = Arc::new(Mutex::new(Vec::new()));
        let transport = HttpTransport::with_poster(
            poster(vec!["a"], visited.clone()),
            urls(&["a", "b"]),
            Config::default(),
        )
        .unwrap();

        transport.fetch(methods::block_number()).await.unwrap();
        transport.fetch(methods::block_number()).await.unwrap();
        assert_eq!(*visited.lock().unwrap(), vec!["a", "b", "b"]);
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limit_retries_same_endpoint_after_backoff() {
        let attempts = Arc::new(Mutex::new(Vec::new()));
        let mut poster = MockHttpPost::new();
        poster.expect_post().returning({
            let attempts = attempts.clone();
            move |url, _, id, _| {
                let mut attempts = attempts.lock().unwrap();
                attempts.push((url.host_str().unwrap().to_string(), Instant::now()));
                Ok(match attempts.len() {
                    1 => fault(id, -32005, json!({ "backoff_seconds": 2 })),
                    _ => success(id, "0x2a"),
                })
            }
        });
        let transport =
            HttpTransport::with_poster(poster, urls(&["a", "b"]), Config::default()).unwrap();

        assert_eq!(transport.fetch(methods::block_number()).await, Ok(42));

        let attempts = attempts.lock().unwrap();
        assert_eq!(attempts.len(), 2);
        assert_eq!(attempts[0].0, "a");
        assert_eq!(attempts[1].0, "a");
        assert!(attempts[1].1 - attempts[0].1 >= Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn absurd_backoff_is_capped() {
        let mut poster = MockHttpPost::new();
        let mut calls = 0;
        poster.expect_post().returning(move |_, _, id, _| {
            calls += 1;
            Ok(match calls {
                1 => fault(id, -32005, json!({ "backoff_seconds": 1e30 })),
                _ => success(id, "0x1"),
            })
        });
        let transport =
            HttpTransport::with_poster(poster, urls(&["a"]), Config::default()).unwrap();

        let start = Instant::now();
        assert_eq!(transport.fetch(methods::block_number()).await, Ok(1));
        let waited = start.elapsed();
        assert!(waited >= crate::error::MAX_BACKOFF);
        assert!(waited < crate::error::MAX_BACKOFF + Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn persistent_rate_limit_counts_as_failed_attempt() {
        let visited = Arc::new(Mutex::new(Vec::new()));
        let mut poster = MockHttpPost::new();
        poster.expect_post().returning({
            let visited = visited.clone();
            move |url, _, id, _| {
                let host = url.host_str().unwrap().to_string();
                visited.lock().unwrap().push(host.clone());
                Ok(match host.as_str() {
                    "a" => fault(id, -32005, json!(null)),
                    _ => success(id, "0x7"),
                })
            }
        });
        let transport = HttpTransport::with_poster(
            poster,
            urls(&["a", "b"]),
            Config {
                rate_limit_max_retries: 1,
            },
        )
        .unwrap();

        assert_eq!(transport.fetch(methods::block_number()).await, Ok(7));
        assert_eq!(*visited.lock().unwrap(), vec!["a", "a", "b"]);
    }

    #[tokio::test]
    async fn node_faults_are_not_retried() {
        let mut poster = MockHttpPost::new();
        poster
            .expect_post()
            .times(1)
            .returning(|_, _, id, _| Ok(fault(id, -32000, json!("execution reverted"))));
        let transport =
            HttpTransport::with_poster(poster, urls(&["a", "b"]), Config::default()).unwrap();

        let result = transport.fetch(methods::block_number()).await;
        assert!(matches!(result, Err(Error::Rpc(fault)) if fault.code == -32000));
    }

    #[tokio::test]
    async fn malformed_responses_fail_over() {
        let mut poster = MockHttpPost::new();
        poster.expect_post().returning(|url, _, id, _| {
            Ok(match url.host_str().unwrap() {
                "a" => "<html>502 bad gateway</html>".to_string(),
                _ => success(id, "0x3"),
            })
        });
        let transport =
            HttpTransport::with_poster(poster, urls(&["a", "b"]), Config::default()).unwrap();

        assert_eq!(transport.fetch(methods::block_number()).await, Ok(3));
    }

    #[tokio::test]
    async fn request_ids_increase_per_transport() {
        let ids = Arc::new(Mutex::new(Vec::new()));
        let mut poster = MockHttpPost::new();
        poster.expect_post().returning({
            let ids = ids.clone();
            move |_, method, id, body| {
                assert_eq!(method, "eth_blockNumber");
                let body: serde_json::Value = serde_json::from_str(&body).unwrap();
                assert_eq!(body["id"], json!(id));
                ids.lock().unwrap().push(id);
                Ok(success(id, "0x0"))
            }
        });
        let transport = HttpTransport::with_poster(poster, urls(&["a"]), Config::default()).unwrap();

        for _ in 0..3 {
            transport.fetch(methods::block_number()).await.unwrap();
        }
        assert_eq!(*ids.lock().unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn requires_an_endpoint() {
        assert!(HttpTransport::with_poster(MockHttpPost::new(), vec![], Config::default()).is_err());
    }

    #[test]
    fn describes_endpoints() {
        let transport =
            HttpTransport::with_poster(MockHttpPost::new(), urls(&["a", "b"]), Config::default())
                .unwrap();
        assert_eq!(transport.source(), "a, b");
    }
}
