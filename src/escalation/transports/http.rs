//! Shaped HTTP transport.
//!
//! Serves both the direct and proxied tiers; the only difference between
//! them is whether the endpoint carries a proxy URL. Clients are pooled per
//! proxy so connection reuse looks like a normal browser keeping its
//! connections warm.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use http::header::{HeaderMap, HeaderName, HeaderValue, SET_COOKIE};
use tokio::sync::Mutex;

use super::{SearchTransport, TransportError, TransportReply, TransportRequest};

/// Reqwest client pool keyed by proxy endpoint.
struct ClientPool {
    timeout: Duration,
    clients: Mutex<HashMap<Option<String>, reqwest::Client>>,
}

impl ClientPool {
    fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            clients: Mutex::new(HashMap::new()),
        }
    }

    async fn client(&self, proxy: Option<&str>) -> Result<reqwest::Client, TransportError> {
        let mut guard = self.clients.lock().await;
        let key = proxy.map(|p| p.to_string());
        if let Some(client) = guard.get(&key) {
            return Ok(client.clone());
        }

        // Cookie handling lives in the session jar; the client itself stays
        // stateless so one client can serve many sessions on one proxy.
        let mut builder = reqwest::Client::builder()
            .cookie_store(false)
            .timeout(self.timeout);

        if let Some(endpoint) = proxy {
            builder = builder.proxy(reqwest::Proxy::all(endpoint)?);
        }

        let client = builder.build()?;
        guard.insert(key, client.clone());
        Ok(client)
    }
}

/// HTTP transport used by the direct and proxied tiers.
pub struct PlainHttpTransport {
    pool: ClientPool,
}

impl PlainHttpTransport {
    pub fn new(timeout: Duration) -> Self {
        Self {
            pool: ClientPool::new(timeout),
        }
    }
}

impl Default for PlainHttpTransport {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

#[async_trait]
impl SearchTransport for PlainHttpTransport {
    async fn execute(
        &self,
        request: TransportRequest<'_>,
    ) -> Result<TransportReply, TransportError> {
        let client = self
            .pool
            .client(request.endpoint.proxy_url.as_deref())
            .await?;

        let mut headers = HeaderMap::new();
        for (name, value) in &request.shape.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|err| TransportError::Header(err.to_string()))?;
            let value = HeaderValue::from_str(value)
                .map_err(|err| TransportError::Header(err.to_string()))?;
            headers.insert(name, value);
        }

        let response = client
            .get(request.url.clone())
            .headers(headers)
            .send()
            .await
            .map_err(|err| {
                if err.is_timeout() {
                    TransportError::Timeout
                } else {
                    TransportError::Network(err)
                }
            })?;

        let status = response.status().as_u16();
        let set_cookies = response
            .headers()
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok().map(str::to_string))
            .collect();
        let body = response.text().await?;

        Ok(TransportReply {
            status,
            body,
            set_cookies,
        })
    }
}
