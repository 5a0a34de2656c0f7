//! HTTPS transport posting protocol messages as JSON.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use dsp_config::OutboundConfig;
use hyper::body::to_bytes;
use hyper::client::HttpConnector;
use hyper::header::{ACCEPT, CONTENT_TYPE};
use hyper::{Body, Client, Request};
use hyper_rustls::HttpsConnector;
use rustls::{ClientConfig, OwnedTrustAnchor, RootCertStore};
use tokio::time::timeout;
use tracing::debug;
use webpki_roots::TLS_SERVER_ROOTS;

use crate::messages::{NegotiationAck, ProtocolMessage};
use crate::peer::{PeerError, PeerResult, RemotePeer};

type HyperClient = Client<HttpsConnector<HttpConnector>, Body>;

fn build_https_client() -> HyperClient {
    let mut roots = RootCertStore::empty();
    roots.add_trust_anchors(TLS_SERVER_ROOTS.iter().map(|anchor| {
        OwnedTrustAnchor::from_subject_spki_name_constraints(
            anchor.subject,
            anchor.spki,
            anchor.name_constraints,
        )
    }));

    let config = ClientConfig::builder()
        .with_safe_defaults()
        .with_root_certificates(roots)
        .with_no_client_auth();

    let mut http = HttpConnector::new();
    http.enforce_http(false);

    let connector = HttpsConnector::from((http, Arc::new(config)));

    Client::builder().build::<_, Body>(connector)
}

/// Joins a callback address and an endpoint path.
#[must_use]
pub fn endpoint_url(address: &str, path: &str) -> String {
    format!("{}{path}", address.trim_end_matches('/'))
}

/// [`RemotePeer`] speaking HTTP(S) to the counterparty's callback address.
///
/// Connection failures, timeouts, and 5xx answers are transient; other
/// non-2xx answers are rejections.
#[derive(Clone)]
pub struct HttpPeer {
    client: HyperClient,
    timeout: Duration,
    bearer_token: Option<String>,
}

impl std::fmt::Debug for HttpPeer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpPeer")
            .field("timeout", &self.timeout)
            .field("authenticated", &self.bearer_token.is_some())
            .finish_non_exhaustive()
    }
}

impl HttpPeer {
    /// Creates a peer trusting the bundled web PKI roots.
    #[must_use]
    pub fn new() -> Self {
        Self {
            client: build_https_client(),
            timeout: Duration::from_secs(10),
            bearer_token: None,
        }
    }

    /// Creates a peer using the configured request timeout.
    #[must_use]
    pub fn from_config(config: &OutboundConfig) -> Self {
        Self::new().with_timeout(config.request_timeout())
    }

    /// Sets the per-request timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sends `Authorization: Bearer <token>` with every request.
    #[must_use]
    pub fn with_bearer_token(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(token.into());
        self
    }

    /// Returns the per-request timeout.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn build_request(&self, url: &str, body: Bytes) -> PeerResult<Request<Body>> {
        let mut builder = Request::post(url)
            .header(CONTENT_TYPE, "application/json")
            .header(ACCEPT, "application/json");
        if let Some(token) = &self.bearer_token {
            builder = builder.header(hyper::header::AUTHORIZATION, format!("Bearer {token}"));
        }
        builder
            .body(Body::from(body))
            .map_err(|err| PeerError::Protocol(format!("failed to build request for {url}: {err}")))
    }
}

impl Default for HttpPeer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemotePeer for HttpPeer {
    async fn send(&self, address: &str, message: &ProtocolMessage) -> PeerResult<NegotiationAck> {
        let url = endpoint_url(address, &message.path());
        let body = message.to_json().map_err(|err| {
            PeerError::Protocol(format!("failed to encode {}: {err}", message.kind()))
        })?;
        let request = self.build_request(&url, Bytes::from(body))?;

        debug!(url = %url, message = message.kind(), "posting protocol message");
        let response = timeout(self.timeout, self.client.request(request))
            .await
            .map_err(|_| PeerError::transient(format!("request to {url} timed out")))?
            .map_err(|err| PeerError::transient(format!("request to {url} failed: {err}")))?;

        let status = response.status();
        let bytes = to_bytes(response.into_body())
            .await
            .map_err(|err| PeerError::transient(format!("failed to read response: {err}")))?;

        if !status.is_success() {
            let reason = String::from_utf8_lossy(&bytes).to_string();
            return Err(PeerError::from_status(status.as_u16(), reason));
        }

        serde_json::from_slice(&bytes)
            .map_err(|err| PeerError::Protocol(format!("failed to decode acknowledgement: {err}")))
    }
}
