// HTTP client for the things service
//
// Wraps `reqwest::Client` with endpoint URL construction, status checks,
// and lenient body decoding. Every method maps 1:1 onto one server route.

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;
use url::Url;

use crate::error::Error;
use crate::models::{RemoteHash, ThingMeta, ThingState};
use crate::transport::TransportConfig;

/// Raw HTTP client for the things service.
///
/// Cheap to clone: the inner `reqwest::Client` is reference-counted.
#[derive(Debug, Clone)]
pub struct ThingsClient {
    http: reqwest::Client,
    base_url: Url,
}

impl ThingsClient {
    /// Create a client from a `TransportConfig`.
    ///
    /// `base_url` is the service root, e.g. `http://192.168.1.20:5000/`.
    /// A path prefix (`http://host/things/`) is preserved.
    pub fn new(base_url: Url, transport: &TransportConfig) -> Result<Self, Error> {
        let http = transport.build_client()?;
        Ok(Self { http, base_url })
    }

    /// Create a client around a pre-built `reqwest::Client`.
    pub fn with_client(http: reqwest::Client, base_url: Url) -> Self {
        Self { http, base_url }
    }

    /// The service base URL.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    // ── Endpoints ────────────────────────────────────────────────────

    /// List every known thing name.
    ///
    /// `GET /ls`
    pub async fn list_things(&self) -> Result<Vec<String>, Error> {
        let url = self.endpoint(&["ls"])?;
        self.get_json(url).await
    }

    /// Bulk state snapshot across all things.
    ///
    /// `GET /get_world`
    pub async fn world(&self) -> Result<BTreeMap<String, Value>, Error> {
        let url = self.endpoint(&["get_world"])?;
        self.get_json(url).await
    }

    /// Action descriptors and declared type for one thing.
    ///
    /// `GET /meta/{name}`
    pub async fn thing_meta(&self, name: &str) -> Result<ThingMeta, Error> {
        let url = self.endpoint(&["meta", name])?;
        self.get_json(url).await
    }

    /// Current state of one thing.
    ///
    /// `GET /get/{name}`
    pub async fn thing_state(&self, name: &str) -> Result<ThingState, Error> {
        let url = self.endpoint(&["get", name])?;
        self.get_json(url).await
    }

    /// Current value of a single action.
    ///
    /// `GET /get/{name}/{action}`
    pub async fn action_value(&self, name: &str, action: &str) -> Result<Value, Error> {
        let url = self.endpoint(&["get", name, action])?;
        self.get_json(url).await
    }

    /// Server-computed digest over the known thing names.
    ///
    /// `GET /get_known_things_hash`
    pub async fn known_things_hash(&self) -> Result<String, Error> {
        let url = self.endpoint(&["get_known_things_hash"])?;
        let hash: RemoteHash = self.get_json(url).await?;
        Ok(hash.into_string())
    }

    /// Apply one or more action=value pairs to a thing.
    ///
    /// `PUT /set/{name}`; the response body is ignored.
    pub async fn set_thing(&self, name: &str, values: &ThingState) -> Result<(), Error> {
        let url = self.endpoint(&["set", name])?;
        debug!("PUT {}", url);

        let resp = self.http.put(url).json(values).send().await?;
        check_status(&resp)?;
        Ok(())
    }

    // ── Request helpers ──────────────────────────────────────────────

    /// Append percent-encoded path segments to the base URL.
    fn endpoint(&self, segments: &[&str]) -> Result<Url, Error> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| Error::InvalidUrl(url::ParseError::RelativeUrlWithCannotBeABaseBase))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T, Error> {
        debug!("GET {}", url);

        let resp = self.http.get(url).send().await?;
        check_status(&resp)?;

        let body = resp.text().await?;
        serde_json::from_str(&body).map_err(|e| Error::Deserialization {
            message: e.to_string(),
            body,
        })
    }
}

fn check_status(resp: &reqwest::Response) -> Result<(), Error> {
    let status = resp.status();
    if status.is_success() {
        return Ok(());
    }
    Err(Error::Status {
        status: status.as_u16(),
        path: resp.url().path().to_owned(),
    })
}
