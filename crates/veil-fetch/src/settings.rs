//! Server origin, headers and URL building.

use std::collections::BTreeMap;

use reqwest::Url;
use serde::{Deserialize, Serialize};

use crate::error::FetchError;
use crate::transport::{HttpRequest, Method, Priority};

/// Where and how to reach the media server. Set by the `init` message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FetchSettings {
    /// Scheme, host and port, e.g. `http://localhost:5151`.
    pub origin: String,
    /// Headers sent with every request.
    pub headers: BTreeMap<String, String>,
    /// Path prefix the server is mounted under, e.g. `/fiftyone`.
    pub path_prefix: String,
}

impl FetchSettings {
    /// Absolute URL of an API route such as `/frames`.
    #[must_use]
    pub fn endpoint(&self, route: &str) -> String {
        let origin = self.origin.trim_end_matches('/');
        let prefix = self.path_prefix.trim_matches('/');
        let route = route.trim_start_matches('/');
        if prefix.is_empty() {
            format!("{origin}/{route}")
        } else {
            format!("{origin}/{prefix}/{route}")
        }
    }

    /// URL for a recorded on-disk media path.
    ///
    /// Paths that are already `http(s)` URLs are used as-is.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::InvalidUrl`] if the origin does not form a
    /// valid base URL.
    pub fn media_url(&self, path: &str) -> Result<String, FetchError> {
        if path.starts_with("http://") || path.starts_with("https://") {
            return Ok(path.to_owned());
        }
        let base = self.endpoint("/media");
        Url::parse_with_params(&base, &[("filepath", path)])
            .map(String::from)
            .map_err(|e| FetchError::InvalidUrl(format!("{base}: {e}")))
    }

    fn header_list(&self) -> Vec<(String, String)> {
        self.headers
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// A low-priority `GET` for a mask image.
    #[must_use]
    pub fn get(&self, url: impl Into<String>) -> HttpRequest {
        HttpRequest {
            method: Method::Get,
            url: url.into(),
            headers: self.header_list(),
            body: None,
            priority: Priority::Low,
        }
    }

    /// A JSON `POST` to an API route.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Transport`] if `body` cannot be serialized.
    pub fn post_json<T: Serialize>(&self, route: &str, body: &T) -> Result<HttpRequest, FetchError> {
        let body = serde_json::to_vec(body)
            .map_err(|e| FetchError::Transport(format!("cannot serialize body: {e}")))?;
        let mut headers = self.header_list();
        headers.push(("content-type".to_owned(), "application/json".to_owned()));
        Ok(HttpRequest {
            method: Method::Post,
            url: self.endpoint(route),
            headers,
            body: Some(body),
            priority: Priority::Auto,
        })
    }
}
