//! Download requests and the transport metadata attached at submission.

use std::path::PathBuf;

use url::Url;

use crate::engine::{EngineRequest, NetworkTypes};
use crate::user_agent;

/// Media type of the platform's JSON API.
pub const MEDIA_TYPE_JSON_API: &str = "application/vnd.api+json";

/// Prefix of the `Authorization` header value.
pub const AUTH_VALUE_PREFIX: &str = "Token token=";

/// One download to submit to the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadRequest {
    /// Source URL.
    pub url: String,
    /// Destination file.
    pub local_file: PathBuf,
    /// Title shown in notifications.
    pub title: String,
    /// Whether a notification is visible while the transfer runs.
    pub show_notification: bool,
}

impl DownloadRequest {
    /// Creates a request.
    #[must_use]
    pub fn new(
        url: impl Into<String>,
        local_file: impl Into<PathBuf>,
        title: impl Into<String>,
        show_notification: bool,
    ) -> Self {
        Self {
            url: url.into(),
            local_file: local_file.into(),
            title: title.into(),
            show_notification,
        }
    }

    /// Assembles the engine submission, attaching headers and network
    /// constraints from `env`.
    #[must_use]
    pub fn to_engine_request(&self, env: &RequestEnvironment) -> EngineRequest {
        EngineRequest {
            url: self.url.clone(),
            destination: self.local_file.clone(),
            title: self.title.clone(),
            notification_visible: self.show_notification,
            headers: env.headers_for(&self.url),
            network_types: env.network_types(),
        }
    }
}

/// Environment supplied by the embedding application: identity, locale and
/// credentials attached to every submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestEnvironment {
    pub user_agent: String,
    /// Language code sent as `Accept-Language`.
    pub locale: String,
    /// API token; only sent to `app_host`.
    pub auth_token: Option<String>,
    /// Host of the platform the token belongs to.
    pub app_host: Option<String>,
    /// Whether transfers may use mobile networks.
    pub allow_mobile_network: bool,
    /// Value of the `X-User-Platform` header.
    pub platform: String,
    /// API version advertised in the `Accept` header.
    pub api_version: u32,
}

impl Default for RequestEnvironment {
    fn default() -> Self {
        Self {
            user_agent: user_agent::default_download_user_agent(),
            locale: "en".to_string(),
            auth_token: None,
            app_host: None,
            allow_mobile_network: false,
            platform: "desktop".to_string(),
            api_version: 3,
        }
    }
}

impl RequestEnvironment {
    /// Headers attached to a request for `url`.
    #[must_use]
    pub fn headers_for(&self, url: &str) -> Vec<(String, String)> {
        let mut headers = vec![
            ("User-Agent".to_string(), self.user_agent.clone()),
            (
                "Accept".to_string(),
                format!("{MEDIA_TYPE_JSON_API}; api-version={}", self.api_version),
            ),
            ("Content-Type".to_string(), MEDIA_TYPE_JSON_API.to_string()),
            ("X-User-Platform".to_string(), self.platform.clone()),
            ("Accept-Language".to_string(), self.locale.clone()),
        ];

        if let Some(token) = self.auth_token.as_deref()
            && self.is_app_host(url)
        {
            headers.push((
                "Authorization".to_string(),
                format!("{AUTH_VALUE_PREFIX}{token}"),
            ));
        }

        headers
    }

    /// Network types transfers may use.
    #[must_use]
    pub fn network_types(&self) -> NetworkTypes {
        if self.allow_mobile_network {
            NetworkTypes::WIFI | NetworkTypes::MOBILE
        } else {
            NetworkTypes::WIFI
        }
    }

    fn is_app_host(&self, url: &str) -> bool {
        let Some(app_host) = self.app_host.as_deref() else {
            return false;
        };
        Url::parse(url)
            .ok()
            .and_then(|u| u.host_str().map(|h| h.eq_ignore_ascii_case(app_host)))
            .unwrap_or(false)
    }
}
