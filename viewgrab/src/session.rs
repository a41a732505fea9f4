//! Session state shared by the authenticator, the entitlement activator and
//! the fetch engine.
//!
//! A [`SessionContext`] is built once per run (usually from
//! [`ConfigFile::to_session`](crate::config::ConfigFile::to_session)) and is
//! owned by the [`FetchEngine`](crate::fetch::FetchEngine). Only the
//! authenticator mutates it, through a `&mut` borrow handed out by the engine.

use std::collections::BTreeMap;
use std::fmt;

use crate::http::{HttpRequest, Method};

/// Default origin of the viewer service.
pub const DEFAULT_BASE_HOST: &str = "https://gato.tularegion.ru";

/// Path of the image viewer endpoint; the resource reference is appended.
pub const DEFAULT_VIEWER_PATH: &str = "/srv/imageViewer/image?url=";

/// Cookie holding the bearer token for the web frontend's auth middleware.
pub const TOKEN_COOKIE: &str = "auth._token.local";

/// Remote endpoints and path templates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    /// Origin all relative locations are resolved against.
    pub base_host: String,
    /// Viewer path template; the resource reference is appended verbatim.
    pub viewer_path: String,
    /// Login exchange endpoint.
    pub auth_url: String,
    /// Login page. A 302 pointing anywhere else is not an expired session.
    pub login_url: String,
    /// Private API root used for entitlement management.
    pub api_url: String,
    /// A 301 into this prefix means the resource moved within the backend.
    pub internal_redirect_prefix: String,
    /// A 302 into this path means the entitlement must be (re)activated.
    pub subscription_path: String,
    /// Post-login landing page hinted to the auth middleware.
    pub post_login_redirect: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self::for_host(DEFAULT_BASE_HOST)
    }
}

impl Endpoints {
    /// Derive every endpoint from a single origin.
    pub fn for_host(base_host: impl Into<String>) -> Self {
        let base_host = base_host.into().trim_end_matches('/').to_string();
        Self {
            viewer_path: DEFAULT_VIEWER_PATH.to_string(),
            auth_url: format!("{}/auth", base_host),
            login_url: format!("{}/login", base_host),
            api_url: format!("{}/private_api", base_host),
            internal_redirect_prefix: "/lksrv/".to_string(),
            subscription_path: "/private/subscription".to_string(),
            post_login_redirect: "/private/me".to_string(),
            base_host,
        }
    }

    /// Override the login exchange endpoint.
    pub fn with_auth_url(mut self, auth_url: impl Into<String>) -> Self {
        self.auth_url = auth_url.into();
        self
    }

    /// Build the viewer URL for a resource reference.
    pub fn resource_url(&self, reference: &str) -> String {
        format!("{}{}{}", self.base_host, self.viewer_path, reference)
    }

    /// Resolve a `Location` value against the base host.
    pub fn absolute(&self, location: &str) -> String {
        if location.starts_with("http://") || location.starts_with("https://") {
            location.to_string()
        } else if location.starts_with('/') {
            format!("{}{}", self.base_host, location)
        } else {
            format!("{}/{}", self.base_host, location)
        }
    }

    /// Whether a 301 target stays inside the backend's internal storage.
    ///
    /// Returns the absolute URL to follow.
    pub fn internal_redirect(&self, location: &str) -> Option<String> {
        let internal = format!("{}{}", self.base_host, self.internal_redirect_prefix);
        if location.starts_with(&self.internal_redirect_prefix) || location.starts_with(&internal) {
            Some(self.absolute(location))
        } else {
            None
        }
    }

    /// Whether a 302 target is the subscription purchase page.
    pub fn is_subscription_redirect(&self, location: &str) -> bool {
        location.starts_with(&self.subscription_path)
            || location.starts_with(&format!("{}{}", self.base_host, self.subscription_path))
    }

    /// Whether a 302 target is the login page.
    pub fn is_login_redirect(&self, location: &str) -> bool {
        location.starts_with(&self.login_url)
            || (location.starts_with('/') && self.absolute(location).starts_with(&self.login_url))
    }
}

/// Login credentials. The password never shows up in `Debug` output.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    username: Option<String>,
    password: Option<String>,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .finish()
    }
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: Some(username.into()),
            password: Some(password.into()),
        }
    }

    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    pub fn password(&self) -> Option<&str> {
        self.password.as_deref()
    }

    pub fn set_username(&mut self, username: impl Into<String>) {
        self.username = Some(username.into());
    }

    pub fn set_password(&mut self, password: impl Into<String>) {
        self.password = Some(password.into());
    }

    /// Both username and password are present and non-empty.
    pub fn is_complete(&self) -> bool {
        non_empty(self.username.as_deref()) && non_empty(self.password.as_deref())
    }
}

fn non_empty(value: Option<&str>) -> bool {
    value.is_some_and(|v| !v.is_empty())
}

/// Everything a request to the remote service needs to carry.
#[derive(Debug, Clone, Default)]
pub struct SessionContext {
    pub endpoints: Endpoints,
    pub credentials: Credentials,
    /// Headers sent with every request. Gains `Authorization` after login.
    pub headers: BTreeMap<String, String>,
    /// Cookies sent with every request.
    pub cookies: BTreeMap<String, String>,
    /// Proxy URL per scheme (`http`, `https`).
    pub proxies: BTreeMap<String, String>,
    /// Whether a purchased entitlement may be activated without asking.
    pub allow_spend: bool,
    token: Option<String>,
}

impl SessionContext {
    pub fn new(endpoints: Endpoints) -> Self {
        Self {
            endpoints,
            ..Default::default()
        }
    }

    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_proxy(mut self, scheme: impl Into<String>, url: impl Into<String>) -> Self {
        self.proxies.insert(scheme.into(), url.into());
        self
    }

    pub fn with_allow_spend(mut self, allow: bool) -> Self {
        self.allow_spend = allow;
        self
    }

    /// The bearer token, present only after a successful login.
    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    /// Install a freshly issued token along with the cookies the login
    /// exchange negotiated.
    pub(crate) fn install_token(&mut self, token: String, cookies: BTreeMap<String, String>) {
        self.cookies.extend(cookies);
        self.cookies
            .insert(TOKEN_COOKIE.to_string(), format!("Bearer%20{}", token));
        self.headers
            .insert("Authorization".to_string(), format!("Bearer {}", token));
        self.token = Some(token);
    }

    /// A request carrying the session headers and cookies.
    pub fn request(&self, method: Method, url: impl Into<String>) -> HttpRequest {
        HttpRequest {
            method,
            url: url.into(),
            headers: self.headers.clone(),
            cookies: self.cookies.clone(),
            json: None,
        }
    }
}
