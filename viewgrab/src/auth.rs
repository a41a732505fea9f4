//! Login exchange against the service's auth endpoint.
//!
//! The web frontend authenticates through a nuxt-style auth middleware that
//! expects a handful of cookies next to the JSON credentials. A successful
//! exchange yields a bearer token that is then sent both as a cookie and as an
//! `Authorization` header on every later request.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::entitlement::EntitlementActivator;
use crate::http::{HttpClient, Method};
use crate::session::{SessionContext, TOKEN_COOKIE};

#[derive(Debug, Deserialize)]
struct LoginResponse {
    token: String,
}

/// Re-establishes a session when the service redirects us away from a resource.
#[derive(Debug, Clone, Default)]
pub struct Authenticator {
    activator: EntitlementActivator,
}

impl Authenticator {
    pub fn new(activator: EntitlementActivator) -> Self {
        Self { activator }
    }

    pub fn activator(&self) -> &EntitlementActivator {
        &self.activator
    }

    /// Handle a 302 whose `Location` was `redirect`.
    ///
    /// A redirect to the subscription page is handed to the entitlement
    /// activator. A redirect anywhere other than the login page is refused.
    /// The session is only touched when the login succeeds.
    pub fn authenticate<C: HttpClient>(
        &self,
        client: &C,
        session: &mut SessionContext,
        redirect: Option<&str>,
    ) -> bool {
        if let Some(location) = redirect {
            if session.endpoints.is_subscription_redirect(location) {
                return self.activator.activate(client, session);
            }
            if !session.endpoints.is_login_redirect(location) {
                warn!(location, "Got an unrecognized redirect, not authenticating");
                return false;
            }
        }

        if !session.credentials.is_complete() {
            warn!("Cannot authenticate: username and password are required");
            return false;
        }

        info!("Trying to authenticate");
        self.login(client, session)
    }

    fn login<C: HttpClient>(&self, client: &C, session: &mut SessionContext) -> bool {
        let endpoints = &session.endpoints;
        let cookies = login_cookies(&endpoints.post_login_redirect);

        let payload = json!({
            "username": session.credentials.username().unwrap_or_default(),
            "password": session.credentials.password().unwrap_or_default(),
        });
        let mut request = session
            .request(Method::Get, endpoints.auth_url.as_str())
            .with_header("Content-Type", "application/json")
            .with_header("Referer", endpoints.login_url.as_str())
            .with_header("Accept", "application/json, text/plain, */*")
            .with_cookies(&cookies)
            .with_json(payload);
        // Stale token markers make the middleware issue a fresh token.
        request
            .cookies
            .insert(TOKEN_COOKIE.to_string(), "false".to_string());

        let response = match client.send(&request) {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "Error during authentication");
                return false;
            }
        };

        if response.status != 200 {
            warn!(status = response.status, "Authentication failed");
            return false;
        }

        let token = match response.json::<LoginResponse>() {
            Ok(body) if !body.token.is_empty() => body.token,
            Ok(_) => {
                warn!("Authentication response carried an empty token");
                return false;
            }
            Err(e) => {
                warn!(error = %e, "Authentication response carried no token");
                return false;
            }
        };

        debug!(token_len = token.len(), "Received bearer token");
        session.install_token(token, cookies);
        info!("Authenticated");
        true
    }
}

/// Cookies the auth middleware expects around a local-strategy login.
fn login_cookies(post_login_redirect: &str) -> BTreeMap<String, String> {
    let mut cookies = BTreeMap::new();
    cookies.insert("auth.strategy".to_string(), "local".to_string());
    cookies.insert("auth._token_expiration.local".to_string(), "false".to_string());
    cookies.insert("auth.redirect".to_string(), post_login_redirect.to_string());
    cookies
}
