//! Activation of purchased entitlements.
//!
//! The service answers 402 (or redirects to its subscription page) when the
//! session is valid but no entitlement is active. A purchased but unredeemed
//! entitlement can be activated through the private API, which spends it, so
//! this is gated behind [`SessionContext::allow_spend`].

use std::thread;
use std::time::Duration;

use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

use crate::http::{HttpClient, HttpResponse, Method};
use crate::session::SessionContext;

/// Default time the refusal notice stays on screen before the run goes on.
pub const DEFAULT_NOTICE_PAUSE: Duration = Duration::from_secs(3);

/// Catalog the entitlements are listed for.
pub const DEFAULT_LANGUAGE_ID: u32 = 1;

#[derive(Debug, Deserialize)]
struct EntitlementList {
    #[serde(default)]
    value: Vec<EntitlementEntry>,
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
struct EntitlementEntry {
    id: u64,
    count: u32,
}

#[derive(Debug, Deserialize)]
struct ActivationResult {
    success: bool,
}

/// Queries and activates purchased entitlements.
#[derive(Debug, Clone)]
pub struct EntitlementActivator {
    notice_pause: Duration,
    language_id: u32,
}

impl Default for EntitlementActivator {
    fn default() -> Self {
        Self {
            notice_pause: DEFAULT_NOTICE_PAUSE,
            language_id: DEFAULT_LANGUAGE_ID,
        }
    }
}

impl EntitlementActivator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set how long the refusal notice is held.
    pub fn with_notice_pause(mut self, pause: Duration) -> Self {
        self.notice_pause = pause;
        self
    }

    pub fn with_language_id(mut self, language_id: u32) -> Self {
        self.language_id = language_id;
        self
    }

    /// Activate one available entitlement.
    ///
    /// Returns `false` when spending is not allowed, when nothing is left to
    /// activate, or when either API call fails. Never retries.
    pub fn activate<C: HttpClient>(&self, client: &C, session: &SessionContext) -> bool {
        if !session.allow_spend {
            warn!(
                "Activation of the purchased subscription is not allowed automatically. \
                 Please activate it manually."
            );
            if !self.notice_pause.is_zero() {
                thread::sleep(self.notice_pause);
            }
            return false;
        }

        let entry = match self.available_entitlement(client, session) {
            Some(entry) => entry,
            None => {
                warn!(
                    "Your subscription has expired. To continue, please purchase a new one on the site."
                );
                return false;
            }
        };

        let payload = json!([{ "id": entry.id, "count": 1 }]);
        let Some(response) = api_call(client, session, "activate-subscr", payload) else {
            return false;
        };

        match response.json::<ActivationResult>() {
            Ok(result) if result.success => {
                info!(id = entry.id, "Subscription successfully activated");
                true
            }
            Ok(_) => {
                warn!(
                    id = entry.id,
                    "Subscription activation failed. Please visit the site to check what's going on."
                );
                false
            }
            Err(e) => {
                warn!(error = %e, "Unreadable subscription activation response");
                false
            }
        }
    }

    /// First listed entitlement, if it still has uses left.
    fn available_entitlement<C: HttpClient>(
        &self,
        client: &C,
        session: &SessionContext,
    ) -> Option<EntitlementEntry> {
        let payload = json!({ "languageId": self.language_id });
        let response = api_call(client, session, "get-subscr", payload)?;

        let list: EntitlementList = match response.json() {
            Ok(list) => list,
            Err(e) => {
                warn!(error = %e, "Can't get a number of subscriptions");
                return None;
            }
        };

        list.value.first().copied().filter(|entry| entry.count > 0)
    }
}

/// POST to the private API. Only 200 and 202 count as answers.
fn api_call<C: HttpClient>(
    client: &C,
    session: &SessionContext,
    method: &str,
    payload: serde_json::Value,
) -> Option<HttpResponse> {
    let url = format!("{}/{}", session.endpoints.api_url, method);
    let request = session.request(Method::Post, url.as_str()).with_json(payload);

    match client.send(&request) {
        Ok(response) if matches!(response.status, 200 | 202) => Some(response),
        Ok(response) => {
            warn!(url = %url, status = response.status, "API request failed");
            None
        }
        Err(e) => {
            warn!(url = %url, error = %e, "API request failed");
            None
        }
    }
}
