//! Fetch-with-retry engine.
//!
//! The service reports three unrelated conditions through ordinary status
//! codes:
//!
//! | Status | Meaning                                  | Action                         |
//! |--------|------------------------------------------|--------------------------------|
//! | 200    | resource served                          | done                           |
//! | 301    | resource moved inside the backend        | follow if under the prefix     |
//! | 302    | session expired, or entitlement needed   | authenticate, retry same URL   |
//! | 402    | entitlement expired on a valid session   | activate, retry same URL       |
//! | other  | unknown                                  | fail, never retry blindly      |
//!
//! Every loop iteration consumes one unit of the retry budget, whichever
//! branch it takes, so a fetch makes at most `max_attempts` requests.

use std::fmt;

use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::auth::Authenticator;
use crate::http::{HttpClient, HttpResponse, Method, TransportError};
use crate::session::SessionContext;

/// Default and maximum number of requests per logical fetch.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 4;

/// A successfully fetched resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedResource {
    /// URL that finally answered 200, after internal redirects.
    pub url: String,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

impl FetchedResource {
    /// Body decoded as UTF-8, replacing invalid sequences.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.bytes).into_owned()
    }
}

/// Why an attempt did not finish the fetch but the loop may go on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recovery {
    /// Network-level failure.
    Transport(TransportError),
    /// Resource moved within the backend; continue at this absolute URL.
    Redirected(String),
    /// Session was re-established.
    Reauthenticated,
    /// An entitlement was activated.
    EntitlementActivated,
}

impl fmt::Display for Recovery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Recovery::Transport(e) => write!(f, "{}", e),
            Recovery::Redirected(url) => write!(f, "redirected to {}", url),
            Recovery::Reauthenticated => write!(f, "re-authenticated"),
            Recovery::EntitlementActivated => write!(f, "entitlement activated"),
        }
    }
}

/// Terminal failures of a fetch.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchFailure {
    #[error("authentication failed")]
    AuthenticationFailed,

    #[error("entitlement unavailable")]
    EntitlementUnavailable,

    #[error("unexpected status {status}")]
    UnexpectedStatus { status: u16 },

    #[error("unexpected status {status}: redirect to {location:?} is outside the backend")]
    UnexpectedRedirect {
        status: u16,
        location: Option<String>,
    },

    #[error("retry budget exhausted after {attempts} attempts (last: {last})")]
    RetryBudgetExhausted { attempts: u32, last: String },
}

impl FetchFailure {
    /// HTTP status behind the failure, when there was one.
    pub fn status(&self) -> Option<u16> {
        match self {
            FetchFailure::UnexpectedStatus { status }
            | FetchFailure::UnexpectedRedirect { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Result of one attempt, or of a whole fetch.
///
/// [`FetchEngine::fetch`] only ever returns `Success` or `FatalFailure`;
/// `RecoverableFailure` is what a single attempt yields to keep the loop going.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    Success(FetchedResource),
    RecoverableFailure(Recovery),
    FatalFailure(FetchFailure),
}

impl FetchOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, FetchOutcome::Success(_))
    }

    /// Convert into a `Result`, mapping a stray recoverable failure to an
    /// exhausted budget.
    pub fn into_result(self) -> Result<FetchedResource, FetchFailure> {
        match self {
            FetchOutcome::Success(resource) => Ok(resource),
            FetchOutcome::FatalFailure(failure) => Err(failure),
            FetchOutcome::RecoverableFailure(recovery) => Err(FetchFailure::RetryBudgetExhausted {
                attempts: 0,
                last: recovery.to_string(),
            }),
        }
    }
}

/// Bounded attempt counter for one logical fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryBudget {
    remaining: u32,
    initial: u32,
}

impl RetryBudget {
    /// A budget of `attempts`, capped at [`DEFAULT_MAX_ATTEMPTS`].
    pub fn new(attempts: u32) -> Self {
        let attempts = attempts.min(DEFAULT_MAX_ATTEMPTS);
        Self {
            remaining: attempts,
            initial: attempts,
        }
    }

    /// Take one attempt. Returns `false` when nothing was left.
    pub fn consume(&mut self) -> bool {
        if self.remaining == 0 {
            return false;
        }
        self.remaining -= 1;
        true
    }

    pub fn remaining(&self) -> u32 {
        self.remaining
    }

    pub fn used(&self) -> u32 {
        self.initial - self.remaining
    }
}

impl Default for RetryBudget {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ATTEMPTS)
    }
}

/// Drives single-resource fetches against the service.
pub struct FetchEngine<C: HttpClient> {
    client: C,
    session: SessionContext,
    authenticator: Authenticator,
    max_attempts: u32,
}

impl<C: HttpClient> FetchEngine<C> {
    pub fn new(client: C, session: SessionContext, authenticator: Authenticator) -> Self {
        Self {
            client,
            session,
            authenticator,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    /// Set the per-fetch attempt limit (at least 1, at most the default).
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.clamp(1, DEFAULT_MAX_ATTEMPTS);
        self
    }

    pub fn session(&self) -> &SessionContext {
        &self.session
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    /// Fetch `url`, authenticating, activating or following internal
    /// redirects as the responses demand.
    pub fn fetch(&mut self, url: &str) -> FetchOutcome {
        let mut budget = RetryBudget::new(self.max_attempts);
        let mut target = url.to_string();
        let mut last = String::from("no attempt made");

        while budget.consume() {
            debug!(url = %target, attempt = budget.used(), "Fetching");

            match self.attempt(&target) {
                FetchOutcome::RecoverableFailure(Recovery::Redirected(next)) => {
                    debug!(from = %target, to = %next, "Following internal redirect");
                    last = format!("redirected to {}", next);
                    target = next;
                }
                FetchOutcome::RecoverableFailure(recovery) => {
                    // Login and activation do not change the resource URL.
                    last = recovery.to_string();
                }
                done => return done,
            }
        }

        let failure = FetchFailure::RetryBudgetExhausted {
            attempts: budget.used(),
            last,
        };
        error!(url = %url, "{}", failure);
        FetchOutcome::FatalFailure(failure)
    }

    /// One request and the corrective action its response calls for.
    fn attempt(&mut self, url: &str) -> FetchOutcome {
        let request = self.session.request(Method::Get, url);
        let response = match self.client.send(&request) {
            Ok(response) => response,
            Err(e) => {
                warn!(url = %url, error = %e, "Request failed");
                return FetchOutcome::RecoverableFailure(Recovery::Transport(e));
            }
        };

        match response.status {
            200 => FetchOutcome::Success(FetchedResource {
                url: url.to_string(),
                content_type: response.content_type,
                bytes: response.body,
            }),
            301 => self.on_moved(url, &response),
            302 => self.on_session_expired(response.redirect_target()),
            402 => self.on_payment_required(),
            status => {
                error!(url = %url, status, "Unexpected response");
                FetchOutcome::FatalFailure(FetchFailure::UnexpectedStatus { status })
            }
        }
    }

    fn on_moved(&self, url: &str, response: &HttpResponse) -> FetchOutcome {
        let location = response.redirect_target();
        match location.and_then(|l| self.session.endpoints.internal_redirect(l)) {
            Some(next) => FetchOutcome::RecoverableFailure(Recovery::Redirected(next)),
            None => {
                error!(url = %url, location = ?location, "Redirect outside the backend");
                FetchOutcome::FatalFailure(FetchFailure::UnexpectedRedirect {
                    status: response.status,
                    location: location.map(str::to_string),
                })
            }
        }
    }

    fn on_session_expired(&mut self, location: Option<&str>) -> FetchOutcome {
        info!(location = ?location, "Session expired or not authorized");
        if self
            .authenticator
            .authenticate(&self.client, &mut self.session, location)
        {
            FetchOutcome::RecoverableFailure(Recovery::Reauthenticated)
        } else {
            error!("Authentication failed");
            FetchOutcome::FatalFailure(FetchFailure::AuthenticationFailed)
        }
    }

    fn on_payment_required(&self) -> FetchOutcome {
        info!("Entitlement expired");
        if self
            .authenticator
            .activator()
            .activate(&self.client, &self.session)
        {
            FetchOutcome::RecoverableFailure(Recovery::EntitlementActivated)
        } else {
            error!("No entitlement available");
            FetchOutcome::FatalFailure(FetchFailure::EntitlementUnavailable)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entitlement::EntitlementActivator;
    use crate::http::tests::ScriptedClient;
    use crate::session::{Credentials, Endpoints};
    use proptest::prelude::*;
    use std::time::Duration;

    const HOST: &str = "https://example.org";
    const RESOURCE: &str = "https://example.org/srv/imageViewer/image?url=abc";

    fn session() -> SessionContext {
        SessionContext::new(Endpoints::for_host(HOST))
            .with_credentials(Credentials::new("reader", "secret"))
    }

    fn engine(mock: &ScriptedClient, session: SessionContext) -> FetchEngine<&ScriptedClient> {
        let authenticator =
            Authenticator::new(EntitlementActivator::new().with_notice_pause(Duration::ZERO));
        FetchEngine::new(mock, session, authenticator)
    }

    fn image(bytes: &[u8]) -> HttpResponse {
        HttpResponse::new(200)
            .with_content_type("image/jpeg;charset=UTF-8")
            .with_body(bytes.to_vec())
    }

    fn token() -> HttpResponse {
        HttpResponse::new(200).with_body(br#"{"token":"t1"}"#.to_vec())
    }

    #[test]
    fn test_success_on_first_attempt() {
        let mock = ScriptedClient::new().respond(image(b"jpg"));
        let outcome = engine(&mock, session()).fetch(RESOURCE);

        let resource = outcome.into_result().unwrap();
        assert_eq!(resource.bytes, b"jpg");
        assert_eq!(resource.content_type.as_deref(), Some("image/jpeg;charset=UTF-8"));
        assert_eq!(resource.url, RESOURCE);
        assert_eq!(mock.call_count(), 1);
    }

    #[test]
    fn test_302_reauthenticates_and_retries_original_url() {
        let mock = ScriptedClient::new()
            .respond(HttpResponse::new(302).with_location("https://example.org/login"))
            .respond(token())
            .respond(image(b"jpg"));
        let mut engine = engine(&mock, session());

        assert!(engine.fetch(RESOURCE).is_success());

        let requests = mock.requests();
        assert_eq!(requests.len(), 3);
        assert_eq!(requests[1].url, "https://example.org/auth");
        assert_eq!(requests[2].url, RESOURCE);
        assert_eq!(
            requests[2].headers.get("Authorization").unwrap(),
            "Bearer t1"
        );
        assert_eq!(engine.session().token(), Some("t1"));
    }

    #[test]
    fn test_302_without_location_logs_in() {
        let mock = ScriptedClient::new()
            .respond(HttpResponse::new(302).with_location(""))
            .respond(token())
            .respond(image(b"jpg"));

        assert!(engine(&mock, session()).fetch(RESOURCE).is_success());
        assert_eq!(mock.calls_to("https://example.org/auth"), 1);
    }

    #[test]
    fn test_302_with_failed_login_is_fatal() {
        let mock = ScriptedClient::new()
            .respond(HttpResponse::new(302).with_location("/login"))
            .respond(HttpResponse::new(403));

        let outcome = engine(&mock, session()).fetch(RESOURCE);
        assert_eq!(
            outcome,
            FetchOutcome::FatalFailure(FetchFailure::AuthenticationFailed)
        );
        assert_eq!(mock.call_count(), 2);
    }

    #[test]
    fn test_302_to_unknown_place_is_fatal_without_login() {
        let mock = ScriptedClient::new()
            .respond(HttpResponse::new(302).with_location("https://example.org/maintenance"));

        let outcome = engine(&mock, session()).fetch(RESOURCE);
        assert_eq!(
            outcome,
            FetchOutcome::FatalFailure(FetchFailure::AuthenticationFailed)
        );
        assert_eq!(mock.call_count(), 1);
    }

    #[test]
    fn test_each_302_triggers_exactly_one_login() {
        let mock = ScriptedClient::new()
            .respond(HttpResponse::new(302).with_location("/login"))
            .respond(token())
            .respond(HttpResponse::new(302).with_location("/login"))
            .respond(token())
            .respond(image(b"jpg"));

        assert!(engine(&mock, session()).fetch(RESOURCE).is_success());
        assert_eq!(mock.calls_to("https://example.org/auth"), 2);
        assert_eq!(mock.calls_to(RESOURCE), 3);
    }

    #[test]
    fn test_internal_301_is_followed() {
        let mock = ScriptedClient::new()
            .respond(HttpResponse::new(301).with_location("/lksrv/store/42.jpg"))
            .respond(image(b"jpg"));

        let outcome = engine(&mock, session()).fetch(RESOURCE);

        let resource = outcome.into_result().unwrap();
        assert_eq!(resource.url, "https://example.org/lksrv/store/42.jpg");
        assert_eq!(mock.requests()[1].url, "https://example.org/lksrv/store/42.jpg");
    }

    #[test]
    fn test_external_301_is_fatal_on_first_occurrence() {
        let mock = ScriptedClient::new()
            .respond(HttpResponse::new(301).with_location("https://cdn.other.test/x.jpg"))
            .respond(image(b"never"));

        let outcome = engine(&mock, session()).fetch(RESOURCE);
        assert_eq!(
            outcome,
            FetchOutcome::FatalFailure(FetchFailure::UnexpectedRedirect {
                status: 301,
                location: Some("https://cdn.other.test/x.jpg".to_string()),
            })
        );
        assert_eq!(mock.call_count(), 1);
    }

    #[test]
    fn test_402_activates_and_retries() {
        let mock = ScriptedClient::new()
            .respond(HttpResponse::new(402))
            .respond(HttpResponse::new(200).with_body(br#"{"value":[{"id":9,"count":1}]}"#.to_vec()))
            .respond(HttpResponse::new(200).with_body(br#"{"success":true}"#.to_vec()))
            .respond(image(b"jpg"));

        let outcome = engine(&mock, session().with_allow_spend(true)).fetch(RESOURCE);

        assert!(outcome.is_success());
        assert_eq!(mock.requests()[3].url, RESOURCE);
    }

    #[test]
    fn test_402_without_permission_is_fatal() {
        let mock = ScriptedClient::new().respond(HttpResponse::new(402));

        let outcome = engine(&mock, session()).fetch(RESOURCE);
        assert_eq!(
            outcome,
            FetchOutcome::FatalFailure(FetchFailure::EntitlementUnavailable)
        );
        assert_eq!(mock.call_count(), 1);
    }

    #[test]
    fn test_unknown_status_is_fatal_without_retry() {
        let mock = ScriptedClient::new()
            .respond(HttpResponse::new(500))
            .respond(image(b"never"));

        let outcome = engine(&mock, session()).fetch(RESOURCE);
        assert_eq!(
            outcome,
            FetchOutcome::FatalFailure(FetchFailure::UnexpectedStatus { status: 500 })
        );
        assert_eq!(mock.call_count(), 1);
    }

    #[test]
    fn test_transport_errors_are_retried() {
        let mock = ScriptedClient::new()
            .fail(TransportError::Timeout("slow".to_string()))
            .fail(TransportError::Connect("reset".to_string()))
            .respond(image(b"jpg"));

        assert!(engine(&mock, session()).fetch(RESOURCE).is_success());
        assert_eq!(mock.call_count(), 3);
    }

    #[test]
    fn test_budget_exhaustion_after_four_transport_errors() {
        let mut mock = ScriptedClient::new();
        for _ in 0..5 {
            mock = mock.fail(TransportError::Timeout("slow".to_string()));
        }

        let outcome = engine(&mock, session()).fetch(RESOURCE);
        match outcome {
            FetchOutcome::FatalFailure(FetchFailure::RetryBudgetExhausted { attempts, .. }) => {
                assert_eq!(attempts, 4)
            }
            other => panic!("expected exhausted budget, got {:?}", other),
        }
        assert_eq!(mock.call_count(), 4);
    }

    #[test]
    fn test_corrective_branches_consume_budget() {
        // Two successful logins and two internal redirects use up all four
        // iterations before the resource is ever served.
        let mock = ScriptedClient::new()
            .respond(HttpResponse::new(302).with_location("/login"))
            .respond(token())
            .respond(HttpResponse::new(301).with_location("/lksrv/a"))
            .respond(HttpResponse::new(302).with_location("/login"))
            .respond(token())
            .respond(HttpResponse::new(301).with_location("/lksrv/b"))
            .respond(image(b"never"));

        let outcome = engine(&mock, session()).fetch(RESOURCE);
        assert!(matches!(
            outcome,
            FetchOutcome::FatalFailure(FetchFailure::RetryBudgetExhausted { attempts: 4, .. })
        ));
    }

    #[test]
    fn test_max_attempts_is_clamped() {
        let mock = ScriptedClient::new();
        let engine = engine(&mock, session()).with_max_attempts(10);
        assert_eq!(engine.max_attempts, DEFAULT_MAX_ATTEMPTS);
        let engine = engine.with_max_attempts(0);
        assert_eq!(engine.max_attempts, 1);
    }

    #[test]
    fn test_failure_status_accessor() {
        assert_eq!(FetchFailure::UnexpectedStatus { status: 404 }.status(), Some(404));
        assert_eq!(FetchFailure::AuthenticationFailed.status(), None);
        assert_eq!(
            FetchFailure::UnexpectedStatus { status: 404 }.to_string(),
            "unexpected status 404"
        );
    }

    #[test]
    fn test_retry_budget_counts() {
        let mut budget = RetryBudget::new(2);
        assert!(budget.consume());
        assert!(budget.consume());
        assert!(!budget.consume());
        assert_eq!(budget.used(), 2);
        assert_eq!(RetryBudget::new(100).remaining(), DEFAULT_MAX_ATTEMPTS);
    }

    proptest! {
        #[test]
        fn prop_attempts_never_exceed_budget(budget in 1u32..=4, failures in 0usize..8) {
            let mut mock = ScriptedClient::new();
            for _ in 0..failures {
                mock = mock.fail(TransportError::Connect("down".to_string()));
            }
            mock = mock.respond(image(b"jpg"));

            let outcome = engine(&mock, session()).with_max_attempts(budget).fetch(RESOURCE);

            prop_assert!(mock.call_count() as u32 <= budget);
            prop_assert_eq!(outcome.is_success(), failures < budget as usize);
        }
    }
}
