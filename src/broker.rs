//! Core callback decision logic, independent of any HTTP transport.
//!
//! The broker consumes an already-decoded request (method plus query
//! parameters) and produces a response descriptor. Transports — the axum
//! listener in this binary, or anything else — translate at the edge, so the
//! redirect/validation logic stays a pure function that tests can drive
//! directly with arbitrary secrets.
//!
//! Checks run in a fixed order and fail closed: any ambiguity terminates with
//! an error response before a redirect is ever constructed from
//! attacker-influenced data.

use serde_json::json;

use crate::oauth::state;

/// An inbound callback request, decoded by a transport adapter.
#[derive(Debug, Clone)]
pub struct BrokerRequest {
    /// HTTP method name, uppercase (e.g. `"GET"`).
    pub method: String,
    pub code: Option<String>,
    pub state: Option<String>,
}

/// A transport-agnostic response descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerResponse {
    pub status: u16,
    pub headers: Vec<(&'static str, String)>,
    pub body: Option<serde_json::Value>,
}

impl BrokerResponse {
    /// 302 redirect. No body; the browser follows `Location`.
    fn redirect(location: String) -> Self {
        Self {
            status: 302,
            headers: vec![
                ("Access-Control-Allow-Origin", "*".to_string()),
                ("Location", location),
            ],
            body: None,
        }
    }

    /// JSON error with a machine-readable `error` code.
    fn error(status: u16, error: &str, details: Option<&str>) -> Self {
        let body = match details {
            Some(details) => json!({ "error": error, "details": details }),
            None => json!({ "error": error }),
        };
        Self {
            status,
            headers: vec![
                ("Access-Control-Allow-Origin", "*".to_string()),
                (
                    "Content-Type",
                    "application/json; charset=utf-8".to_string(),
                ),
            ],
            body: Some(body),
        }
    }

    /// Value of the first header with the given name, if any.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Generic client-facing text for any state validation failure. The specific
/// reason is logged, never returned.
const INVALID_STATE_DETAILS: &str =
    "Unable to validate the state parameter. The link may have expired or is invalid.";

/// Maps OAuth callback requests to redirects back to the originating app.
///
/// Holds only read-only configuration; `handle` is safe to call concurrently
/// from any number of requests.
pub struct CallbackBroker {
    secret: Option<String>,
    /// Permitted target hosts. Empty disables the check entirely.
    allowed_domains: Vec<String>,
}

impl CallbackBroker {
    pub fn new(secret: Option<String>, allowed_domains: Vec<String>) -> Self {
        let secret = secret.filter(|s| !s.is_empty());
        Self {
            secret,
            allowed_domains,
        }
    }

    /// Decide a single callback request. One pass, no retries.
    pub fn handle(&self, request: &BrokerRequest) -> BrokerResponse {
        if request.method != "GET" {
            return BrokerResponse::error(405, "method_not_allowed", None);
        }

        let Some(secret) = self.secret.as_deref() else {
            // Operator error, not a client error. Logged distinctly.
            tracing::error!("OAUTH_STATE_SECRET is not configured; refusing callback");
            return BrokerResponse::error(500, "server_configuration_error", None);
        };

        let (code, raw_state) = match (
            request.code.as_deref().filter(|c| !c.is_empty()),
            request.state.as_deref().filter(|s| !s.is_empty()),
        ) {
            (Some(code), Some(state)) => (code, state),
            _ => {
                return BrokerResponse::error(
                    400,
                    "missing_parameters",
                    Some("Both code and state query parameters are required."),
                );
            }
        };

        let payload = match state::decrypt(raw_state, secret) {
            Ok(payload) => payload,
            Err(kind) => {
                // Raw state is logged for operator diagnosis only.
                tracing::warn!(%kind, state = %raw_state, "state token rejected");
                return BrokerResponse::error(400, "invalid_state", Some(INVALID_STATE_DETAILS));
            }
        };

        if !self.target_allowed(&payload.target) {
            tracing::warn!(target = %payload.target, "target origin not in allow-list");
            return BrokerResponse::error(400, "invalid_state", Some(INVALID_STATE_DETAILS));
        }

        // Forward the normalized token, not the raw query value, so the
        // re-encoded state matches what was decrypted.
        let normalized_state = state::normalize(raw_state);
        let location = format!(
            "{}/api/auth/{}/callback?code={}&state={}",
            payload.target,
            payload.provider,
            urlencoding::encode(code),
            urlencoding::encode(&normalized_state),
        );

        tracing::info!(target = %payload.target, provider = %payload.provider, "redirecting callback");
        BrokerResponse::redirect(location)
    }

    /// Allow-list check. Disabled (always true) when no domains are
    /// configured, matching the upstream default. Entries starting with `.`
    /// match any subdomain; others must match the host exactly.
    fn target_allowed(&self, target: &str) -> bool {
        if self.allowed_domains.is_empty() {
            return true;
        }

        let Ok(url) = url::Url::parse(target) else {
            return false;
        };
        if url.scheme() != "http" && url.scheme() != "https" {
            return false;
        }
        let Some(host) = url.host_str() else {
            return false;
        };

        self.allowed_domains.iter().any(|entry| {
            if let Some(suffix) = entry.strip_prefix('.') {
                host == suffix || host.ends_with(entry.as_str())
            } else {
                host == entry
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oauth::state::{encrypt, StatePayload};

    const SECRET: &str = "s3cr3t";

    fn broker() -> CallbackBroker {
        CallbackBroker::new(Some(SECRET.to_string()), Vec::new())
    }

    fn get_request(code: Option<&str>, state: Option<&str>) -> BrokerRequest {
        BrokerRequest {
            method: "GET".to_string(),
            code: code.map(str::to_string),
            state: state.map(str::to_string),
        }
    }

    fn mint(target: &str, provider: &str) -> String {
        encrypt(
            &StatePayload {
                target: target.to_string(),
                provider: provider.to_string(),
            },
            SECRET,
        )
        .unwrap()
    }

    #[test]
    fn test_end_to_end_redirect() {
        let token = mint("https://app.example.com", "gitlab");
        let response = broker().handle(&get_request(Some("abc123"), Some(&token)));

        assert_eq!(response.status, 302);
        assert_eq!(response.body, None);
        assert_eq!(response.header("Access-Control-Allow-Origin"), Some("*"));
        assert_eq!(
            response.header("Location").unwrap(),
            format!(
                "https://app.example.com/api/auth/gitlab/callback?code=abc123&state={}",
                urlencoding::encode(&token)
            )
        );
    }

    #[test]
    fn test_space_mangled_state_still_redirects() {
        let token = (0..64)
            .find_map(|_| {
                let t = mint("https://app.example.com", "github");
                t.contains('+').then_some(t)
            })
            .expect("no token containing '+' after 64 attempts");
        let mangled = token.replace('+', " ");

        let response = broker().handle(&get_request(Some("abc123"), Some(&mangled)));
        assert_eq!(response.status, 302);
        // The forwarded state is the normalized token, not the mangled one.
        assert_eq!(
            response.header("Location").unwrap(),
            format!(
                "https://app.example.com/api/auth/github/callback?code=abc123&state={}",
                urlencoding::encode(&token)
            )
        );
    }

    #[test]
    fn test_code_is_url_encoded_in_redirect() {
        let token = mint("https://app.example.com", "github");
        let response = broker().handle(&get_request(Some("a/b&c=d"), Some(&token)));
        assert_eq!(response.status, 302);
        let location = response.header("Location").unwrap();
        assert!(location.contains("code=a%2Fb%26c%3Dd"), "{location}");
    }

    #[test]
    fn test_non_get_is_405() {
        let token = mint("https://app.example.com", "github");
        let request = BrokerRequest {
            method: "POST".to_string(),
            code: Some("abc123".to_string()),
            state: Some(token),
        };
        let response = broker().handle(&request);
        assert_eq!(response.status, 405);
        assert_eq!(response.body.unwrap()["error"], "method_not_allowed");
    }

    #[test]
    fn test_missing_secret_is_500() {
        let token = mint("https://app.example.com", "github");
        for secret in [None, Some(String::new())] {
            let broker = CallbackBroker::new(secret, Vec::new());
            let response = broker.handle(&get_request(Some("abc123"), Some(&token)));
            assert_eq!(response.status, 500);
            assert_eq!(response.body.unwrap()["error"], "server_configuration_error");
        }
    }

    #[test]
    fn test_missing_parameters_are_400() {
        let token = mint("https://app.example.com", "github");
        let cases = [
            get_request(None, Some(&token)),
            get_request(Some("abc123"), None),
            get_request(None, None),
            get_request(Some(""), Some(&token)),
            get_request(Some("abc123"), Some("")),
        ];
        for request in cases {
            let response = broker().handle(&request);
            assert_eq!(response.status, 400, "request: {request:?}");
            assert_eq!(
                response.body.unwrap()["error"],
                "missing_parameters",
                "request: {request:?}"
            );
        }
    }

    #[test]
    fn test_undecryptable_state_is_400_with_generic_details() {
        let response = broker().handle(&get_request(Some("abc123"), Some("garbage-token")));
        assert_eq!(response.status, 400);
        let body = response.body.unwrap();
        assert_eq!(body["error"], "invalid_state");
        assert_eq!(body["details"], INVALID_STATE_DETAILS);
    }

    #[test]
    fn test_foreign_secret_state_is_400() {
        // Token minted by a deployment with a different secret.
        let token = encrypt(
            &StatePayload {
                target: "x".to_string(),
                provider: "github".to_string(),
            },
            "another-secret",
        )
        .unwrap();
        let response = broker().handle(&get_request(Some("abc123"), Some(&token)));
        assert_eq!(response.status, 400);
        let body = response.body.unwrap();
        assert_eq!(body["error"], "invalid_state");
        assert_eq!(body["details"], INVALID_STATE_DETAILS);
    }

    #[test]
    fn test_allow_list_disabled_by_default() {
        let token = mint("https://anything.example.net", "github");
        let response = broker().handle(&get_request(Some("abc123"), Some(&token)));
        assert_eq!(response.status, 302);
    }

    #[test]
    fn test_allow_list_exact_and_suffix_match() {
        let broker = CallbackBroker::new(
            Some(SECRET.to_string()),
            vec![".vercel.app".to_string(), "localhost".to_string()],
        );

        let allowed = mint("https://my-app.vercel.app", "github");
        assert_eq!(
            broker.handle(&get_request(Some("c"), Some(&allowed))).status,
            302
        );

        let apex = mint("https://vercel.app", "github");
        assert_eq!(broker.handle(&get_request(Some("c"), Some(&apex))).status, 302);

        let local = mint("http://localhost:3000", "github");
        assert_eq!(broker.handle(&get_request(Some("c"), Some(&local))).status, 302);

        let denied = mint("https://evil.example.com", "github");
        let response = broker.handle(&get_request(Some("c"), Some(&denied)));
        assert_eq!(response.status, 400);
        assert_eq!(response.body.unwrap()["error"], "invalid_state");
    }

    #[test]
    fn test_allow_list_rejects_unparseable_target() {
        let broker = CallbackBroker::new(
            Some(SECRET.to_string()),
            vec!["localhost".to_string()],
        );
        let token = mint("not a url", "github");
        assert_eq!(broker.handle(&get_request(Some("c"), Some(&token))).status, 400);
    }

    #[test]
    fn test_check_order_method_before_secret() {
        // 405 wins over 500 even when the secret is missing.
        let broker = CallbackBroker::new(None, Vec::new());
        let request = BrokerRequest {
            method: "POST".to_string(),
            code: None,
            state: None,
        };
        assert_eq!(broker.handle(&request).status, 405);
    }
}
