//! Mock Identity Engine org on a wiremock server

use super::{docs, CLIENT_ID, HANDLE, REDIRECT_URI};
use idx_auth::{ClientConfig, IdxClient, IdxConfig, PollPolicy};
use serde_json::Value;
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

/// Poll policy fast enough for real-time tests
pub fn fast_polling() -> PollPolicy {
    PollPolicy {
        min_interval: Duration::from_millis(10),
        max_interval: Duration::from_millis(50),
        max_wait: Some(Duration::from_secs(5)),
    }
}

/// An org with a custom authorization server at `/oauth2/default`
pub struct IdxServer {
    pub server: MockServer,
}

impl IdxServer {
    pub async fn start() -> Self {
        Self {
            server: MockServer::start().await,
        }
    }

    /// Origin, used in document hrefs
    pub fn base(&self) -> String {
        self.server.uri()
    }

    pub fn issuer(&self) -> String {
        format!("{}/oauth2/default", self.server.uri())
    }

    pub fn config(&self) -> IdxConfig {
        let client = ClientConfig::new(&self.issuer(), CLIENT_ID, REDIRECT_URI)
            .expect("mock issuer is a valid URL");
        let mut config = IdxConfig::new(client);
        config.polling = fast_polling();
        config
    }

    pub fn client(&self) -> IdxClient {
        self.client_with(self.config())
    }

    pub fn client_with(&self, config: IdxConfig) -> IdxClient {
        IdxClient::new(config).expect("HTTP client builds")
    }

    /// `/v1/interact` answers with [`HANDLE`]
    pub async fn mount_interact(&self) {
        Mock::given(method("POST"))
            .and(path("/oauth2/default/v1/interact"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({ "interaction_handle": HANDLE })),
            )
            .mount(&self.server)
            .await;
    }

    /// Introspect answers with `doc`
    pub async fn mount_introspect(&self, doc: Value) {
        self.mount_json("/idp/idx/introspect", 200, doc).await;
    }

    /// Interact plus introspect of the identify document
    pub async fn mount_bootstrap(&self) {
        self.mount_interact().await;
        self.mount_introspect(docs::identify(&self.base())).await;
    }

    /// `POST path` answers with `status` and `body`, every time
    pub async fn mount_json(&self, route: &str, status: u16, body: Value) {
        Mock::given(method("POST"))
            .and(path(route))
            .respond_with(ResponseTemplate::new(status).set_body_json(body))
            .mount(&self.server)
            .await;
    }

    /// `POST path` answers with `body` for the first `times` requests only
    ///
    /// Later mounts on the same path take over once this one is used up.
    pub async fn mount_json_times(&self, route: &str, times: u64, status: u16, body: Value) {
        Mock::given(method("POST"))
            .and(path(route))
            .respond_with(ResponseTemplate::new(status).set_body_json(body))
            .up_to_n_times(times)
            .mount(&self.server)
            .await;
    }

    /// Token endpoint issues [`docs::tokens`]
    pub async fn mount_token(&self) {
        self.mount_json("/oauth2/default/v1/token", 200, docs::tokens()).await;
    }

    /// Cancel endpoint confirms the cancellation
    pub async fn mount_cancel(&self) {
        self.mount_json("/idp/idx/cancel", 200, docs::cancelled()).await;
    }

    /// Every request the server has seen
    pub async fn requests(&self) -> Vec<Request> {
        self.server.received_requests().await.unwrap_or_default()
    }

    /// Requests to one path, in arrival order
    pub async fn requests_to(&self, route: &str) -> Vec<Request> {
        self.requests()
            .await
            .into_iter()
            .filter(|r| r.url.path() == route)
            .collect()
    }

    /// Paths requested, in arrival order
    pub async fn paths(&self) -> Vec<String> {
        self.requests()
            .await
            .into_iter()
            .map(|r| r.url.path().to_string())
            .collect()
    }
}

/// JSON body of a recorded request
pub fn json_body(request: &Request) -> Value {
    serde_json::from_slice(&request.body).expect("request body is JSON")
}

/// Form body of a recorded request as key/value pairs
pub fn form_body(request: &Request) -> Vec<(String, String)> {
    url::form_urlencoded::parse(&request.body)
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect()
}

/// Value of one form field
pub fn form_value(request: &Request, key: &str) -> Option<String> {
    form_body(request)
        .into_iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v)
}

/// Header value as text
pub fn header_value(request: &Request, name: &str) -> Option<String> {
    request
        .headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}
