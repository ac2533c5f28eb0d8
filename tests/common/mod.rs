//! Common test utilities shared across integration and E2E tests

pub mod docs;
pub mod idx_server;

pub use idx_server::*;

/// Client id every test client is registered with
pub const CLIENT_ID: &str = "0oa-test-client";

/// Redirect URI every test client uses
pub const REDIRECT_URI: &str = "http://localhost:8080/login/callback";

/// Interaction handle the mock interact endpoint hands out
pub const HANDLE: &str = "ih-test-1";

/// State handle carried by every mock document
pub const STATE_HANDLE: &str = "02state";

/// Setup logging for tests
pub fn setup_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("idx_auth=debug")
        .with_test_writer()
        .try_init();
}
