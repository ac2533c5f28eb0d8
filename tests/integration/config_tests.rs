//! Config files driving a real client

use idx_auth::config::{ENV_CLIENT_ID, ENV_CLIENT_SECRET, ENV_ISSUER};
use idx_auth::IdxConfig;
use idx_tests::common::{form_value, header_value, IdxServer, REDIRECT_URI};
use std::io::Write;
use std::time::Duration;

fn config_file(issuer: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        r#"
[client]
issuer = "{issuer}"
client_id = "from-file"
redirect_uri = "{REDIRECT_URI}"
scopes = ["openid", "email"]

[transport]
timeout = "5s"
user_agent = "idx-tests/1.0"
device_token = "dt-file"

[polling]
min_interval = "10ms"
max_interval = "100ms"
max_wait = "1s"
"#
    )
    .unwrap();
    file
}

#[tokio::test]
async fn test_file_config_drives_requests() {
    let org = IdxServer::start().await;
    org.mount_bootstrap().await;
    let file = config_file(&org.issuer());

    let config = temp_env::with_vars(
        [
            (ENV_ISSUER, None::<&str>),
            (ENV_CLIENT_ID, None),
            (ENV_CLIENT_SECRET, None),
        ],
        || IdxConfig::load(file.path()).unwrap(),
    );
    assert_eq!(config.polling.max_wait, Some(Duration::from_secs(1)));

    org.client_with(config).start().await.unwrap();

    let interact = &org.requests_to("/oauth2/default/v1/interact").await[0];
    assert_eq!(form_value(interact, "client_id").as_deref(), Some("from-file"));
    assert_eq!(form_value(interact, "scope").as_deref(), Some("openid email"));
    assert_eq!(header_value(interact, "user-agent").as_deref(), Some("idx-tests/1.0"));
    assert_eq!(header_value(interact, "x-device-token").as_deref(), Some("dt-file"));
}

#[tokio::test]
async fn test_environment_overrides_file_credentials() {
    let org = IdxServer::start().await;
    org.mount_bootstrap().await;
    let file = config_file("https://unused.example.com/oauth2/default");
    let issuer = org.issuer();

    let config = temp_env::with_vars(
        [
            (ENV_ISSUER, Some(issuer.as_str())),
            (ENV_CLIENT_ID, Some("from-env")),
            (ENV_CLIENT_SECRET, Some("env-secret")),
        ],
        || IdxConfig::load(file.path()).unwrap(),
    );

    org.client_with(config).start().await.unwrap();

    let interact = &org.requests_to("/oauth2/default/v1/interact").await[0];
    assert_eq!(form_value(interact, "client_id").as_deref(), Some("from-env"));
    assert_eq!(form_value(interact, "client_secret").as_deref(), Some("env-secret"));
}
