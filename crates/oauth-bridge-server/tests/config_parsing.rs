use std::time::Duration;
use std::{env, fs};

use oauth_bridge::CredentialMode;
use oauth_bridge_server::config::loader::load_config;

#[test]
fn config_parsing_and_env_overrides_and_validation() {
    // Create a temporary TOML configuration file
    let dir = tempfile::tempdir().expect("tmp dir");
    let path = dir.path().join("oauth-bridge.toml");

    let toml_content = r#"
[server]
host = "127.0.0.1"
port = 8081

[logging]
level = "debug"

[host]
secret = "file-secret"
cookie_prefix = "cms"
exchange_timeout = "5s"

[bridge]
collection = "members"
subject_field = "external_id"

[bridge.credential]
mode = "visible_field"

[bridge.session]
ttl = "5m"

[collection]
slug = "members"

[[collection.fields]]
type = "data"
name = "email"
save_to_jwt = true

[[collection.fields]]
type = "data"
name = "role"
save_to_jwt = true

[[strategies]]
client_id = "client_id"
client_secret = "client_secret"
authorization_url = "https://id.example.com/oauth/authorize"
token_url = "https://id.example.com/oauth/token"
userinfo_url = "https://id.example.com/oauth/userinfo"
callback_url = "https://app.example.com/auth/example/return"
scope = "basic"
update_on_login = true
label = "Sign in with Example"

[[strategies]]
authorization_url = "https://other.example.com/authorize"
token_url = "https://other.example.com/token"
authorize_path = "/auth/other"
callback_path = "/auth/other/return"

[[seed_users]]
external_id = "existing_sub"
email = "test@example.org"
"#;
    fs::write(&path, toml_content).expect("write toml");

    // 1) Valid config parses
    let cfg = load_config(path.to_str()).expect("should parse config");
    assert_eq!(cfg.server.port, 8081);
    assert_eq!(cfg.logging.level.to_ascii_lowercase(), "debug");
    assert_eq!(cfg.host.secret.as_deref(), Some("file-secret"));
    assert_eq!(cfg.host.cookie_prefix, "cms");
    assert_eq!(cfg.host.exchange_timeout, Duration::from_secs(5));
    assert_eq!(cfg.bridge.subject_field, "external_id");
    assert_eq!(cfg.bridge.credential.mode, CredentialMode::VisibleField);
    assert_eq!(cfg.bridge.session.ttl, Duration::from_secs(300));
    assert_eq!(cfg.collection.jwt_field_names(), vec!["email", "role"]);
    assert_eq!(cfg.strategies.len(), 2);
    assert!(cfg.strategies[0].update_on_login);
    assert_eq!(
        cfg.strategies[0].resolved_callback_path(),
        "/auth/example/return"
    );
    assert!(!cfg.strategies[1].has_credentials());
    assert_eq!(cfg.seed_users.len(), 1);
    assert_eq!(cfg.seed_users[0]["external_id"], "existing_sub");

    // 2) Env override should win over file
    unsafe {
        env::set_var("OAUTH_BRIDGE__HOST__COOKIE_PREFIX", "payload");
    }
    let cfg_env = load_config(path.to_str()).expect("should parse config with env overrides");
    assert_eq!(cfg_env.host.cookie_prefix, "payload");
    // cleanup env var
    unsafe {
        env::remove_var("OAUTH_BRIDGE__HOST__COOKIE_PREFIX");
    }

    // 3) Missing secret is fatal
    let no_secret_path = dir.path().join("no-secret.toml");
    fs::write(&no_secret_path, "[server]\nport = 8082\n").expect("write toml");
    let err = load_config(no_secret_path.to_str()).expect_err("expected validation error");
    assert!(err.contains("host.secret is required"));

    // 4) Collection mismatch is rejected
    let mismatch_path = dir.path().join("mismatch.toml");
    let mismatch_toml = r#"
[host]
secret = "s"

[bridge]
collection = "members"
"#;
    fs::write(&mismatch_path, mismatch_toml).expect("write toml");
    let err = load_config(mismatch_path.to_str()).expect_err("expected validation error");
    assert!(err.contains("must match bridge.collection"));
}
