//! Configuration files - loading, validation and the gateways they produce

use gatehouse::transport::CAPABILITY_HEADER;
use gatehouse::{
    CapabilityGrant, Decision, GateConfig, GateError, GateRequest, GateSelection, Gateway,
    ReasonCode,
};
use std::io::Write;
use tempfile::NamedTempFile;

fn write_config(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}

const DOCS_CONFIG: &str = r#"
mode = "both"

[consent]
essential = "necessary"
rules = [
    { prefix = "/track", requires = ["analytics"] },
]

[capability]
default_permission = "anon.read"
realm = "docs"
trusted_issuers = ["docs-auth"]
rules = [
    { permission = "docs.write", methods = ["POST", "PUT"], paths = ["/docs/*"] },
    { permission = "admin", paths = ["/admin/*"] },
]

[cache]
capacity = 64

[server]
listen = "0.0.0.0:9090"
origin = "https://docs.internal:8443/"
security_headers = false
"#;

#[test]
fn test_load_from_file() {
    let file = write_config(DOCS_CONFIG);
    let config = GateConfig::load(file.path()).unwrap();

    assert_eq!(config.mode, GateSelection::Both);
    assert_eq!(config.consent.essential, "necessary");
    assert_eq!(config.capability.realm, "docs");
    assert_eq!(config.capability.trusted_issuers, vec!["docs-auth".to_string()]);
    assert_eq!(config.cache.capacity, 64);
    assert_eq!(config.server.listen, "0.0.0.0:9090");
    assert!(!config.server.security_headers);
}

#[test]
fn test_missing_file() {
    let dir = tempfile::tempdir().unwrap();
    let err = GateConfig::load(dir.path().join("absent.toml")).unwrap_err();
    assert!(matches!(err, GateError::Io(_)));
}

#[test]
fn test_syntax_error() {
    let file = write_config("[consent\nessential = ");
    let err = GateConfig::load(file.path()).unwrap_err();
    assert!(matches!(err, GateError::Toml(_)));
}

#[test]
fn test_empty_file_is_defaults() {
    let file = write_config("");
    let config = GateConfig::load(file.path()).unwrap();
    assert_eq!(config, GateConfig::default());
}

#[test]
fn test_invalid_method_rejected() {
    let file = write_config(
        r#"
        [capability]
        rules = [{ permission = "x", methods = ["GET /"], paths = ["/x/*"] }]
        "#,
    );
    let err = GateConfig::load(file.path()).unwrap_err();
    assert!(matches!(err, GateError::InvalidMethod(_)));
}

#[test]
fn test_oversized_cache_rejected() {
    let file = write_config("[cache]\ncapacity = 10000000\n");
    let err = GateConfig::load(file.path()).unwrap_err();
    assert!(matches!(err, GateError::Config(_)));
}

#[test]
fn test_gateway_from_loaded_config() {
    let file = write_config(DOCS_CONFIG);
    let config = GateConfig::load(file.path()).unwrap();
    let gateway = Gateway::from_config(&config).unwrap();

    // Undeclared consent path with no cookie, anonymous GET
    assert!(gateway.evaluate(&GateRequest::new("GET", "/docs/intro")).is_allowed());

    // Consent gate runs first
    match gateway.evaluate(&GateRequest::new("GET", "/track/pixel")) {
        Decision::Deny(denial) => assert_eq!(denial.reason, ReasonCode::ConsentRequired),
        Decision::Forward(_) => panic!("expected consent denial"),
    }

    // Capability gate with the configured realm
    match gateway.evaluate(&GateRequest::new("DELETE", "/admin/users")) {
        Decision::Deny(denial) => {
            assert_eq!(denial.reason, ReasonCode::NoCapability);
            assert_eq!(
                denial.header("WWW-Authenticate"),
                Some("Capability realm=\"docs\"")
            );
        }
        Decision::Forward(_) => panic!("expected capability denial"),
    }

    // Trusted issuer accepted, anything else rejected
    let now = chrono::Utc::now().timestamp();
    let trusted = CapabilityGrant::new(["docs.write"], now)
        .expires_in(300)
        .with_issuer("docs-auth")
        .encode()
        .unwrap();
    let request = GateRequest::new("PUT", "/docs/intro").with_header(CAPABILITY_HEADER, trusted);
    assert!(gateway.evaluate(&request).is_allowed());

    let unsigned = CapabilityGrant::new(["docs.write"], now)
        .expires_in(300)
        .encode()
        .unwrap();
    let request = GateRequest::new("PUT", "/docs/intro").with_header(CAPABILITY_HEADER, unsigned);
    match gateway.evaluate(&request) {
        Decision::Deny(denial) => assert_eq!(denial.reason, ReasonCode::InvalidCapability),
        Decision::Forward(_) => panic!("grant without issuer must be rejected"),
    }

    assert_eq!(gateway.engine().cache_size(), 1);
}

#[test]
fn test_default_config_roundtrip_through_file() {
    let text = GateConfig::default().to_toml_string().unwrap();
    let file = write_config(&text);
    assert_eq!(GateConfig::load(file.path()).unwrap(), GateConfig::default());
}
