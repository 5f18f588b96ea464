use super::*;
use tempfile::tempdir;

fn paths_in(dir: &Path) -> Paths {
    Paths::from_root(dir.to_path_buf())
}

#[test]
fn load_or_generate_is_idempotent() {
    let dir = tempdir().unwrap();
    let paths = paths_in(dir.path());

    let first = Identity::load_or_generate(&paths).unwrap();
    let second = Identity::load_or_generate(&paths).unwrap();

    assert_eq!(first.public_key_base64(), second.public_key_base64());
}

#[test]
fn private_key_is_clamped() {
    let dir = tempdir().unwrap();
    let paths = paths_in(dir.path());
    let identity = Identity::load_or_generate(&paths).unwrap();

    let bytes = identity.secret.to_bytes();
    assert_eq!(bytes[0] & 0b0000_0111, 0);
    assert_eq!(bytes[31] & 0b1000_0000, 0);
    assert_eq!(bytes[31] & 0b0100_0000, 0b0100_0000);
}

#[test]
fn identity_file_has_owner_only_permissions() {
    let dir = tempdir().unwrap();
    let paths = paths_in(dir.path());
    Identity::load_or_generate(&paths).unwrap();

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let meta = fs::metadata(&paths.identity).unwrap();
        assert_eq!(meta.permissions().mode() & 0o777, 0o600);
    }
}

#[test]
fn update_device_id_persists_across_reload() {
    let dir = tempdir().unwrap();
    let paths = paths_in(dir.path());
    let mut identity = Identity::load_or_generate(&paths).unwrap();

    identity
        .update_device_id(&paths, "dev-123".to_string())
        .unwrap();
    assert_eq!(identity.device_id(), Some("dev-123"));

    let reloaded = Identity::load_or_generate(&paths).unwrap();
    assert_eq!(reloaded.device_id(), Some("dev-123"));
}

#[test]
fn debug_output_never_contains_private_key_bytes() {
    let dir = tempdir().unwrap();
    let paths = paths_in(dir.path());
    let identity = Identity::load_or_generate(&paths).unwrap();

    let rendered = format!("{identity:?}");
    assert!(rendered.contains("redacted"));
    assert!(!rendered.contains(&STANDARD.encode(identity.secret.to_bytes())));
}

#[test]
fn invalid_base64_private_key_is_rejected() {
    let dir = tempdir().unwrap();
    let paths = paths_in(dir.path());
    paths.ensure_root_exists().unwrap();

    fs::write(
        &paths.identity,
        r#"{"private_key":"not-base64!!","public_key":"x"}"#,
    )
    .unwrap();

    let result = Identity::load_or_generate(&paths);
    assert!(result.is_err());
}

#[test]
fn wrong_length_private_key_is_rejected() {
    let dir = tempdir().unwrap();
    let paths = paths_in(dir.path());
    paths.ensure_root_exists().unwrap();

    let short = STANDARD.encode([1u8; 16]);
    fs::write(
        &paths.identity,
        format!(r#"{{"private_key":"{short}","public_key":"x"}}"#),
    )
    .unwrap();

    let result = Identity::load_or_generate(&paths);
    assert!(result.is_err());
    assert!(result.unwrap_err().to_string().contains("32-byte"));
}
