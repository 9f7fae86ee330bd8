// tests/digest_pool.rs

use std::collections::BTreeMap;
use std::error::Error;
use std::thread;

use buildcause::digest::{DigestAlgorithm, compute_digest, compute_digest_named, sha256_hex};
use buildcause::errors::BuildCauseError;
use buildcause::material::{Material, ScmKind, ScmMaterial};

type TestResult = Result<(), Box<dyn Error>>;

const SHA256_ABC: &str = "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad";

#[test]
fn equal_input_gives_equal_digest_on_reuse() {
    for _ in 0..5 {
        assert_eq!(sha256_hex("abc"), SHA256_ABC);
    }
}

#[test]
fn engine_is_clean_for_the_next_caller() {
    let first = sha256_hex("abc");
    let other = sha256_hex("something else entirely");
    let again = sha256_hex("abc");

    assert_ne!(first, other);
    assert_eq!(first, again);
}

#[test]
fn incremental_updates_match_single_update() {
    let split = compute_digest(DigestAlgorithm::Sha256, |d| {
        d.update("a").update("b").update("c");
    });
    assert_eq!(split, SHA256_ABC);
}

#[test]
fn nested_digest_does_not_corrupt_outer_one() {
    let mut inner = String::new();
    let outer = compute_digest(DigestAlgorithm::Sha256, |d| {
        d.update("a");
        inner = sha256_hex("xyz");
        d.update("bc");
    });

    assert_eq!(outer, SHA256_ABC);
    assert_eq!(inner, sha256_hex("xyz"));
}

#[test]
fn threads_agree_on_digests() {
    let handles: Vec<_> = (0..8)
        .map(|i| {
            thread::spawn(move || {
                (0..100)
                    .map(|j| sha256_hex(format!("{}-{}", i % 2, j)))
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    let results: Vec<Vec<String>> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    for (i, result) in results.iter().enumerate() {
        assert_eq!(result, &results[i % 2]);
    }
}

#[test]
fn algorithms_are_selected_by_name() -> TestResult {
    let sha256 = compute_digest_named("sha-256", |d| {
        d.update("abc");
    })?;
    assert_eq!(sha256, SHA256_ABC);

    let sha512 = compute_digest_named("SHA_512", |d| {
        d.update("abc");
    })?;
    assert_eq!(sha512.len(), 128);

    let blake = compute_digest_named("blake3", |d| {
        d.update("abc");
    })?;
    assert_eq!(blake, blake3::hash(b"abc").to_hex().to_string());
    Ok(())
}

#[test]
fn unsupported_algorithm_is_rejected_before_hashing() {
    let mut ran = false;
    let result = compute_digest_named("MD5", |_| ran = true);

    assert!(matches!(result, Err(BuildCauseError::UnsupportedDigest(name)) if name == "MD5"));
    assert!(!ran);
}

fn scm(url: &str) -> ScmMaterial {
    ScmMaterial::new(ScmKind::Git, url)
}

#[test]
fn fingerprint_ignores_folder_name_and_password() {
    let base = Material::Scm(scm("https://example.com/app.git"));

    let mut relocated = scm("https://example.com/app.git");
    relocated.folder = Some("checkout".to_string());
    relocated.name = Some("app".to_string());
    relocated.password = Some("s3cret".to_string());

    assert_eq!(base.fingerprint(), Material::Scm(relocated).fingerprint());
    assert_eq!(base.fingerprint(), base.clone().fingerprint());
    assert_eq!(base.fingerprint().len(), 64);
}

#[test]
fn fingerprint_tracks_identity_fields() {
    let base = Material::Scm(scm("https://example.com/app.git"));

    let mut branch = scm("https://example.com/app.git");
    branch.branch = Some("release".to_string());
    let other_url = Material::Scm(scm("https://example.com/other.git"));
    let svn = Material::scm(ScmKind::Svn, "https://example.com/app.git");

    assert_ne!(base.fingerprint(), Material::Scm(branch).fingerprint());
    assert_ne!(base.fingerprint(), other_url.fingerprint());
    assert_ne!(base.fingerprint(), svn.fingerprint());
    assert_ne!(
        Material::dependency("a", "b").fingerprint(),
        Material::dependency("b", "a").fingerprint()
    );
}

#[test]
fn plugin_configuration_values_cannot_forge_extra_fields() {
    let embedded = Material::plugin(
        "scm.plugin",
        BTreeMap::from([("a".to_string(), "b<|>c=d".to_string())]),
    );
    let split = Material::plugin(
        "scm.plugin",
        BTreeMap::from([
            ("a".to_string(), "b".to_string()),
            ("c".to_string(), "d".to_string()),
        ]),
    );
    let shifted = Material::plugin(
        "scm.plugin",
        BTreeMap::from([("ab".to_string(), String::new())]),
    );
    let unshifted = Material::plugin(
        "scm.plugin",
        BTreeMap::from([("a".to_string(), "b".to_string())]),
    );

    assert_ne!(embedded.fingerprint(), split.fingerprint());
    assert_ne!(shifted.fingerprint(), unshifted.fingerprint());
}

#[test]
fn field_boundaries_are_part_of_the_digest() {
    let one = compute_digest(DigestAlgorithm::Sha256, |d| {
        d.field("ab", "c");
    });
    let other = compute_digest(DigestAlgorithm::Sha256, |d| {
        d.field("a", "bc");
    });
    assert_ne!(one, other);
}
