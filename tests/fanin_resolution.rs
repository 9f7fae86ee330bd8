// tests/fanin_resolution.rs

use std::collections::BTreeMap;
use std::error::Error;

use buildcause::errors::{BuildCauseError, Result};
use buildcause::fanin::{FanInGraph, FanInResolver};
use buildcause::material::{Fingerprint, Material, MaterialRevisions, Modification};
use buildcause::ports::{ConfigProvider, RevisionStore};
use buildcause_test_utils::builders::{ConfigFileBuilder, dep, git_named, modification, ts};
use buildcause_test_utils::harness::Harness;
use buildcause_test_utils::init_tracing;

type TestResult = std::result::Result<(), Box<dyn Error>>;

/// U <- A <- P and U <- B <- P, with U built from one repository.
struct Diamond {
    h: Harness,
    u_repo: Material,
    dep_u: Material,
    dep_a: Material,
    dep_b: Material,
}

fn diamond(backtrack_limit: usize) -> Diamond {
    let u_repo = git_named("u-repo", "https://example.com/u.git");
    let dep_u = dep("U", "s");
    let dep_a = dep("A", "s");
    let dep_b = dep("B", "s");

    let config = ConfigFileBuilder::new()
        .pipeline("U", vec![u_repo.clone()])
        .pipeline("A", vec![dep_u.clone()])
        .pipeline("B", vec![dep_u.clone()])
        .pipeline("P", vec![dep_a.clone(), dep_b.clone()])
        .backtrack_limit(backtrack_limit)
        .build();

    let h = Harness::new(config);
    h.record(&u_repo, &[modification("u1", 1), modification("u2", 2)]);
    h.record_run("U", 1, "s", &[(&u_repo, "u1")], ts(10));
    h.record_run("U", 2, "s", &[(&u_repo, "u2")], ts(11));

    Diamond {
        h,
        u_repo,
        dep_u,
        dep_a,
        dep_b,
    }
}

fn resolve_with(
    h: &Harness,
    pipeline: &str,
    pinned: BTreeMap<Fingerprint, Modification>,
) -> Result<MaterialRevisions> {
    let materials = h.config.materials_of(pipeline).expect("pipeline exists");
    let mut histories = BTreeMap::new();
    for material in &materials {
        let fingerprint = material.fingerprint();
        let history = h.store.history(&fingerprint, 100)?;
        histories.insert(fingerprint, history);
    }
    FanInResolver::new(
        h.config.as_ref(),
        h.store.as_ref(),
        h.config.settings.fanin_backtrack_limit,
    )
    .resolve(pipeline, &materials, &histories, &pinned)
}

fn resolve(h: &Harness, pipeline: &str) -> Result<MaterialRevisions> {
    resolve_with(h, pipeline, BTreeMap::new())
}

fn revision_of<'a>(set: &'a MaterialRevisions, material: &Material) -> &'a str {
    set.find(&material.fingerprint())
        .expect("material in revision set")
        .latest_revision()
}

#[test]
fn graph_marks_common_upstream_as_shared() {
    let d = diamond(100);
    let materials = d.h.config.materials_of("P").unwrap();
    let graph = FanInGraph::build(d.h.config.as_ref(), "P", &materials);

    assert!(graph.has_fan_in());
    assert!(graph.is_shared(&d.dep_u.fingerprint()));
    assert!(graph.is_shared(&d.u_repo.fingerprint()));
    assert!(!graph.is_shared(&d.dep_a.fingerprint()));
    assert_eq!(graph.upstream.len(), 2);
}

#[test]
fn walks_ahead_path_back_to_common_upstream_revision() -> TestResult {
    init_tracing();
    let d = diamond(100);

    // A has consumed U/2; B has only seen U/1.
    d.h.record_run("A", 1, "s", &[(&d.dep_u, "U/1/s/1")], ts(20));
    d.h.record_run("A", 2, "s", &[(&d.dep_u, "U/2/s/1")], ts(21));
    d.h.record_run("B", 1, "s", &[(&d.dep_u, "U/1/s/1")], ts(22));

    let resolved = resolve(&d.h, "P")?;

    assert_eq!(revision_of(&resolved, &d.dep_a), "A/1/s/1");
    assert_eq!(revision_of(&resolved, &d.dep_b), "B/1/s/1");
    assert_eq!(resolved.len(), 2);
    Ok(())
}

#[test]
fn picks_newest_once_both_paths_caught_up() -> TestResult {
    let d = diamond(100);

    d.h.record_run("A", 1, "s", &[(&d.dep_u, "U/1/s/1")], ts(20));
    d.h.record_run("A", 2, "s", &[(&d.dep_u, "U/2/s/1")], ts(21));
    d.h.record_run("B", 1, "s", &[(&d.dep_u, "U/1/s/1")], ts(22));
    d.h.record_run("B", 2, "s", &[(&d.dep_u, "U/2/s/1")], ts(23));

    let resolved = resolve(&d.h, "P")?;

    assert_eq!(revision_of(&resolved, &d.dep_a), "A/2/s/1");
    assert_eq!(revision_of(&resolved, &d.dep_b), "B/2/s/1");
    Ok(())
}

#[test]
fn repeated_resolution_is_identical() -> TestResult {
    let d = diamond(100);

    d.h.record_run("A", 1, "s", &[(&d.dep_u, "U/1/s/1")], ts(20));
    d.h.record_run("B", 1, "s", &[(&d.dep_u, "U/1/s/1")], ts(21));
    d.h.record_run("A", 2, "s", &[(&d.dep_u, "U/2/s/1")], ts(22));

    let first = resolve(&d.h, "P")?;
    for _ in 0..10 {
        assert_eq!(resolve(&d.h, "P")?, first);
    }
    Ok(())
}

#[test]
fn fails_when_no_compatible_revision_exists() {
    let d = diamond(100);

    // A never ran against U/1, B never ran against U/2.
    d.h.record_run("A", 1, "s", &[(&d.dep_u, "U/2/s/1")], ts(20));
    d.h.record_run("B", 1, "s", &[(&d.dep_u, "U/1/s/1")], ts(21));

    match resolve(&d.h, "P") {
        Err(BuildCauseError::FanInUnresolvable {
            pipeline, material, ..
        }) => {
            assert_eq!(pipeline, "P");
            assert_eq!(material, "A/s");
        }
        other => panic!("expected FanInUnresolvable, got {other:?}"),
    }
}

#[test]
fn backtrack_limit_bounds_the_walk() -> TestResult {
    let build = |limit| {
        let d = diamond(limit);
        d.h.record_run("A", 1, "s", &[(&d.dep_u, "U/1/s/1")], ts(20));
        for counter in 2..=5 {
            d.h.record_run("A", counter, "s", &[(&d.dep_u, "U/2/s/1")], ts(20 + counter as i64));
        }
        d.h.record_run("B", 1, "s", &[(&d.dep_u, "U/1/s/1")], ts(30));
        d
    };

    let shallow = build(2);
    assert!(matches!(
        resolve(&shallow.h, "P"),
        Err(BuildCauseError::FanInUnresolvable { .. })
    ));

    let deep = build(10);
    let resolved = resolve(&deep.h, "P")?;
    assert_eq!(revision_of(&resolved, &deep.dep_a), "A/1/s/1");
    Ok(())
}

#[test]
fn own_material_follows_revision_used_upstream() -> TestResult {
    let u_repo = git_named("u-repo", "https://example.com/u.git");
    let dep_u = dep("U", "s");
    let config = ConfigFileBuilder::new()
        .pipeline("U", vec![u_repo.clone()])
        .pipeline("P", vec![u_repo.clone(), dep_u.clone()])
        .build();
    let h = Harness::new(config);

    h.record(
        &u_repo,
        &[modification("u1", 1), modification("u2", 2), modification("u3", 3)],
    );
    h.record_run("U", 1, "s", &[(&u_repo, "u1")], ts(10));
    h.record_run("U", 2, "s", &[(&u_repo, "u2")], ts(11));

    let resolved = resolve(&h, "P")?;

    // u3 is newest, but U has not built it yet.
    assert_eq!(revision_of(&resolved, &u_repo), "u2");
    assert_eq!(revision_of(&resolved, &dep_u), "U/2/s/1");
    Ok(())
}

#[test]
fn pinned_revision_drives_the_other_paths() -> TestResult {
    let d = diamond(100);

    d.h.record_run("A", 1, "s", &[(&d.dep_u, "U/1/s/1")], ts(20));
    d.h.record_run("A", 2, "s", &[(&d.dep_u, "U/2/s/1")], ts(21));
    d.h.record_run("B", 1, "s", &[(&d.dep_u, "U/1/s/1")], ts(22));
    d.h.record_run("B", 2, "s", &[(&d.dep_u, "U/2/s/1")], ts(23));

    let pin = d
        .h
        .store
        .find_modification(&d.dep_a.fingerprint(), "A/1/s/1")?
        .expect("recorded");
    let pinned = BTreeMap::from([(d.dep_a.fingerprint(), pin)]);

    let resolved = resolve_with(&d.h, "P", pinned)?;

    assert_eq!(revision_of(&resolved, &d.dep_a), "A/1/s/1");
    assert_eq!(revision_of(&resolved, &d.dep_b), "B/1/s/1");
    Ok(())
}

#[test]
fn pinned_revision_without_compatible_sibling_fails() -> TestResult {
    let d = diamond(100);

    d.h.record_run("A", 1, "s", &[(&d.dep_u, "U/1/s/1")], ts(20));
    d.h.record_run("B", 1, "s", &[(&d.dep_u, "U/2/s/1")], ts(21));

    let pin = d
        .h
        .store
        .find_modification(&d.dep_a.fingerprint(), "A/1/s/1")?
        .expect("recorded");
    let pinned = BTreeMap::from([(d.dep_a.fingerprint(), pin)]);

    assert!(matches!(
        resolve_with(&d.h, "P", pinned),
        Err(BuildCauseError::FanInUnresolvable { .. })
    ));
    Ok(())
}

#[test]
fn without_fan_in_every_material_takes_its_newest_revision() -> TestResult {
    let repo = git_named("repo", "https://example.com/app.git");
    let lib = git_named("lib", "https://example.com/lib.git");
    let config = ConfigFileBuilder::new()
        .pipeline("L", vec![lib.clone()])
        .pipeline("P", vec![repo.clone(), dep("L", "s")])
        .build();
    let h = Harness::new(config);

    h.record(&repo, &[modification("r1", 1), modification("r2", 2)]);
    h.record(&lib, &[modification("l1", 1)]);
    h.record_run("L", 1, "s", &[(&lib, "l1")], ts(5));
    h.record_run("L", 2, "s", &[(&lib, "l1")], ts(6));

    let resolved = resolve(&h, "P")?;

    assert_eq!(revision_of(&resolved, &repo), "r2");
    assert_eq!(revision_of(&resolved, &dep("L", "s")), "L/2/s/1");
    // Full history newest first; trimming happens in the producer.
    let repo_rev = resolved.find(&repo.fingerprint()).unwrap();
    assert_eq!(repo_rev.modifications().len(), 2);
    Ok(())
}

#[test]
fn upstream_run_without_recorded_revisions_adds_no_constraint() -> TestResult {
    let d = diamond(100);

    d.h.record_run("A", 1, "s", &[(&d.dep_u, "U/1/s/1")], ts(20));
    // Stage of B passed but its run revisions were never recorded.
    d.h.store
        .record_stage_passed("B", 7, "s", 1, ts(21))?;

    let resolved = resolve(&d.h, "P")?;

    assert_eq!(revision_of(&resolved, &d.dep_a), "A/1/s/1");
    assert_eq!(revision_of(&resolved, &d.dep_b), "B/7/s/1");
    Ok(())
}
