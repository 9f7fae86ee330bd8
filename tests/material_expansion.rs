// tests/material_expansion.rs

use std::collections::HashMap;
use std::error::Error;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::anyhow;

use buildcause::errors::BuildCauseError;
use buildcause::material::{ExternalsSource, Material, MaterialExpander, ScmKind, ScmMaterial};
use buildcause_test_utils::builders::{dep, git_named, svn_with_externals};

type TestResult = Result<(), Box<dyn Error>>;

/// Externals keyed by parent URL; counts every query.
#[derive(Default)]
struct ScriptedExternals {
    externals: Mutex<HashMap<String, Vec<ScmMaterial>>>,
    failing: Mutex<Option<String>>,
    queries: AtomicUsize,
}

impl ScriptedExternals {
    fn with(self, parent: &str, children: Vec<ScmMaterial>) -> Self {
        self.externals
            .lock()
            .unwrap()
            .insert(parent.to_string(), children);
        self
    }

    fn fail_for(&self, parent: &str) {
        *self.failing.lock().unwrap() = Some(parent.to_string());
    }

    fn queries(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }
}

impl ExternalsSource for ScriptedExternals {
    fn externals_of(&self, material: &ScmMaterial) -> anyhow::Result<Vec<ScmMaterial>> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        if self.failing.lock().unwrap().as_deref() == Some(material.url.as_str()) {
            return Err(anyhow!("svn: E170013: unable to connect"));
        }
        Ok(self
            .externals
            .lock()
            .unwrap()
            .get(&material.url)
            .cloned()
            .unwrap_or_default())
    }
}

fn external(url: &str, folder: &str) -> ScmMaterial {
    let mut scm = ScmMaterial::new(ScmKind::Svn, url);
    scm.folder = Some(folder.to_string());
    scm
}

fn urls(materials: &[Material]) -> Vec<String> {
    materials
        .iter()
        .map(|m| match m {
            Material::Scm(scm) => scm.url.clone(),
            other => other.display_name(),
        })
        .collect()
}

fn folders(materials: &[Material]) -> Vec<Option<String>> {
    materials
        .iter()
        .map(|m| match m {
            Material::Scm(scm) => scm.folder.clone(),
            _ => None,
        })
        .collect()
}

#[test]
fn expands_externals_and_caches_the_result() -> TestResult {
    let source = Arc::new(ScriptedExternals::default().with(
        "svn://host/app",
        vec![external("svn://host/lib-a", "a"), external("svn://host/lib-b", "b")],
    ));
    let expander = MaterialExpander::new(source.clone(), 4);

    let mut parent = svn_with_externals("app", "svn://host/app");
    if let Material::Scm(scm) = &mut parent {
        scm.folder = Some("src".to_string());
    }

    let first = expander.expand(&parent)?;
    assert_eq!(
        urls(&first),
        ["svn://host/app", "svn://host/lib-a", "svn://host/lib-b"]
    );
    assert_eq!(
        folders(&first),
        [
            Some("src".to_string()),
            Some("src/a".to_string()),
            Some("src/b".to_string())
        ]
    );
    // Externals do not recurse unless they ask to.
    assert_eq!(source.queries(), 1);

    let second = expander.expand(&parent)?;
    assert_eq!(first, second);
    assert_eq!(source.queries(), 1);
    assert_eq!(expander.cached_entries(), 1);
    Ok(())
}

#[test]
fn materials_without_externals_expand_to_themselves() -> TestResult {
    let source = Arc::new(ScriptedExternals::default());
    let expander = MaterialExpander::new(source.clone(), 4);

    let git = git_named("app", "https://example.com/app.git");
    let upstream = dep("upstream", "build");

    assert_eq!(*expander.expand(&git)?, vec![git.clone()]);
    assert_eq!(*expander.expand(&upstream)?, vec![upstream.clone()]);
    assert_eq!(source.queries(), 0);
    Ok(())
}

#[test]
fn nested_externals_stop_at_depth_limit() -> TestResult {
    let mut level1 = external("svn://host/l1", "l1");
    level1.check_externals = true;
    let mut level2 = external("svn://host/l2", "l2");
    level2.check_externals = true;
    let level3 = external("svn://host/l3", "l3");

    let source = Arc::new(
        ScriptedExternals::default()
            .with("svn://host/root", vec![level1])
            .with("svn://host/l1", vec![level2])
            .with("svn://host/l2", vec![level3]),
    );
    let root = svn_with_externals("root", "svn://host/root");

    let deep = MaterialExpander::new(source.clone(), 4).expand(&root)?;
    assert_eq!(
        urls(&deep),
        ["svn://host/root", "svn://host/l1", "svn://host/l2", "svn://host/l3"]
    );
    assert_eq!(folders(&deep)[3].as_deref(), Some("l1/l2/l3"));

    let shallow = MaterialExpander::new(source, 2).expand(&root)?;
    assert_eq!(urls(&shallow), ["svn://host/root", "svn://host/l1", "svn://host/l2"]);
    Ok(())
}

#[test]
fn externals_query_failure_is_an_expansion_error() {
    let source = Arc::new(ScriptedExternals::default());
    source.fail_for("svn://host/app");
    let expander = MaterialExpander::new(source, 4);

    match expander.expand(&svn_with_externals("app", "svn://host/app")) {
        Err(BuildCauseError::Expansion { material, source }) => {
            assert_eq!(material, "app");
            assert!(source.to_string().contains("unable to connect"));
        }
        other => panic!("expected Expansion error, got {other:?}"),
    }
    assert_eq!(expander.cached_entries(), 0);
}

#[test]
fn invalidation_forces_a_fresh_query() -> TestResult {
    let source = Arc::new(
        ScriptedExternals::default().with("svn://host/app", vec![external("svn://host/lib", "lib")]),
    );
    let expander = MaterialExpander::new(source.clone(), 4);
    let app = svn_with_externals("app", "svn://host/app");

    expander.expand(&app)?;
    expander.invalidate(&app.fingerprint());
    assert_eq!(expander.cached_entries(), 0);

    source
        .externals
        .lock()
        .unwrap()
        .insert("svn://host/app".to_string(), Vec::new());
    let refreshed = expander.expand(&app)?;
    assert_eq!(urls(&refreshed), ["svn://host/app"]);
    assert_eq!(source.queries(), 2);

    expander.invalidate_all();
    assert_eq!(expander.cached_entries(), 0);
    Ok(())
}

#[test]
fn expand_all_keeps_first_occurrence_of_shared_externals() -> TestResult {
    let source = Arc::new(
        ScriptedExternals::default()
            .with("svn://host/a", vec![external("svn://host/common", "common")])
            .with("svn://host/b", vec![external("svn://host/common", "common")]),
    );
    let expander = MaterialExpander::new(source, 4);

    let expanded = expander.expand_all(&[
        svn_with_externals("a", "svn://host/a"),
        svn_with_externals("b", "svn://host/b"),
        dep("upstream", "build"),
    ])?;

    assert_eq!(
        urls(&expanded),
        ["svn://host/a", "svn://host/common", "svn://host/b", "upstream/build"]
    );
    Ok(())
}
