// tests/config_loading.rs

use std::error::Error;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tempfile::NamedTempFile;

use buildcause::config::{ConfigFile, load_and_validate, load_from_str};
use buildcause::errors::BuildCauseError;
use buildcause::history::load_history;
use buildcause::material::{Material, NoExternals, ScmKind};
use buildcause::memory::{InMemoryRevisionStore, InMemoryScheduleQueue, RecordingHealthSink};
use buildcause::poll::PollerRegistry;
use buildcause::ports::{Authorizer, ConfigProvider, RevisionStore};
use buildcause::producer::{
    BuildCauseProducer, Collaborators, ProduceOutcome, ScheduleOptions, Trigger,
};
use buildcause::secrets::MapSecretResolver;

type TestResult = Result<(), Box<dyn Error>>;

fn write_config(contents: &str) -> Result<NamedTempFile, Box<dyn Error>> {
    let mut file = NamedTempFile::new()?;
    file.write_all(contents.as_bytes())?;
    Ok(file)
}

fn load(contents: &str) -> Result<ConfigFile, BuildCauseError> {
    ConfigFile::try_from(load_from_str(contents)?)
}

fn config_error(contents: &str) -> String {
    match load(contents) {
        Err(BuildCauseError::ConfigError(message)) => message,
        other => panic!("expected ConfigError, got {other:?}"),
    }
}

const VALID: &str = r#"
[settings]
fanin_backtrack_limit = 25
poll_timeout_secs = 60
final_modification_check = false

[pipeline.upstream]
[[pipeline.upstream.material]]
type = "scm"
kind = "git"
url = "https://example.com/lib.git"
branch = "main"
name = "lib"

[pipeline.app]
operators = ["alice", "bob"]

[[pipeline.app.material]]
type = "scm"
kind = "svn"
url = "svn://example.com/app/trunk"
folder = "app"
check_externals = true

[[pipeline.app.material]]
type = "dependency"
pipeline = "upstream"
stage = "package"
"#;

#[test]
fn loads_valid_config_from_disk() -> TestResult {
    let file = write_config(VALID)?;
    let cfg = load_and_validate(file.path())?;

    assert_eq!(cfg.pipeline_names().collect::<Vec<_>>(), ["app", "upstream"]);

    let app = cfg.materials_of("app").expect("app declared");
    assert_eq!(app.len(), 2);
    match &app[0] {
        Material::Scm(scm) => {
            assert_eq!(scm.kind, ScmKind::Svn);
            assert_eq!(scm.folder.as_deref(), Some("app"));
            assert!(scm.check_externals);
        }
        other => panic!("expected scm material, got {other:?}"),
    }
    assert_eq!(app[1].display_name(), "upstream/package");

    assert!(cfg.has_pipeline("upstream"));
    assert!(!cfg.has_pipeline("missing"));
    Ok(())
}

#[test]
fn settings_map_onto_producer_settings() -> TestResult {
    let settings = load(VALID)?.producer_settings();

    assert_eq!(settings.backtrack_limit, 25);
    assert_eq!(settings.poll_timeout, Duration::from_secs(60));
    assert!(!settings.final_modification_check);
    assert_eq!(settings.expansion_depth, 4);
    Ok(())
}

#[test]
fn omitted_settings_use_defaults() -> TestResult {
    let cfg = load(
        r#"
[pipeline.only]
[[pipeline.only.material]]
type = "package"
repository_id = "repo"
package_id = "pkg"
"#,
    )?;

    assert_eq!(cfg.settings.fanin_backtrack_limit, 100);
    assert_eq!(cfg.settings.poll_timeout_secs, 300);
    assert!(cfg.settings.final_modification_check);
    Ok(())
}

#[test]
fn operators_restrict_who_may_trigger() -> TestResult {
    let cfg = load(VALID)?;

    assert!(cfg.can_trigger("alice", "app"));
    assert!(!cfg.can_trigger("mallory", "app"));
    // No operator list: anyone may trigger.
    assert!(cfg.can_trigger("mallory", "upstream"));
    assert!(!cfg.can_trigger("alice", "missing"));
    Ok(())
}

#[test]
fn rejects_dependency_cycle() {
    let contents = r#"
[pipeline.a]
[[pipeline.a.material]]
type = "dependency"
pipeline = "b"
stage = "s"

[pipeline.b]
[[pipeline.b.material]]
type = "dependency"
pipeline = "a"
stage = "s"
"#;
    match load(contents) {
        Err(BuildCauseError::DagCycle(message)) => assert!(message.contains("cycle detected")),
        other => panic!("expected DagCycle, got {other:?}"),
    }
}

#[test]
fn rejects_unknown_upstream_pipeline() {
    let message = config_error(
        r#"
[pipeline.app]
[[pipeline.app.material]]
type = "dependency"
pipeline = "ghost"
stage = "s"
"#,
    );
    assert!(message.contains("unknown pipeline 'ghost'"), "{message}");
}

#[test]
fn rejects_self_dependency() {
    let message = config_error(
        r#"
[pipeline.app]
[[pipeline.app.material]]
type = "dependency"
pipeline = "app"
stage = "s"
"#,
    );
    assert!(message.contains("cannot depend on itself"), "{message}");
}

#[test]
fn rejects_pipeline_without_materials() {
    let message = config_error(
        r#"
[pipeline.app]
operators = ["alice"]
"#,
    );
    assert!(message.contains("at least one material"), "{message}");
}

#[test]
fn rejects_same_material_declared_twice() {
    // Same url and kind; the folder does not make it a different material.
    let message = config_error(
        r#"
[pipeline.app]
[[pipeline.app.material]]
type = "scm"
kind = "git"
url = "https://example.com/app.git"
name = "app"

[[pipeline.app.material]]
type = "scm"
kind = "git"
url = "https://example.com/app.git"
folder = "copy"
"#,
    );
    assert!(message.contains("more than once"), "{message}");
}

#[test]
fn rejects_zero_backtrack_limit() {
    let message = config_error(
        r#"
[settings]
fanin_backtrack_limit = 0

[pipeline.app]
[[pipeline.app.material]]
type = "scm"
kind = "git"
url = "https://example.com/app.git"
"#,
    );
    assert!(message.contains("fanin_backtrack_limit"), "{message}");
}

#[test]
fn rejects_empty_config_and_bad_toml() {
    assert!(config_error("").contains("at least one"));

    match load("[pipeline.app\n") {
        Err(BuildCauseError::TomlError(_)) => {}
        other => panic!("expected TomlError, got {other:?}"),
    }

    match load_and_validate("/definitely/not/here.toml") {
        Err(BuildCauseError::IoError(_)) => {}
        other => panic!("expected IoError, got {other:?}"),
    }
}

#[tokio::test]
async fn demo_diamond_resolves_to_common_upstream_revision() -> TestResult {
    let manifest = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    let cfg = Arc::new(load_and_validate(manifest.join("demos/diamond.toml"))?);
    let store = Arc::new(InMemoryRevisionStore::new());
    load_history(manifest.join("demos/diamond-history.toml"))?.apply(cfg.as_ref(), &store)?;

    let mut settings = cfg.producer_settings();
    settings.final_modification_check = false;
    let ports = Collaborators {
        config: cfg.clone(),
        poller: Arc::new(PollerRegistry::new()),
        store: store.clone(),
        secrets: Arc::new(MapSecretResolver::new()),
        authorizer: cfg.clone(),
        queue: Arc::new(InMemoryScheduleQueue::new()),
        health: Arc::new(RecordingHealthSink::new()),
        externals: Arc::new(NoExternals),
    };
    let producer = BuildCauseProducer::new(ports, settings);

    let outcome = producer
        .produce_build_cause(
            "release",
            &Trigger::manual("release-manager"),
            &ScheduleOptions::new().without_material_update(),
            Utc::now(),
        )
        .await?;

    let cause = match outcome {
        ProduceOutcome::Scheduled(cause) => cause,
        other => panic!("expected a scheduled build cause, got {other:?}"),
    };
    let latest: Vec<&str> = cause.revisions.iter().map(|r| r.latest_revision()).collect();
    assert_eq!(latest, ["api/1/build/1", "web/1/build/1"]);

    // The common repository history was recorded as polled.
    let common = cfg.materials_of("common").expect("common declared");
    assert!(store.last_polled_at(&common[0].fingerprint())?.is_some());
    Ok(())
}
