use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use anyhow::anyhow;

use buildcause::material::{Fingerprint, Material, Modification};
use buildcause::ports::{BoxFuture, MaterialPoller};

#[derive(Default)]
struct FakeState {
    /// What the "source system" holds, newest first.
    source: HashMap<Fingerprint, Vec<Modification>>,
    failures: HashMap<Fingerprint, String>,
    delays: HashMap<Fingerprint, Duration>,
    panics: HashMap<Fingerprint, bool>,
    calls: HashMap<Fingerprint, usize>,
    /// Materials exactly as handed to the poller (after secret resolution).
    seen: Vec<Material>,
}

/// A scripted poller that:
/// - answers from an in-memory list of modifications per material
/// - can fail, stall or panic for chosen materials
/// - counts calls per material
#[derive(Default)]
pub struct FakePoller {
    state: Mutex<FakeState>,
}

impl FakePoller {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    /// Make `modification` the newest change of `material` at the source.
    pub fn commit(&self, material: &Material, modification: Modification) {
        self.state()
            .source
            .entry(material.fingerprint())
            .or_default()
            .insert(0, modification);
    }

    pub fn fail(&self, material: &Material, message: &str) {
        self.state()
            .failures
            .insert(material.fingerprint(), message.to_string());
    }

    pub fn recover(&self, material: &Material) {
        self.state().failures.remove(&material.fingerprint());
    }

    pub fn delay(&self, material: &Material, delay: Duration) {
        self.state().delays.insert(material.fingerprint(), delay);
    }

    pub fn panic_on(&self, material: &Material) {
        self.state().panics.insert(material.fingerprint(), true);
    }

    pub fn calls(&self, material: &Material) -> usize {
        self.state()
            .calls
            .get(&material.fingerprint())
            .copied()
            .unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.state().calls.values().sum()
    }

    pub fn seen(&self) -> Vec<Material> {
        self.state().seen.clone()
    }
}

impl MaterialPoller for FakePoller {
    fn modifications_since<'a>(
        &'a self,
        material: &'a Material,
        since: Option<&'a Modification>,
    ) -> BoxFuture<'a, anyhow::Result<Vec<Modification>>> {
        Box::pin(async move {
            let fingerprint = material.fingerprint();
            let (delay, failure, panics, answer) = {
                let mut state = self.state();
                state.seen.push(material.clone());
                *state.calls.entry(fingerprint.clone()).or_default() += 1;

                let all = state.source.get(&fingerprint).cloned().unwrap_or_default();
                let answer = match since {
                    None => all.into_iter().take(1).collect::<Vec<_>>(),
                    Some(since) => all
                        .into_iter()
                        .take_while(|m| m.revision != since.revision)
                        .collect(),
                };
                (
                    state.delays.get(&fingerprint).copied(),
                    state.failures.get(&fingerprint).cloned(),
                    state.panics.contains_key(&fingerprint),
                    answer,
                )
            };

            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            if panics {
                panic!("fake poller panicked for {}", material.display_name());
            }
            if let Some(message) = failure {
                return Err(anyhow!(message));
            }
            Ok(answer)
        })
    }
}
