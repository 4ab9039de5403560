//! Dependency-ordered batch execution with failure cascading.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::error::EngineError;
use crate::job::{JobRegistry, JobSpec, JobStatus};

/// Topologically orders a set of [`JobSpec`]s by `dependencies` and runs
/// them sequentially, cascading failure to dependents without invoking
/// their handlers.
#[derive(Default)]
pub struct JobDAG {
    registry: JobRegistry,
    /// Dependencies attached after registration via `add_dependency`,
    /// layered on top of whatever `JobSpec::dependencies` already carries
    /// (`add_job` and `add_dependency` are separate calls).
    extra_deps: Mutex<HashMap<String, Vec<String>>>,
}

impl JobDAG {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_job(&self, spec: JobSpec) -> Result<(), EngineError> {
        self.registry.register(spec)
    }

    /// Record that `id` depends on `depends_on`, in addition to anything
    /// already on its `JobSpec::dependencies`. Takes effect on the next
    /// `execute` call; does not itself validate that either id exists
    /// (unknown ids surface as `InvalidInput` from `topological_order`).
    pub fn add_dependency(&self, id: impl Into<String>, depends_on: impl Into<String>) {
        let mut extra = self.extra_deps.lock().unwrap_or_else(|e| e.into_inner());
        extra.entry(id.into()).or_default().push(depends_on.into());
    }

    fn dependencies_of(&self, id: &str) -> Vec<String> {
        let mut deps = self.registry.dependencies_of(id);
        if let Some(more) = self.extra_deps.lock().unwrap_or_else(|e| e.into_inner()).get(id) {
            deps.extend(more.iter().cloned());
        }
        deps
    }

    /// Compute a topological order honoring `dependencies`; `InvalidInput`
    /// on a cycle.
    fn topological_order(&self) -> Result<Vec<String>, EngineError> {
        let ids = self.registry.job_ids();
        let mut in_degree: HashMap<String, usize> = ids.iter().map(|id| (id.clone(), 0)).collect();
        let mut dependents: HashMap<String, Vec<String>> = HashMap::new();

        for id in &ids {
            for dep in self.dependencies_of(id) {
                if !in_degree.contains_key(&dep) {
                    return Err(EngineError::invalid_input(format!(
                        "job {id:?} depends on unknown job {dep:?}"
                    )));
                }
                *in_degree.get_mut(id).unwrap() += 1;
                dependents.entry(dep).or_default().push(id.clone());
            }
        }

        let mut queue: VecDeque<String> = in_degree
            .iter()
            .filter(|(_, &deg)| deg == 0)
            .map(|(id, _)| id.clone())
            .collect();
        // Deterministic ordering among ties, by priority descending then id.
        let mut ordered: Vec<String> = Vec::new();
        let mut ready: Vec<String> = queue.drain(..).collect();

        while !ready.is_empty() {
            ready.sort_by(|a, b| {
                self.registry
                    .priority_of(b)
                    .cmp(&self.registry.priority_of(a))
                    .then_with(|| a.cmp(b))
            });
            let next = ready.remove(0);
            ordered.push(next.clone());
            if let Some(deps) = dependents.get(&next) {
                for d in deps {
                    let deg = in_degree.get_mut(d).unwrap();
                    *deg -= 1;
                    if *deg == 0 {
                        ready.push(d.clone());
                    }
                }
            }
        }

        if ordered.len() != ids.len() {
            return Err(EngineError::invalid_input("dependency cycle detected"));
        }

        Ok(ordered)
    }

    /// Run all registered jobs in dependency order. Returns `Err` on the
    /// first failure (after the cascade has been applied to dependents), or
    /// `InvalidInput` if the dependency graph has a cycle.
    pub async fn execute(&self, cancel: CancellationToken) -> Result<(), EngineError> {
        let order = self.topological_order()?;
        let dependents = self.dependents_map();
        let mut failed: HashSet<String> = HashSet::new();
        let mut first_error: Option<EngineError> = None;

        for id in order {
            if cancel.is_cancelled() {
                return Err(EngineError::cancelled("dag"));
            }

            if let Some(failed_dep) = self.failed_dependency(&id, &failed) {
                self.registry
                    .mark_failed_cascade(&id, format!("dependency {failed_dep:?} failed"))
                    .await;
                failed.insert(id.clone());
                continue;
            }

            let Some(handler) = self.registry.handler_of(&id) else { continue };
            let timeout = self.registry.timeout_of(&id);
            if !self.registry.try_start(&id, chrono::Utc::now()).await {
                continue;
            }

            let job_cancel = cancel.child_token();
            let outcome = tokio::time::timeout(non_zero(timeout), handler.call(job_cancel)).await;

            match outcome {
                Ok(Ok(())) => {
                    self.registry.mark_completed(&id).await;
                }
                Ok(Err(err)) => {
                    self.registry.mark_failed(&id, err.message.clone()).await;
                    failed.insert(id.clone());
                    if first_error.is_none() {
                        first_error = Some(err);
                    }
                    self.cascade(&id, &dependents, &mut failed).await;
                }
                Err(_) => {
                    let err = EngineError::timeout(id.clone());
                    self.registry.mark_failed(&id, "timed out").await;
                    failed.insert(id.clone());
                    if first_error.is_none() {
                        first_error = Some(err);
                    }
                    self.cascade(&id, &dependents, &mut failed).await;
                }
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn dependents_map(&self) -> HashMap<String, Vec<String>> {
        let mut dependents: HashMap<String, Vec<String>> = HashMap::new();
        for id in self.registry.job_ids() {
            for dep in self.dependencies_of(&id) {
                dependents.entry(dep).or_default().push(id.clone());
            }
        }
        dependents
    }

    fn failed_dependency(&self, id: &str, failed: &HashSet<String>) -> Option<String> {
        self.dependencies_of(id)
            .into_iter()
            .find(|dep| failed.contains(dep))
    }

    /// Mark every transitive dependent of `id` failed, without running
    /// their handlers.
    fn cascade<'a>(
        &'a self,
        id: &'a str,
        dependents: &'a HashMap<String, Vec<String>>,
        failed: &'a mut HashSet<String>,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + 'a>> {
        Box::pin(async move {
            let Some(children) = dependents.get(id) else { return };
            for child in children.clone() {
                if failed.insert(child.clone()) {
                    self.registry
                        .mark_failed_cascade(&child, format!("dependency {id:?} failed"))
                        .await;
                    self.cascade(&child, dependents, failed).await;
                }
            }
        })
    }

    pub async fn status_of(&self, id: &str) -> Option<JobStatus> {
        self.registry.status_of(id).await
    }
}

fn non_zero(d: Duration) -> Duration {
    if d.is_zero() {
        Duration::from_secs(3600)
    } else {
        d
    }
}
