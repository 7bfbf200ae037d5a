//! Hook registry: registration, dependency ordering and execution.
//!
//! The registry is the single entry point for stage preconditions. Hooks are
//! registered per stage with plain calls, ordered by a depth-first walk over
//! their declared dependencies, and executed one at a time.

use super::config::HooksConfig;
use super::executor::CommandCheck;
use super::types::{
    DEPENDENCY_NOT_SATISFIED, FnCheck, HookCheck, HookContext, HookOutcome, HookReport,
    HookResult, HookStatus,
};
use crate::errors::ConcurrencyError;
use crate::stage::all_stages;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// Identifies a registered hook.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HookHandle {
    pub stage: String,
    pub name: String,
}

/// A hook waiting to be registered.
#[derive(Clone)]
pub struct HookSpec {
    stage: String,
    name: String,
    check: Arc<dyn HookCheck>,
    depends_on: Vec<String>,
    cache_ttl: Option<Duration>,
    remediation: Option<String>,
}

impl HookSpec {
    pub fn new(
        stage: impl Into<String>,
        name: impl Into<String>,
        check: impl HookCheck + 'static,
    ) -> Self {
        Self {
            stage: stage.into(),
            name: name.into(),
            check: Arc::new(check),
            depends_on: Vec::new(),
            cache_ttl: None,
            remediation: None,
        }
    }

    pub fn depends_on<S: AsRef<str>>(mut self, deps: &[S]) -> Self {
        self.depends_on = deps.iter().map(|d| d.as_ref().to_string()).collect();
        self
    }

    /// Reuse the last result for `ttl` instead of re-running the check.
    pub fn cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = Some(ttl);
        self
    }

    pub fn remediation(mut self, text: impl Into<String>) -> Self {
        self.remediation = Some(text.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dependencies(&self) -> &[String] {
        &self.depends_on
    }
}

impl std::fmt::Debug for HookSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HookSpec")
            .field("stage", &self.stage)
            .field("name", &self.name)
            .field("depends_on", &self.depends_on)
            .field("cache_ttl", &self.cache_ttl)
            .finish_non_exhaustive()
    }
}

type CacheKey = (String, String);

/// Holds every registered hook, keyed by stage.
#[derive(Default)]
pub struct HookRegistry {
    /// Registration order is preserved per stage
    hooks: HashMap<String, Vec<HookSpec>>,
    cache: Mutex<HashMap<CacheKey, (Instant, HookResult)>>,
}

fn stage_key(stage: &str) -> String {
    stage.to_ascii_lowercase()
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry holding every command hook in `config`.
    pub fn from_config(config: &HooksConfig) -> Self {
        let mut registry = Self::new();
        registry.load_definitions(config);
        registry
    }

    /// Register a check for a stage.
    pub fn register<S: AsRef<str>>(
        &mut self,
        stage: &str,
        name: &str,
        check: impl HookCheck + 'static,
        depends_on: &[S],
    ) -> HookHandle {
        self.register_spec(HookSpec::new(stage, name, check).depends_on(depends_on))
    }

    /// Register a closure as a check.
    pub fn register_fn<F>(
        &mut self,
        stage: &str,
        name: &str,
        depends_on: &[&str],
        f: F,
    ) -> HookHandle
    where
        F: Fn(&HookContext) -> HookOutcome + Send + Sync + 'static,
    {
        self.register(stage, name, FnCheck(f), depends_on)
    }

    /// Register a fully configured hook. A hook with the same name in the
    /// same stage is replaced in place.
    pub fn register_spec(&mut self, spec: HookSpec) -> HookHandle {
        let key = stage_key(&spec.stage);
        let handle = HookHandle {
            stage: key.clone(),
            name: spec.name.clone(),
        };
        let hooks = self.hooks.entry(key).or_default();
        match hooks.iter_mut().find(|h| h.name == spec.name) {
            Some(existing) => *existing = spec,
            None => hooks.push(spec),
        }
        handle
    }

    pub fn unregister(&mut self, handle: &HookHandle) -> bool {
        let Some(hooks) = self.hooks.get_mut(&handle.stage) else {
            return false;
        };
        let before = hooks.len();
        hooks.retain(|h| h.name != handle.name);
        before != hooks.len()
    }

    /// Drop a cached result so the next run re-executes the check.
    pub async fn invalidate(&self, handle: &HookHandle) {
        self.cache
            .lock()
            .await
            .remove(&(handle.stage.clone(), handle.name.clone()));
    }

    /// Register every enabled command hook, expanding stage patterns
    /// against the stage catalog.
    pub fn load_definitions(&mut self, config: &HooksConfig) {
        for stage in all_stages() {
            for def in config.hooks_for_stage(stage.name) {
                let mut check =
                    CommandCheck::new(def.command.clone(), Duration::from_secs(def.timeout_secs));
                check.working_dir = def.working_dir.clone();

                let mut spec = HookSpec::new(stage.name, def.name.clone(), check)
                    .depends_on(def.depends_on.as_slice());
                if let Some(ttl) = def.cache_ttl_secs {
                    spec = spec.cache_ttl(Duration::from_secs(ttl));
                }
                if let Some(text) = &def.remediation {
                    spec = spec.remediation(text.clone());
                }
                self.register_spec(spec);
            }
        }
    }

    pub fn hook_count(&self) -> usize {
        self.hooks.values().map(Vec::len).sum()
    }

    /// Names of the hooks registered for a stage, in registration order.
    pub fn hooks_for(&self, stage: &str) -> Vec<&str> {
        self.hooks
            .get(&stage_key(stage))
            .map(|hooks| hooks.iter().map(|h| h.name.as_str()).collect())
            .unwrap_or_default()
    }

    /// Dependency order for a stage's hooks.
    ///
    /// Depth-first in registration order; unregistered dependencies are
    /// left out here and reported as unsatisfied at run time.
    pub fn execution_order(&self, stage: &str) -> Result<Vec<&HookSpec>, ConcurrencyError> {
        let Some(hooks) = self.hooks.get(&stage_key(stage)) else {
            return Ok(Vec::new());
        };
        let by_name: HashMap<&str, &HookSpec> =
            hooks.iter().map(|h| (h.name.as_str(), h)).collect();

        let mut order = Vec::with_capacity(hooks.len());
        let mut done: HashSet<&str> = HashSet::new();
        let mut path: Vec<&str> = Vec::new();

        for hook in hooks {
            visit(stage, hook, &by_name, &mut done, &mut path, &mut order)?;
        }
        Ok(order)
    }

    /// Run a stage's hooks in dependency order.
    ///
    /// With `fail_fast`, stops after the first result that is neither
    /// success nor warning. A dependency cycle runs nothing.
    pub async fn run(
        &self,
        stage: &str,
        ctx: &HookContext,
        fail_fast: bool,
    ) -> Result<Vec<HookResult>, ConcurrencyError> {
        let order = self.execution_order(stage)?;
        let mut statuses: HashMap<&str, HookStatus> = HashMap::new();
        let mut results = Vec::with_capacity(order.len());

        for hook in order {
            let satisfied = hook
                .depends_on
                .iter()
                .all(|dep| statuses.get(dep.as_str()).is_some_and(|s| s.is_passable()));

            let result = if satisfied {
                self.execute(hook, ctx).await
            } else {
                tracing::debug!(
                    stage = %hook.stage,
                    hook = %hook.name,
                    "skipping hook, dependency not satisfied"
                );
                HookResult {
                    hook: hook.name.clone(),
                    stage: stage_key(&hook.stage),
                    status: HookStatus::Skipped,
                    duration: Duration::ZERO,
                    message: Some(DEPENDENCY_NOT_SATISFIED.to_string()),
                    remediation: hook.remediation.clone(),
                    cached: false,
                }
            };

            statuses.insert(hook.name.as_str(), result.status);
            let stop = fail_fast && !result.is_passable();
            results.push(result);
            if stop {
                break;
            }
        }

        Ok(results)
    }

    /// Evaluate every hook for a stage regardless of failures.
    pub async fn run_all(
        &self,
        stage: &str,
        ctx: &HookContext,
    ) -> Result<HookReport, ConcurrencyError> {
        let results = self.run(stage, ctx, false).await?;
        let passed = results.iter().all(HookResult::is_passable);
        Ok(HookReport {
            stage: stage_key(stage),
            results,
            passed,
        })
    }

    /// Structural problems: dependencies that are never registered and
    /// dependency cycles.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        let mut stages: Vec<&String> = self.hooks.keys().collect();
        stages.sort();

        for stage in stages {
            let names: HashSet<&str> = self.hooks[stage].iter().map(|h| h.name.as_str()).collect();
            for hook in &self.hooks[stage] {
                for dep in &hook.depends_on {
                    if !names.contains(dep.as_str()) {
                        warnings.push(format!(
                            "Hook '{}' in stage '{}' depends on unregistered hook '{}'",
                            hook.name, stage, dep
                        ));
                    }
                }
            }
            if let Err(e) = self.execution_order(stage) {
                warnings.push(e.to_string());
            }
        }
        warnings
    }

    async fn execute(&self, hook: &HookSpec, ctx: &HookContext) -> HookResult {
        let key = (stage_key(&hook.stage), hook.name.clone());

        if let Some(ttl) = hook.cache_ttl
            && let Some((at, cached)) = self.cache.lock().await.get(&key)
            && at.elapsed() < ttl
        {
            tracing::debug!(stage = %key.0, hook = %key.1, "hook result served from cache");
            return HookResult {
                cached: true,
                ..cached.clone()
            };
        }

        let started = Instant::now();
        let outcome = match hook.check.check(ctx).await {
            Ok(outcome) => outcome,
            Err(e) => HookOutcome::error(format!("{:#}", e)),
        };
        let duration = started.elapsed();

        tracing::debug!(
            stage = %key.0,
            hook = %key.1,
            status = %outcome.status,
            duration_ms = duration.as_millis() as u64,
            "hook finished"
        );

        let result = HookResult {
            hook: hook.name.clone(),
            stage: key.0.clone(),
            status: outcome.status,
            duration,
            message: outcome.message,
            remediation: if outcome.status.is_passable() {
                None
            } else {
                hook.remediation.clone()
            },
            cached: false,
        };

        if hook.cache_ttl.is_some() {
            self.cache
                .lock()
                .await
                .insert(key, (Instant::now(), result.clone()));
        }
        result
    }
}

fn visit<'a>(
    stage: &str,
    hook: &'a HookSpec,
    by_name: &HashMap<&str, &'a HookSpec>,
    done: &mut HashSet<&'a str>,
    path: &mut Vec<&'a str>,
    order: &mut Vec<&'a HookSpec>,
) -> Result<(), ConcurrencyError> {
    let name = hook.name.as_str();
    if done.contains(name) {
        return Ok(());
    }
    if let Some(start) = path.iter().position(|n| *n == name) {
        let mut cycle: Vec<String> = path[start..].iter().map(|n| n.to_string()).collect();
        cycle.push(name.to_string());
        return Err(ConcurrencyError::CyclicHookDependency {
            stage: stage_key(stage),
            cycle,
        });
    }

    path.push(name);
    for dep in &hook.depends_on {
        if let Some(dep_hook) = by_name.get(dep.as_str()) {
            visit(stage, dep_hook, by_name, done, path, order)?;
        }
    }
    path.pop();

    done.insert(name);
    order.push(hook);
    Ok(())
}
