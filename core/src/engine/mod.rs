//! Runs one task to completion and normalizes whatever happened into an
//! [`ExecutionResult`]. The engine never fails outward.

mod cache;
mod inproc;
pub mod protocol;
mod result;
mod subprocess;
mod unit;

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::Instrument;

use crate::config::EngineConfig;
use crate::task::{validate_arguments, InvocationKind, TaskArgs, TaskDescriptor};

pub use cache::{CacheStats, CachedUnitInfo, UnitCache};
pub use result::{ExecutionResult, FailureKind};
pub use unit::{CodeUnit, FnUnit, NativeUnitRegistry, ScriptScope, UnitLoader};

#[derive(Clone)]
pub struct ExecutionEngine {
    cfg: Arc<EngineConfig>,
    loader: Arc<dyn UnitLoader>,
    cache: Arc<UnitCache>,
}

impl ExecutionEngine {
    pub fn new(cfg: EngineConfig, loader: Arc<dyn UnitLoader>) -> Self {
        let cache = UnitCache::new(
            cfg.cache_capacity,
            Duration::from_secs(cfg.cache_ttl_secs),
            Duration::from_secs(cfg.cache_cleanup_secs),
        );
        Self {
            cfg: Arc::new(cfg),
            loader,
            cache: Arc::new(cache),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.cfg
    }

    pub async fn execute(&self, desc: &TaskDescriptor, args: &TaskArgs) -> ExecutionResult {
        let execution_id = uuid::Uuid::new_v4().to_string();
        let span = tracing::info_span!(
            "execute",
            task = %desc.name,
            kind = ?desc.kind,
            execution_id = %execution_id
        );
        self.execute_inner(desc, args).instrument(span).await
    }

    /// Drives [`execute`](Self::execute) on a private current-thread runtime.
    /// For callers outside any async context; calling it from inside a runtime
    /// panics.
    pub fn execute_blocking(&self, desc: &TaskDescriptor, args: &TaskArgs) -> ExecutionResult {
        match tokio::runtime::Builder::new_current_thread().enable_all().build() {
            Ok(rt) => rt.block_on(self.execute(desc, args)),
            Err(e) => {
                let message = format!("could not start runtime: {e}");
                ExecutionResult::failed(FailureKind::Launch, message)
            }
        }
    }

    async fn execute_inner(&self, desc: &TaskDescriptor, args: &TaskArgs) -> ExecutionResult {
        let started = Instant::now();

        let mut result = match self.dispatch(desc, args).await {
            Some(result) => result,
            None => ExecutionResult::failed(
                FailureKind::InvalidInvocationKind,
                format!("'{}' is a background service; start it through the supervisor", desc.name),
            ),
        };

        result.duration_ms = started.elapsed().as_millis() as u64;
        if result.success {
            tracing::info!(
                duration_ms = result.duration_ms,
                message = %result.message,
                "task finished"
            );
        } else {
            tracing::warn!(
                duration_ms = result.duration_ms,
                failure = ?result.failure,
                exit_code = ?result.exit_code,
                message = %result.message,
                "task failed"
            );
        }
        result
    }

    /// `None` for kinds the engine does not run.
    async fn dispatch(&self, desc: &TaskDescriptor, args: &TaskArgs) -> Option<ExecutionResult> {
        if desc.kind == InvocationKind::BackgroundService {
            return None;
        }
        let validated = match validate_arguments(desc, args) {
            Ok(v) => v,
            Err(errors) => {
                return Some(ExecutionResult::failed(FailureKind::Validation, errors.join("; ")))
            }
        };
        let loader = self.loader.clone();
        let result = match desc.kind {
            InvocationKind::ExternalProcess => {
                subprocess::run_external(desc, &validated, &self.cfg).await
            }
            InvocationKind::InProcessCall => {
                inproc::run_call(desc, loader, self.cache.clone()).await
            }
            InvocationKind::InProcessScript => inproc::run_script(desc, &validated, loader).await,
            InvocationKind::BackgroundService => return None,
        };
        Some(result)
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn clear_cache(&self) -> usize {
        self.cache.clear()
    }
}
