use std::future::Future;
use std::marker::PhantomData;

use anyhow::anyhow;
use async_trait::async_trait;

use crate::engine::ExecutionEngine;
use crate::task::{TaskArgs, TaskDescriptor};

/// Work performed when a schedule fires. An `Err` becomes a `schedule_error`
/// event; the timer stays armed either way.
#[async_trait]
pub trait ScheduleCallback: Send + Sync {
    async fn run(&self, task: &str) -> anyhow::Result<()>;
}

/// Adapts an async closure.
pub struct FnCallback<F, Fut> {
    f: F,
    _fut: PhantomData<fn() -> Fut>,
}

impl<F, Fut> FnCallback<F, Fut>
where
    F: Fn(String) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send,
{
    pub fn new(f: F) -> Self {
        Self { f, _fut: PhantomData }
    }
}

#[async_trait]
impl<F, Fut> ScheduleCallback for FnCallback<F, Fut>
where
    F: Fn(String) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send,
{
    async fn run(&self, task: &str) -> anyhow::Result<()> {
        (self.f)(task.to_string()).await
    }
}

/// Runs a descriptor through the engine with fixed arguments.
pub struct EngineCallback {
    engine: ExecutionEngine,
    descriptor: TaskDescriptor,
    args: TaskArgs,
}

impl EngineCallback {
    pub fn new(engine: ExecutionEngine, descriptor: TaskDescriptor, args: TaskArgs) -> Self {
        Self {
            engine,
            descriptor,
            args,
        }
    }
}

#[async_trait]
impl ScheduleCallback for EngineCallback {
    async fn run(&self, _task: &str) -> anyhow::Result<()> {
        let result = self.engine.execute(&self.descriptor, &self.args).await;
        if result.success {
            Ok(())
        } else {
            Err(anyhow!(result.message))
        }
    }
}
