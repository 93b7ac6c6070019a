// Copyright 2025 jonefeewang@gmail.com
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::signal;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::utils::catch_panic;
use crate::{AppError, AppResult};

use super::{Shutdown, ShutdownReason};

/// A long-running unit supervised by the [`Runner`].
#[async_trait]
pub trait Module: Send + Sync {
    fn name(&self) -> &str;
    /// Called once, before any module runs.
    async fn init(&mut self) -> AppResult<()>;
    /// Blocks until the module is done or closed.
    async fn run(&self) -> AppResult<()>;
    /// Makes `run` return and releases resources.
    async fn close(&self) -> AppResult<()>;
}

/// Starts modules in order, runs them concurrently and closes them in
/// reverse order once any of them returns or the process is interrupted.
#[derive(Default)]
pub struct Runner {
    modules: Vec<Box<dyn Module>>,
}

impl Runner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_module<M: Module + 'static>(mut self, module: M) -> Self {
        self.modules.push(Box::new(module));
        self
    }

    pub fn add_module(&mut self, module: Box<dyn Module>) {
        self.modules.push(module);
    }

    /// Runs until ctrl-c or until a module returns. Returns the process exit
    /// code: 0 when nothing failed, 1 otherwise.
    pub async fn run(self) -> i32 {
        self.run_until(async {
            if let Err(err) = signal::ctrl_c().await {
                error!(error = %err, "failed to listen for ctrl-c");
            }
        })
        .await
    }

    /// Like [`run`](Self::run), with `signal` as the external cancellation.
    pub async fn run_until<F>(self, signal: F) -> i32
    where
        F: Future<Output = ()>,
    {
        let errors = self.supervise(signal).await;
        for err in &errors {
            error!(error = %err, "module failed");
        }
        if errors.is_empty() {
            info!("all modules finished cleanly");
            0
        } else {
            1
        }
    }

    async fn supervise<F>(self, signal: F) -> Vec<AppError>
    where
        F: Future<Output = ()>,
    {
        let mut errors = Vec::new();

        // init in declaration order, stop at the first failure
        let mut ready: Vec<Arc<dyn Module>> = Vec::with_capacity(self.modules.len());
        for mut module in self.modules {
            info!(module = module.name(), "initializing module");
            if let Err(err) = catch_panic(module.init()).await.and_then(|r| r) {
                error!(module = module.name(), error = %err, "module init failed");
                errors.push(err);
                errors.extend(Self::close_all(&ready).await.into_iter().flatten());
                return errors;
            }
            ready.push(Arc::from(module));
        }

        let (notify_shutdown, _) = broadcast::channel(ready.len() + 1);
        let mut shutdown = Shutdown::new(notify_shutdown.subscribe());

        let mut runs: Vec<JoinHandle<AppResult<()>>> = Vec::with_capacity(ready.len());
        for module in &ready {
            let module = module.clone();
            let notify_shutdown = notify_shutdown.clone();
            runs.push(tokio::spawn(async move {
                info!(module = module.name(), "module running");
                let result = catch_panic(module.run()).await.and_then(|r| r);
                info!(module = module.name(), ok = result.is_ok(), "module run returned");
                let _ = notify_shutdown.send(ShutdownReason::ModuleExited(module.name().to_string()));
                result
            }));
        }

        // the watcher: an external signal or any module returning
        tokio::select! {
            _ = signal => {
                let _ = notify_shutdown.send(ShutdownReason::Signal);
            }
            _ = shutdown.recv() => {}
        }
        let reason = shutdown.recv().await;
        info!(?reason, "shutting down");

        let closed = Self::close_all(&ready).await;

        for ((module, run), close_err) in ready.iter().zip(runs).zip(closed) {
            // a failed close may leave run blocked forever
            if let Some(err) = close_err {
                run.abort();
                errors.push(err);
            }
            match run.await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => errors.push(err),
                Err(join_err) if join_err.is_cancelled() => {
                    warn!(module = module.name(), "run aborted after failed close");
                }
                Err(join_err) => errors.push(AppError::IllegalState(format!(
                    "module {} run task failed: {}",
                    module.name(),
                    join_err
                ))),
            }
        }
        errors
    }

    /// Closes in reverse order, each close awaited before the next. The
    /// outcome of each close is returned in declaration order.
    async fn close_all(modules: &[Arc<dyn Module>]) -> Vec<Option<AppError>> {
        let mut outcomes: Vec<Option<AppError>> = Vec::with_capacity(modules.len());
        for module in modules.iter().rev() {
            info!(module = module.name(), "closing module");
            let outcome = catch_panic(module.close()).await.and_then(|r| r).err();
            if let Some(err) = &outcome {
                error!(module = module.name(), error = %err, "module close failed");
            }
            outcomes.push(outcome);
        }
        outcomes.reverse();
        outcomes
    }
}
