use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use serde::Serialize;
use serde_json::Value;
use tracing::{error, info, info_span, Instrument};

use crate::error::{ExecutionError, Result};
use crate::invocation::{Invocation, Payload, TaskResult};
use crate::tasks::{all_tasks, TaskContext};

/// A unit of scheduled work, selected by the name of the trigger that fired.
#[async_trait]
pub trait ScheduledTask: Send + Sync {
    fn code_identifier(&self) -> &'static str;
    fn description(&self) -> &'static str;
    async fn run(&self, context: &TaskContext, payload: &Payload) -> Result<Value>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskDescriptor {
    pub code: &'static str,
    pub description: &'static str,
}

#[derive(Default)]
pub struct DispatcherBuilder {
    tasks: HashMap<&'static str, Arc<dyn ScheduledTask>>,
}

impl DispatcherBuilder {
    pub fn register(mut self, task: Arc<dyn ScheduledTask>) -> Result<Self> {
        let code = task.code_identifier();
        if self.tasks.contains_key(code) {
            return Err(ExecutionError::DuplicateTask(code.to_string()));
        }
        self.tasks.insert(code, task);
        Ok(self)
    }

    pub fn build(self, context: Arc<TaskContext>) -> Dispatcher {
        Dispatcher {
            tasks: self.tasks,
            context,
        }
    }
}

/// Routes each invocation to exactly one registered task. The table is fixed once built.
pub struct Dispatcher {
    tasks: HashMap<&'static str, Arc<dyn ScheduledTask>>,
    context: Arc<TaskContext>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<&str> = self.tasks.keys().copied().collect();
        names.sort_unstable();
        f.debug_struct("Dispatcher").field("tasks", &names).finish()
    }
}

impl std::fmt::Debug for DispatcherBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<&str> = self.tasks.keys().copied().collect();
        names.sort_unstable();
        f.debug_struct("DispatcherBuilder").field("tasks", &names).finish()
    }
}

impl Dispatcher {
    pub fn builder() -> DispatcherBuilder {
        DispatcherBuilder::default()
    }

    /// Dispatcher over the built-in task table.
    pub fn standard(context: Arc<TaskContext>) -> Result<Self> {
        let mut builder = Self::builder();
        for task in all_tasks() {
            builder = builder.register(Arc::clone(task))?;
        }
        Ok(builder.build(context))
    }

    pub fn task_descriptors(&self) -> Vec<TaskDescriptor> {
        let mut descriptors: Vec<TaskDescriptor> = self
            .tasks
            .values()
            .map(|task| TaskDescriptor {
                code: task.code_identifier(),
                description: task.description(),
            })
            .collect();
        descriptors.sort_by_key(|d| d.code);
        descriptors
    }

    pub fn resolve(&self, name: &str) -> Result<&Arc<dyn ScheduledTask>> {
        self.tasks
            .get(name)
            .ok_or_else(|| ExecutionError::UnknownTask(name.to_string()))
    }

    /// Runs the task registered under `invocation.name`. Never panics and never returns an error:
    /// every failure, including a panic inside the task, becomes `TaskResult::Failed`.
    pub async fn execute(&self, invocation: &Invocation) -> TaskResult {
        let digest = invocation.payload_digest();
        let span = info_span!(
            "invocation",
            task = %invocation.name,
            invocation_id = %invocation.invocation_id,
            payload_digest = %digest,
        );

        async {
            let task = match self.resolve(&invocation.name) {
                Ok(task) => task,
                Err(err) => {
                    error!(error = %err, "no task registered for invocation");
                    return TaskResult::failed(&invocation.name, &err);
                }
            };

            info!("executing task");
            let outcome = AssertUnwindSafe(task.run(&self.context, &invocation.payload))
                .catch_unwind()
                .await
                .unwrap_or_else(|panic| {
                    Err(ExecutionError::TaskPanicked {
                        task: invocation.name.clone(),
                        message: panic_message(panic.as_ref()),
                    })
                });

            match outcome {
                Ok(output) => {
                    info!("task completed");
                    TaskResult::Completed {
                        task: invocation.name.clone(),
                        output,
                    }
                }
                Err(err) => {
                    error!(kind = err.kind(), error = %err, "task failed");
                    TaskResult::failed(&invocation.name, &err)
                }
            }
        }
        .instrument(span)
        .await
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
