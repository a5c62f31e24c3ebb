use std::sync::Arc;

use sqlx_unit_of_work::{Context, Task, TaskRegistry, UnitOfWorkResult};

/// Minimal coordinator: runs tasks in registration order, then commits every
/// context on success or rolls every context back on the first failure.
#[derive(Default)]
pub struct Sequence {
    tasks: Vec<Arc<dyn Task>>,
}

impl Sequence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tasks(&self) -> &[Arc<dyn Task>] {
        &self.tasks
    }

    fn contexts(&self) -> Vec<Arc<dyn Context>> {
        let mut contexts: Vec<Arc<dyn Context>> = Vec::new();
        for task in &self.tasks {
            let context = task.context();
            let seen = contexts
                .iter()
                .any(|c| Arc::as_ptr(c) as *const () == Arc::as_ptr(&context) as *const ());
            if !seen {
                contexts.push(context);
            }
        }
        contexts
    }

    pub async fn exec(&self) -> UnitOfWorkResult<()> {
        let contexts = self.contexts();
        for context in &contexts {
            if !context.is_initialized() {
                context.init().await?;
            }
        }

        for task in &self.tasks {
            if let Err(err) = task.exec().await {
                for context in &contexts {
                    context.rollback().await?;
                }
                return Err(err);
            }
        }

        for context in &contexts {
            context.commit().await?;
        }
        Ok(())
    }
}

impl TaskRegistry for Sequence {
    fn add_task(&mut self, task: Arc<dyn Task>) {
        self.tasks.push(task);
    }
}
