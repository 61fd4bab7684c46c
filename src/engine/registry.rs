//! Registry of standing background tasks.
//!
//! Every periodic publisher is spawned through here so the shutdown path
//! has one place to cancel and join them all; nothing runs fire-and-forget.

use std::future::Future;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

struct RegisteredTask {
    name: String,
    handle: JoinHandle<()>,
}

pub struct TaskRegistry {
    token: CancellationToken,
    tasks: Vec<RegisteredTask>,
}

impl TaskRegistry {
    /// Tasks spawned here are cancelled together with `parent`.
    pub fn new(parent: &CancellationToken) -> Self {
        TaskRegistry {
            token: parent.child_token(),
            tasks: Vec::new(),
        }
    }

    /// Spawns a standing task under the registry's cancellation scope.
    /// The task receives its own child token and must exit promptly once
    /// it is cancelled.
    pub fn spawn<F, Fut>(&mut self, name: impl Into<String>, task: F)
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let name = name.into();
        debug!(task = %name, "spawning standing task");
        let handle = tokio::spawn(task(self.token.child_token()));
        self.tasks.push(RegisteredTask { name, handle });
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Cancels every registered task and waits for each to stop.
    pub async fn shutdown(&mut self) {
        self.token.cancel();
        for task in self.tasks.drain(..) {
            if let Err(e) = task.handle.await {
                warn!("task {} did not stop cleanly: {e}", task.name);
            } else {
                debug!(task = %task.name, "standing task stopped");
            }
        }
    }
}
