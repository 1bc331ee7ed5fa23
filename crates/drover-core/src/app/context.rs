use std::fmt;
use std::sync::Arc;

use crate::domain::QueueName;
use crate::ports::QueueStore;
use crate::queue::QueueClient;

/// Resources owned by one execution unit and reused across its tasks.
///
/// Each unit opens its own connection when the pool starts; contexts are
/// never shared between units.
pub struct WorkerContext {
    unit: usize,
    store: Arc<dyn QueueStore>,
    tasks_handled: u64,
}

impl WorkerContext {
    pub fn new(unit: usize, store: Arc<dyn QueueStore>) -> Self {
        Self {
            unit,
            store,
            tasks_handled: 0,
        }
    }

    pub fn unit(&self) -> usize {
        self.unit
    }

    /// This unit's connection.
    pub fn store(&self) -> Arc<dyn QueueStore> {
        Arc::clone(&self.store)
    }

    /// A client for any queue, bound to this unit's connection.
    pub fn client(&self, queue: impl Into<QueueName>) -> QueueClient {
        QueueClient::new(queue, self.store())
    }

    pub fn tasks_handled(&self) -> u64 {
        self.tasks_handled
    }

    pub(crate) fn record_task(&mut self) {
        self.tasks_handled += 1;
    }
}

impl fmt::Debug for WorkerContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerContext")
            .field("unit", &self.unit)
            .field("tasks_handled", &self.tasks_handled)
            .finish_non_exhaustive()
    }
}
