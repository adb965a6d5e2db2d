//! In-process broadcast implementation of [`JobEventPublisher`](super::events::JobEventPublisher).

use std::fmt;

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::error::Result;

use super::events::{JobEvent, JobEventPublisher};

/// In-process fan-out of job lifecycle events. Publishing never blocks and
/// never fails when nobody is listening.
pub struct InProcJobEventBus {
    sender: broadcast::Sender<JobEvent>,
    capacity: usize,
}

impl fmt::Debug for InProcJobEventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InProcJobEventBus")
            .field("capacity", &self.capacity)
            .field("subscribers", &self.sender.receiver_count())
            .finish()
    }
}

impl InProcJobEventBus {
    /// Bus buffering up to `capacity` events per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender, capacity }
    }

    /// New subscriber seeing events published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.sender.subscribe()
    }
}

#[async_trait]
impl JobEventPublisher for InProcJobEventBus {
    async fn publish(&self, event: JobEvent) -> Result<()> {
        let _ = self.sender.send(event);
        Ok(())
    }
}
