//! SimulatedWork - the default task body: each unit is a fixed sleep.

use std::time::Duration;

use async_trait::async_trait;
use tracing::trace;

use crate::domain::{BoxError, Request};
use crate::ports::Work;

pub const DEFAULT_UNIT_DELAY: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy)]
pub struct SimulatedWork {
    unit_delay: Duration,
}

impl SimulatedWork {
    pub fn new(unit_delay: Duration) -> Self {
        Self { unit_delay }
    }

    pub fn unit_delay(&self) -> Duration {
        self.unit_delay
    }
}

impl Default for SimulatedWork {
    fn default() -> Self {
        Self::new(DEFAULT_UNIT_DELAY)
    }
}

#[async_trait]
impl Work for SimulatedWork {
    async fn step(&self, request: &Request, unit: u32) -> Result<(), BoxError> {
        trace!(request = request.id(), unit, "simulating unit");
        tokio::time::sleep(self.unit_delay).await;
        Ok(())
    }
}
