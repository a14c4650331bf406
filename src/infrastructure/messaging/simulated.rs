use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use uuid::Uuid;

use crate::application::services::sender::Sender;

/// Stand-in provider for local runs and load tests.
#[derive(Debug, Clone)]
pub struct SimulatedSender {
    success_rate: f64,
    max_latency: Duration,
}

impl SimulatedSender {
    pub fn new(success_rate: f64, max_latency: Duration) -> Self {
        Self {
            success_rate: success_rate.clamp(0.0, 1.0),
            max_latency,
        }
    }

    pub fn success_rate(&self) -> f64 {
        self.success_rate
    }
}

#[async_trait]
impl Sender for SimulatedSender {
    async fn send(&self, _content: &str, destination: &str) -> anyhow::Result<String> {
        let max_ms = self.max_latency.as_millis() as u64;
        if max_ms > 0 {
            let delay = rand::thread_rng().gen_range(0..=max_ms);
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }

        if rand::random::<f64>() >= self.success_rate {
            anyhow::bail!("simulated provider error: failed to deliver message to {destination}");
        }

        Ok(format!("sim-msg-{}", Uuid::new_v4()))
    }
}
