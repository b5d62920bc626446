use anyhow::{bail, Context, Result};
use log::info;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::diagnostics::Diagnostics;

use super::buffer::SampleBuffer;
use super::loop_worker::{aggregation_loop, producer_loop, AggregationContext, SharedDetector};

struct LoopTask {
    handle: JoinHandle<()>,
    cancel_token: CancellationToken,
}

impl LoopTask {
    async fn shutdown(self, name: &str) -> Result<()> {
        self.cancel_token.cancel();
        self.handle
            .await
            .with_context(|| format!("{name} task failed to join"))
    }
}

/// Owns the producer and aggregation tasks and their cancellation tokens.
#[derive(Default)]
pub struct SensingController {
    producer: Option<LoopTask>,
    aggregation: Option<LoopTask>,
}

impl SensingController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start_producer(
        &mut self,
        detector: SharedDetector,
        buffer: Arc<SampleBuffer>,
        diagnostics: Diagnostics,
        sample_interval: Duration,
    ) -> Result<()> {
        if self.producer.is_some() {
            bail!("sample producer already active");
        }

        let cancel_token = CancellationToken::new();
        let handle = tokio::spawn(producer_loop(
            detector,
            buffer,
            diagnostics,
            sample_interval,
            cancel_token.clone(),
        ));

        self.producer = Some(LoopTask {
            handle,
            cancel_token,
        });
        info!("Sample producer started ({}ms cadence)", sample_interval.as_millis());
        Ok(())
    }

    pub async fn stop_producer(&mut self) -> Result<()> {
        match self.producer.take() {
            Some(task) => task.shutdown("producer").await,
            None => Ok(()),
        }
    }

    pub fn start_aggregation(&mut self, ctx: AggregationContext, period: Duration) -> Result<()> {
        if self.aggregation.is_some() {
            bail!("aggregation already active");
        }

        let cancel_token = CancellationToken::new();
        let handle = tokio::spawn(aggregation_loop(ctx, period, cancel_token.clone()));

        self.aggregation = Some(LoopTask {
            handle,
            cancel_token,
        });
        info!("Aggregation started ({}s window)", period.as_secs_f64());
        Ok(())
    }

    /// Cancels future cycles and waits for an in-flight cycle to finish, so
    /// nothing from this session is written after the call returns.
    pub async fn stop_aggregation(&mut self) -> Result<()> {
        match self.aggregation.take() {
            Some(task) => task.shutdown("aggregation").await,
            None => Ok(()),
        }
    }
}
