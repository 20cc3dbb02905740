// src/feedback/sampler.rs - Periodic feedback reads fanned out to subscribers
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::HostConfig;
use crate::error::SampleError;
use crate::hardware::{FeedbackSource, ShutdownSignal};

/// One feedback reading of a flap.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedbackSample {
    pub flap: String,
    /// Seconds since the sampler started.
    pub time: f64,
    pub value: f64,
}

/// Reads a [`FeedbackSource`] every `report_time` seconds and delivers the
/// samples to every subscriber.
///
/// Bad reads are dropped. After `range_check_count` consecutive bad reads the
/// emergency shutdown is invoked and sampling stops.
pub struct FeedbackSampler {
    flap: String,
    source: Box<dyn FeedbackSource>,
    report_time: f64,
    range_check_count: u32,
    min: f64,
    max: f64,
    failures: u32,
    subscribers: Vec<mpsc::UnboundedSender<FeedbackSample>>,
    shutdown: ShutdownSignal,
}

impl FeedbackSampler {
    pub fn new(
        flap: impl Into<String>,
        mut source: Box<dyn FeedbackSource>,
        config: &HostConfig,
        shutdown: ShutdownSignal,
    ) -> Self {
        source.configure_range(config.feedback_min, config.feedback_max);
        Self {
            flap: flap.into(),
            source,
            report_time: config.report_time,
            range_check_count: config.range_check_count,
            min: config.feedback_min,
            max: config.feedback_max,
            failures: 0,
            subscribers: Vec::new(),
            shutdown,
        }
    }

    pub fn flap(&self) -> &str {
        &self.flap
    }

    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<FeedbackSample> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.push(tx);
        rx
    }

    /// Adds a sender shared with other samplers.
    pub fn add_subscriber(&mut self, tx: mpsc::UnboundedSender<FeedbackSample>) {
        self.subscribers.push(tx);
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.failures
    }

    /// Performs one read at `time` and delivers it.
    pub async fn tick(&mut self, time: f64) -> Result<FeedbackSample, SampleError> {
        let read = match self.source.read().await {
            Ok(value) if value < self.min || value > self.max => Err(SampleError::OutOfRange {
                value,
                min: self.min,
                max: self.max,
            }),
            other => other,
        };
        match read {
            Ok(value) => {
                self.failures = 0;
                let sample = FeedbackSample {
                    flap: self.flap.clone(),
                    time,
                    value,
                };
                self.subscribers.retain(|tx| tx.send(sample.clone()).is_ok());
                Ok(sample)
            }
            Err(err) => {
                self.failures += 1;
                tracing::warn!(
                    "{}: bad feedback sample ({}/{}): {}",
                    self.flap,
                    self.failures,
                    self.range_check_count,
                    err
                );
                if self.failures >= self.range_check_count {
                    self.shutdown
                        .invoke_shutdown(format!("Servo flap {} feedback failed: {}", self.flap, err));
                }
                Err(err)
            }
        }
    }

    /// Spawns the sampling loop on the current `LocalSet`.
    pub fn spawn(mut self) -> JoinHandle<()> {
        let mut shutdown_rx = self.shutdown.subscribe();
        tokio::task::spawn_local(async move {
            let period = tokio::time::Duration::from_secs_f64(self.report_time);
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            let start = tokio::time::Instant::now();
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        tracing::info!("{}: feedback sampler shutting down", self.flap);
                        break;
                    }
                    _ = interval.tick() => {
                        let time = start.elapsed().as_secs_f64();
                        if let Err(SampleError::Closed) = self.tick(time).await {
                            break;
                        }
                        if self.shutdown.is_shutdown() || self.subscribers.is_empty() {
                            break;
                        }
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::VecDeque;

    struct Scripted(VecDeque<Result<f64, SampleError>>);

    #[async_trait(?Send)]
    impl FeedbackSource for Scripted {
        async fn read(&mut self) -> Result<f64, SampleError> {
            self.0.pop_front().unwrap_or(Err(SampleError::Closed))
        }
        fn configure_range(&mut self, _min: f64, _max: f64) {}
    }

    fn sampler(values: Vec<Result<f64, SampleError>>, shutdown: ShutdownSignal) -> FeedbackSampler {
        FeedbackSampler::new(
            "flap",
            Box::new(Scripted(values.into())),
            &HostConfig::default(),
            shutdown,
        )
    }

    #[tokio::test]
    async fn test_fan_out() {
        let shutdown = ShutdownSignal::new();
        let mut sampler = sampler(vec![Ok(0.25)], shutdown);
        let mut a = sampler.subscribe();
        let mut b = sampler.subscribe();
        sampler.tick(0.1).await.unwrap();
        assert_eq!(a.recv().await.unwrap().value, 0.25);
        assert_eq!(b.recv().await.unwrap().time, 0.1);
    }

    #[tokio::test]
    async fn test_escalates_after_consecutive_failures() {
        let shutdown = ShutdownSignal::new();
        let bad = || Err(SampleError::Read("adc timeout".to_string()));
        let mut sampler = sampler(vec![bad(), bad(), Ok(0.5), bad(), Ok(3.0), bad(), bad()], shutdown.clone());
        let mut rx = sampler.subscribe();

        assert!(sampler.tick(0.1).await.is_err());
        assert!(sampler.tick(0.2).await.is_err());
        assert!(sampler.tick(0.3).await.is_ok());
        assert_eq!(sampler.consecutive_failures(), 0);
        assert_eq!(rx.recv().await.unwrap().value, 0.5);

        for t in [0.4, 0.5, 0.6] {
            assert!(sampler.tick(t).await.is_err());
            assert!(!shutdown.is_shutdown());
        }
        assert!(sampler.tick(0.7).await.is_err());
        assert!(shutdown.is_shutdown());
        assert_eq!(shutdown.invocations(), 1);
        assert!(rx.try_recv().is_err());
    }
}
