// src/feedback/mod.rs - Analog feedback sampling
pub mod sampler;

pub use sampler::{FeedbackSample, FeedbackSampler};
