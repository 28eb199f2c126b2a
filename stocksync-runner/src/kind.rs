//! Pipeline kind tags and the factory workers use to rebuild pipelines.

use async_trait::async_trait;
use std::fmt;
use std::marker::PhantomData;
use std::str::FromStr;
use std::sync::Arc;
use stocksync_core::error::SyncError;
use stocksync_core::pipeline::PipelineFactory;
use stocksync_core::{SyncConfig, SyncPipeline};
use thiserror::Error;

/// The concrete pipelines this crate provides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PipelineKind {
    StockHistory,
    IssuerFilings,
    News,
}

impl PipelineKind {
    pub const ALL: [PipelineKind; 3] = [
        PipelineKind::StockHistory,
        PipelineKind::IssuerFilings,
        PipelineKind::News,
    ];

    pub const fn as_str(&self) -> &'static str {
        match self {
            PipelineKind::StockHistory => "stock-history",
            PipelineKind::IssuerFilings => "issuer-filings",
            PipelineKind::News => "news",
        }
    }
}

impl fmt::Display for PipelineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown pipeline kind '{0}' (expected stock-history, issuer-filings or news)")]
pub struct UnknownKind(pub String);

impl FromStr for PipelineKind {
    type Err = UnknownKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| UnknownKind(s.to_string()))
    }
}

/// A pipeline that can be built from configuration alone.
pub trait FromConfig: SyncPipeline + Sized + 'static {
    const KIND: PipelineKind;

    /// Build a bare pipeline with its own sources and gateway.
    fn from_config(config: &SyncConfig) -> Result<Self, SyncError>;
}

/// Builds a fresh `P` per worker from a shared configuration.
pub struct ConfigFactory<P> {
    config: Arc<SyncConfig>,
    _pipeline: PhantomData<fn() -> P>,
}

impl<P: FromConfig> ConfigFactory<P> {
    pub fn new(config: Arc<SyncConfig>) -> Self {
        Self {
            config,
            _pipeline: PhantomData,
        }
    }
}

#[async_trait]
impl<P: FromConfig> PipelineFactory for ConfigFactory<P> {
    type Pipeline = P;

    fn kind(&self) -> &'static str {
        P::KIND.as_str()
    }

    async fn build(&self) -> Result<P, SyncError> {
        P::from_config(&self.config)
    }
}
