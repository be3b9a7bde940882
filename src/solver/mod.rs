use crate::config::SolverConfig;
use crate::error::Result;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;

pub mod loracloud;

pub use loracloud::LoraCloudSolver;

/// Almanac image as delivered by the solver backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlmanacImage {
    /// Hex-encoded image
    pub image: String,
    pub compressed: bool,
}

/// Geolocation backend
#[async_trait]
pub trait Solver: Send + Sync {
    fn name(&self) -> &'static str;

    /// Resolve the positioning payload found in a decode result. `Ok(None)`
    /// when the backend has no answer.
    async fn solve_position(&self, decoded: &Map<String, Value>) -> Result<Option<Map<String, Value>>>;

    async fn load_almanac(&self) -> Result<Option<AlmanacImage>>;
}

/// Solver used when no backend is configured: never produces a result
pub struct NoSolver;

#[async_trait]
impl Solver for NoSolver {
    fn name(&self) -> &'static str {
        "none"
    }

    async fn solve_position(&self, _decoded: &Map<String, Value>) -> Result<Option<Map<String, Value>>> {
        Ok(None)
    }

    async fn load_almanac(&self) -> Result<Option<AlmanacImage>> {
        Ok(None)
    }
}

pub fn build_solver(config: &SolverConfig, timeout: Duration) -> Result<Arc<dyn Solver>> {
    Ok(match config {
        SolverConfig::None => Arc::new(NoSolver),
        SolverConfig::LoraCloud { base_url, token } => {
            Arc::new(LoraCloudSolver::new(base_url.clone(), token.clone(), timeout)?)
        }
    })
}
