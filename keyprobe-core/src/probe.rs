use crate::model::{ProbeOutcome, ProbeRequest};
use async_trait::async_trait;
use std::fmt::Debug;

pub mod openweather;

/// Issues one weather lookup and classifies what came back.
///
/// Implementations never fail: every transport or payload problem is folded
/// into [`ProbeOutcome::Failed`]. No retries happen at this layer.
#[async_trait]
pub trait KeyProber: Send + Sync + Debug {
    async fn probe(&self, request: &ProbeRequest) -> ProbeOutcome;
}
