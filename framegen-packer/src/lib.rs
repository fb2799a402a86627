//! Client side of the external frame packing service.

use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

pub mod http;
pub use http::HttpPacker;

pub mod wire;
pub use wire::{CorrectedFrame, FrameParameters, PackingRequest, PackingResult, WireFrameSet, WireUtility};

#[derive(Debug, Error)]
pub enum PackerError {
    #[error("packer HTTP error: {0}")]
    Http(String),
    #[error("packer HTTP status: {0}")]
    Status(u16),
    #[error("packer response could not be decoded: {0}")]
    Decode(String),
}

#[async_trait]
pub trait Packer: Send + Sync {
    async fn pack(&self, request: &PackingRequest<'_>) -> Result<PackingResult, PackerError>;
}

/// Accepts every frame as requested: each populated frameset and the utility frame come back
/// with their ROP and point lists unchanged.
pub struct PassthroughPacker;

#[async_trait]
impl Packer for PassthroughPacker {
    async fn pack(&self, request: &PackingRequest<'_>) -> Result<PackingResult, PackerError> {
        let names = |points: &[framegen_types::DataPoint]| points.iter().map(|p| p.name.clone()).collect::<Vec<_>>();
        let mut result = PackingResult::default();
        for (idx, fsl) in request.framesets().into_iter().enumerate().take(request.num_of_fsl as usize) {
            if fsl.mtf.is_empty() && fsl.gtf.is_empty() && fsl.rotary.is_empty() {
                continue;
            }
            result.corrected.insert(
                format!("fsl{}", idx + 1),
                CorrectedFrame {
                    parameters: Some(FrameParameters { rop: Some(fsl.rop) }),
                    mtf: Some(names(fsl.mtf)),
                    gtf: Some(names(fsl.gtf)),
                    rotary: Some(names(fsl.rotary)),
                    utility: None,
                },
            );
        }
        if !request.utility.utility.is_empty() {
            result.corrected.insert(
                "utility".into(),
                CorrectedFrame {
                    utility: Some(names(request.utility.utility)),
                    ..CorrectedFrame::default()
                },
            );
        }
        debug!(uid = request.uid, frames = result.corrected.len(), "passthrough packing");
        Ok(result)
    }
}
