use framegen_packer::PackingResult;
use framegen_resolve::DataPointResolver;
use framegen_status::{STATUS_OK, STATUS_ROP_CHANGED};
use framegen_types::{FrameRequest, FRAMESET_COUNT};
use tracing::{debug, info};

use crate::error::{summarize_packer_errors, BuildError};

/// Folds the packer's corrections back into `request`.
///
/// Returns the status to persist: 209 when the packer changed any frameset's ROP, 200
/// otherwise. Packer errors and an empty answer are build failures.
pub fn reconcile(
    request: &mut FrameRequest,
    result: &PackingResult,
    resolver: &DataPointResolver<'_>,
) -> Result<u16, BuildError> {
    if let Some(summary) = summarize_packer_errors(&result.error_messages()) {
        return Err(BuildError::Incompatible(summary));
    }
    if !(0..FRAMESET_COUNT).any(|idx| result.frameset(idx).is_some()) {
        return Err(BuildError::EmptyBuild);
    }

    let mut status = STATUS_OK;
    for (idx, frameset) in request.framesets.iter_mut().enumerate() {
        let Some(corrected) = result.frameset(idx) else {
            continue;
        };
        if let Some(rop) = corrected.rop() {
            if rop != frameset.rop {
                info!(frame = idx + 1, requested = frameset.rop, packed = rop, "packer changed ROP");
                status = STATUS_ROP_CHANGED;
            }
            frameset.rop = rop;
        }
        if let Some(tokens) = corrected.mtf.as_deref() {
            frameset.mtf = resolver.resolve_ordered(tokens)?;
        }
        if let Some(tokens) = corrected.gtf.as_deref() {
            frameset.gtf = resolver.resolve_ordered(tokens)?;
        }
        if let Some(tokens) = corrected.rotary.as_deref() {
            frameset.rotary = resolver.resolve_ordered(tokens)?;
        }
    }
    if let Some(tokens) = result.utility() {
        request.utility.points = resolver.resolve_ordered(tokens)?;
    }
    debug!(uid = %request.uid, status, "packer result reconciled");
    Ok(status)
}
