//! Chunked almanac transfer.
//!
//! The image is sent as a short ordered sequence of downlinks:
//! `02 <segment>`, `03 <segment>`..., then `04 <segment>` (or `05` for a
//! compressed image). Network servers don't guarantee delivery order for
//! downlinks enqueued back to back, so frames are spaced by a fixed delay.

use crate::error::{ReactorError, Result};
use crate::model::lorawan::{DevEui, REACTION_PORT};
use crate::solver::Solver;
use crate::transport::{Downlink, DownlinkSender};
use crate::util::hex;
use std::time::Duration;
use tracing::{debug, info};

pub const ALMANAC_BEGIN_TAG: u8 = 0x02;
pub const ALMANAC_SEGMENT_TAG: u8 = 0x03;
pub const ALMANAC_END_TAG: u8 = 0x04;
pub const ALMANAC_END_COMPRESSED_TAG: u8 = 0x05;

/// Bytes of the link-layer maximum kept free for the frame tag and MAC
/// commands piggybacked on the downlink
pub const DOWNLINK_HEADROOM: usize = 11;

/// Largest segment that fits both the configured chunk size and the
/// downlink size hint of the triggering uplink
pub fn segment_size(max_chunk_size: usize, max_downlink_size: Option<usize>) -> Result<usize> {
    let size = match max_downlink_size {
        Some(max) => max_chunk_size.min(max.saturating_sub(DOWNLINK_HEADROOM)),
        None => max_chunk_size,
    };
    if size < 1 {
        return Err(ReactorError::Almanac(format!(
            "No room for almanac data (chunk size {}, max downlink {:?})",
            max_chunk_size, max_downlink_size
        )));
    }
    Ok(size)
}

fn frame(tag: u8, segment: &[u8]) -> Downlink {
    let mut payload = Vec::with_capacity(segment.len() + 1);
    payload.push(tag);
    payload.extend_from_slice(segment);
    Downlink::unconfirmed(REACTION_PORT, payload)
}

/// Split an almanac image into tagged frames, in send order.
///
/// An image that fits a single segment still needs both a begin and an end
/// frame, so it is followed by an empty terminator.
pub fn almanac_frames(image: &[u8], segment_size: usize, compressed: bool) -> Vec<Downlink> {
    let end_tag = if compressed {
        ALMANAC_END_COMPRESSED_TAG
    } else {
        ALMANAC_END_TAG
    };

    let segments: Vec<&[u8]> = image.chunks(segment_size.max(1)).collect();
    let last = segments.len().saturating_sub(1);

    let mut frames: Vec<Downlink> = segments
        .iter()
        .enumerate()
        .map(|(i, segment)| {
            let tag = match i {
                0 => ALMANAC_BEGIN_TAG,
                i if i == last => end_tag,
                _ => ALMANAC_SEGMENT_TAG,
            };
            frame(tag, segment)
        })
        .collect();

    if frames.len() == 1 {
        frames.push(frame(end_tag, &[]));
    }
    frames
}

/// Frame layout parameters of one transfer
#[derive(Debug, Clone, Copy)]
pub struct AlmanacTransfer {
    pub max_chunk_size: usize,
    pub max_downlink_size: Option<usize>,
    pub frame_delay: Duration,
}

impl AlmanacTransfer {
    /// Fetch the almanac and send it frame by frame. Returns the number of
    /// frames sent.
    ///
    /// The first failed send aborts the rest of the sequence; nothing is
    /// resumed, the next staleness check starts over from the first frame.
    pub async fn run(
        &self,
        solver: &dyn Solver,
        sender: &dyn DownlinkSender,
        dev_eui: &DevEui,
    ) -> Result<usize> {
        let almanac = solver.load_almanac().await?.ok_or_else(|| {
            ReactorError::Almanac(format!("Solver {} has no almanac", solver.name()))
        })?;

        let image = hex::decode(&almanac.image)
            .map_err(|e| ReactorError::Almanac(format!("Almanac image is not hex: {}", e)))?;
        if image.is_empty() {
            return Err(ReactorError::Almanac("Almanac image is empty".to_string()));
        }

        let segment = segment_size(self.max_chunk_size, self.max_downlink_size)?;
        let frames = almanac_frames(&image, segment, almanac.compressed);
        info!(
            dev_eui = %dev_eui,
            bytes = image.len(),
            frames = frames.len(),
            compressed = almanac.compressed,
            "Starting almanac transfer"
        );

        for (i, downlink) in frames.iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(self.frame_delay).await;
            }
            sender.send_downlink(dev_eui, downlink).await.map_err(|e| {
                ReactorError::Almanac(format!(
                    "Transfer aborted at frame {}/{}: {}",
                    i + 1,
                    frames.len(),
                    e
                ))
            })?;
            debug!(dev_eui = %dev_eui, frame = i + 1, "Almanac frame sent");
        }

        info!(dev_eui = %dev_eui, frames = frames.len(), "Almanac transfer complete");
        Ok(frames.len())
    }
}
