//! # Compressed Page Shadows
//!
//! Compressed indexes keep every page in two shapes: the regular 16KB frame
//! the loader mutates, and a compressed image that must fit the index's
//! target size (typically half a page). The loader builds the frame without
//! logging individual writes, then [`compress_frame`] encodes the whole
//! frame; the image becomes the page's atomic redo record.
//!
//! Compression failure is a normal outcome: it means the records plus
//! directory exceeded what the target size can represent, and the caller
//! splits the page in half and retries.
//!
//! ## Adaptive Padding
//!
//! Filling the frame to the brim and failing is wasteful, so each index
//! tracks a pad estimate. The loader stops inserting once free space drops
//! below the pad; a failed compression widens the pad, a long run of
//! successes narrows it again.

use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

use eyre::{Result, WrapErr};

use crate::config::{PAGE_SIZE, ZIP_PAD_INCR, ZIP_PAD_MAX, ZIP_PAD_SUCCESS_ROUND};

/// Per-index adaptive estimate of how much frame space to leave unused so
/// pages keep compressing into the target size.
#[derive(Debug, Default)]
pub struct ZipPad {
    pad: AtomicUsize,
    success_streak: AtomicU32,
}

impl ZipPad {
    pub fn new() -> ZipPad {
        ZipPad::default()
    }

    /// Current pad in bytes; the loader's `padding_space`.
    pub fn pad(&self) -> usize {
        self.pad.load(Ordering::Acquire)
    }

    /// Frame bytes worth filling before compression is attempted.
    pub fn optimal_page_size(&self) -> usize {
        PAGE_SIZE - self.pad()
    }

    /// Feeds a compression outcome into the estimate.
    pub fn update(&self, success: bool) {
        if success {
            let streak = self.success_streak.fetch_add(1, Ordering::AcqRel) + 1;
            if streak >= ZIP_PAD_SUCCESS_ROUND {
                self.success_streak.store(0, Ordering::Release);
                let pad = self.pad.load(Ordering::Acquire);
                self.pad
                    .store(pad.saturating_sub(ZIP_PAD_INCR), Ordering::Release);
            }
        } else {
            self.success_streak.store(0, Ordering::Release);
            let pad = self.pad.load(Ordering::Acquire);
            self.pad
                .store((pad + ZIP_PAD_INCR).min(ZIP_PAD_MAX), Ordering::Release);
        }
    }
}

/// Compresses a finalized frame. Returns the image when it fits the target
/// size, `None` when the page holds too much data, and an error only when
/// the compressor itself fails.
pub fn compress_frame(
    frame: &[u8; PAGE_SIZE],
    level: i32,
    target_size: usize,
) -> Result<Option<Vec<u8>>> {
    let image = zstd::bulk::compress(frame, level).wrap_err("page compressor failed")?;
    Ok((image.len() <= target_size).then_some(image))
}

/// Inflates a compressed image back into a frame; used by tests and by the
/// recovery tooling downstream.
pub fn decompress_frame(image: &[u8]) -> Result<Box<[u8; PAGE_SIZE]>> {
    let bytes = zstd::bulk::decompress(image, PAGE_SIZE).wrap_err("page decompressor failed")?;
    let frame: Box<[u8; PAGE_SIZE]> = bytes
        .into_boxed_slice()
        .try_into()
        .map_err(|_| eyre::eyre!("compressed image did not inflate to a full page"))?;
    Ok(frame)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sparse_frames_compress_and_round_trip() {
        let mut frame = Box::new([0u8; PAGE_SIZE]);
        frame[100..108].copy_from_slice(b"abcdefgh");

        let image = compress_frame(&frame, 3, PAGE_SIZE / 2).unwrap().unwrap();
        assert!(image.len() < 200);

        let back = decompress_frame(&image).unwrap();
        assert_eq!(&back[..], &frame[..]);
    }

    #[test]
    fn incompressible_frames_fail_the_target() {
        let mut frame = Box::new([0u8; PAGE_SIZE]);
        // Cheap deterministic noise; zstd cannot shrink it.
        let mut state = 0x9E3779B97F4A7C15u64;
        for byte in frame.iter_mut() {
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            *byte = (state >> 33) as u8;
        }

        assert!(compress_frame(&frame, 3, PAGE_SIZE / 2).unwrap().is_none());
    }

    #[test]
    fn pad_widens_on_failure_and_narrows_after_a_streak() {
        let pad = ZipPad::new();
        assert_eq!(pad.pad(), 0);

        pad.update(false);
        assert_eq!(pad.pad(), ZIP_PAD_INCR);
        assert_eq!(pad.optimal_page_size(), PAGE_SIZE - ZIP_PAD_INCR);

        for _ in 0..ZIP_PAD_SUCCESS_ROUND {
            pad.update(true);
        }
        assert_eq!(pad.pad(), 0);
    }

    #[test]
    fn pad_saturates_at_half_a_page() {
        let pad = ZipPad::new();
        for _ in 0..1000 {
            pad.update(false);
        }
        assert_eq!(pad.pad(), ZIP_PAD_MAX);
    }
}
