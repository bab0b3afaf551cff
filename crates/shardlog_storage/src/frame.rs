//! Frame codec for the container log.
//!
//! ```text
//! | body_len (4, LE) | crc32(body) (4, LE) | body | body_len (4, LE) |
//! ```
//!
//! The trailing copy of the length lets the last frame be located and
//! verified from the end of the file, so appends never read what comes
//! before it.
//!
//! A frame that runs past the end of the store is a torn tail only if it is
//! the last thing in the store: no complete, valid frame may follow its
//! start. Anything else is corruption and is reported, never cut away.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};

/// Size of the frame header (body length + checksum).
pub const FRAME_HEADER_SIZE: usize = 8;

/// Size of the trailing length copy.
pub const FRAME_TRAILER_SIZE: usize = 4;

/// Bytes a frame adds around its body.
pub const FRAME_OVERHEAD: usize = FRAME_HEADER_SIZE + FRAME_TRAILER_SIZE;

/// Largest body a frame may carry.
pub const MAX_FRAME_BODY: usize = 16 * 1024 * 1024;

fn le_u32(bytes: &[u8]) -> u32 {
    u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

/// Wraps `body` into a frame.
pub(crate) fn encode(body: &[u8]) -> StorageResult<Vec<u8>> {
    let len = u32::try_from(body.len())
        .ok()
        .filter(|_| body.len() <= MAX_FRAME_BODY)
        .ok_or_else(|| {
            StorageError::Encode(format!(
                "frame body of {} bytes exceeds the {MAX_FRAME_BODY} byte limit",
                body.len()
            ))
        })?;

    let mut frame = Vec::with_capacity(FRAME_OVERHEAD + body.len());
    frame.extend_from_slice(&len.to_le_bytes());
    frame.extend_from_slice(&crc32fast::hash(body).to_le_bytes());
    frame.extend_from_slice(body);
    frame.extend_from_slice(&len.to_le_bytes());
    Ok(frame)
}

/// One step of a forward scan.
pub(crate) enum Step {
    /// A verified frame body and the offset of its frame.
    Frame { offset: u64, body: Vec<u8> },
    /// The store ends on a frame boundary.
    End,
    /// A partially written last frame starts at `offset`.
    Torn { offset: u64 },
}

/// Forward reader over the frames of a backend.
pub(crate) struct FrameReader<'a, B: StorageBackend> {
    backend: &'a B,
    offset: u64,
    size: u64,
}

impl<'a, B: StorageBackend> FrameReader<'a, B> {
    pub(crate) fn new(backend: &'a B) -> StorageResult<Self> {
        Ok(Self {
            backend,
            offset: 0,
            size: backend.size()?,
        })
    }

    pub(crate) fn next_step(&mut self) -> StorageResult<Step> {
        let offset = self.offset;
        let remaining = self.size - offset;
        if remaining == 0 {
            return Ok(Step::End);
        }
        if remaining < FRAME_OVERHEAD as u64 {
            return Ok(Step::Torn { offset });
        }

        let header = self.backend.read_at(offset, FRAME_HEADER_SIZE)?;
        let body_len = le_u32(&header[..4]) as usize;
        let stored_crc = le_u32(&header[4..]);
        if body_len > MAX_FRAME_BODY {
            return Err(StorageError::corrupted(
                offset,
                format!("frame length {body_len} exceeds the {MAX_FRAME_BODY} byte limit"),
            ));
        }

        let frame_len = (FRAME_OVERHEAD + body_len) as u64;
        if frame_len > remaining {
            if let Some(valid) = find_frame(self.backend, offset + 1, self.size)? {
                return Err(StorageError::corrupted(
                    offset,
                    format!("frame length {body_len} overruns a valid frame at offset {valid}"),
                ));
            }
            return Ok(Step::Torn { offset });
        }

        let mut body = self
            .backend
            .read_at(offset + FRAME_HEADER_SIZE as u64, body_len + FRAME_TRAILER_SIZE)?;
        let trailer = le_u32(&body[body_len..]) as usize;
        body.truncate(body_len);
        if trailer != body_len {
            return Err(StorageError::corrupted(
                offset,
                format!("frame length {body_len} does not match its trailer {trailer}"),
            ));
        }
        let actual_crc = crc32fast::hash(&body);
        if actual_crc != stored_crc {
            return Err(StorageError::corrupted(
                offset,
                format!("checksum mismatch: expected {stored_crc:08x}, got {actual_crc:08x}"),
            ));
        }

        self.offset += frame_len;
        Ok(Step::Frame { offset, body })
    }
}

/// Offset of the first complete, valid frame starting in `from..to`.
fn find_frame<B: StorageBackend>(backend: &B, from: u64, to: u64) -> StorageResult<Option<u64>> {
    if to.saturating_sub(from) < FRAME_OVERHEAD as u64 {
        return Ok(None);
    }
    let bytes = backend.read_at(from, (to - from) as usize)?;

    for start in 0..=bytes.len() - FRAME_OVERHEAD {
        let body_len = le_u32(&bytes[start..]) as usize;
        let body_start = start + FRAME_HEADER_SIZE;
        if body_len > MAX_FRAME_BODY || body_start + body_len + FRAME_TRAILER_SIZE > bytes.len() {
            continue;
        }
        let body_end = body_start + body_len;
        if le_u32(&bytes[body_end..]) as usize != body_len {
            continue;
        }
        if crc32fast::hash(&bytes[body_start..body_end]) == le_u32(&bytes[start + 4..]) {
            return Ok(Some(from + start as u64));
        }
    }
    Ok(None)
}

/// Checks, from the last frame alone, that the store ends on a frame
/// boundary.
pub(crate) fn ends_cleanly<B: StorageBackend>(backend: &B) -> StorageResult<bool> {
    let size = backend.size()?;
    if size == 0 {
        return Ok(true);
    }
    if size < FRAME_OVERHEAD as u64 {
        return Ok(false);
    }

    let body_len = le_u32(&backend.read_at(size - FRAME_TRAILER_SIZE as u64, FRAME_TRAILER_SIZE)?);
    let frame_len = FRAME_OVERHEAD as u64 + u64::from(body_len);
    if body_len as usize > MAX_FRAME_BODY || frame_len > size {
        return Ok(false);
    }

    let frame = backend.read_at(size - frame_len, frame_len as usize)?;
    let body = &frame[FRAME_HEADER_SIZE..FRAME_HEADER_SIZE + body_len as usize];
    Ok(le_u32(&frame[..4]) == body_len && le_u32(&frame[4..]) == crc32fast::hash(body))
}

/// Offset where the valid frames end, scanning from the start.
///
/// # Errors
///
/// Returns [`StorageError::Corrupted`] if anything but a torn last frame
/// stands in the way.
pub(crate) fn valid_end<B: StorageBackend>(backend: &B) -> StorageResult<u64> {
    let mut reader = FrameReader::new(backend)?;
    loop {
        match reader.next_step()? {
            Step::Frame { .. } => {}
            Step::End => return Ok(backend.size()?),
            Step::Torn { offset } => return Ok(offset),
        }
    }
}
