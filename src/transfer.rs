use crate::lamellae::{Lamellae, LamellaeRDMA, RdmaError};
use crate::token::CoarrayToken;
use crate::{CafError, CafOp, CafResult};

use tracing::trace;

// (pe, remote address) for `len` bytes at `offset` into `image`'s share
fn remote_target(
    token: &CoarrayToken,
    op: CafOp,
    image: usize,
    offset: usize,
    len: usize,
) -> CafResult<(usize, usize)> {
    let base = token.remote_addr(image).ok_or(CafError::InvalidImage {
        op,
        image,
        num_images: token.num_images(),
    })?;
    match offset.checked_add(len) {
        Some(end) if end <= token.size() => Ok((image - 1, base + offset)),
        _ => Err(CafError::Transport(
            op,
            RdmaError::OutOfBounds {
                offset,
                len,
                size: token.size(),
            },
        )),
    }
}

/// Write `data` into `image`'s share of `token` at byte `offset`.
///
/// A non-blocking put is only guaranteed complete after the next fence
/// (`sync_memory`, `sync_all`).
pub(crate) fn send(
    lamellae: &Lamellae,
    token: &CoarrayToken,
    offset: usize,
    image: usize,
    data: &[u8],
    nonblocking: bool,
) -> CafResult<()> {
    let (pe, dst) = remote_target(token, CafOp::Send, image, offset, data.len())?;
    trace!(
        "put {} bytes to image {} at offset {} (nonblocking: {})",
        data.len(),
        image,
        offset,
        nonblocking
    );
    let res = if nonblocking {
        lamellae.iput(pe, data, dst)
    } else {
        lamellae.put(pe, data, dst)
    };
    res.map_err(|e| CafError::Transport(CafOp::Send, e))
}

/// Blocking read of `dst.len()` bytes from `image`'s share of `token` at byte `offset`.
pub(crate) fn get(
    lamellae: &Lamellae,
    token: &CoarrayToken,
    offset: usize,
    image: usize,
    dst: &mut [u8],
) -> CafResult<()> {
    let (pe, src) = remote_target(token, CafOp::Get, image, offset, dst.len())?;
    trace!("get {} bytes from image {} at offset {}", dst.len(), image, offset);
    lamellae
        .get(pe, src, dst)
        .map_err(|e| CafError::Transport(CafOp::Get, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_addresses() {
        let token = CoarrayToken::new(0, 1, 32, vec![0x1000, 0x2000]);
        assert_eq!(
            remote_target(&token, CafOp::Send, 2, 8, 24).unwrap(),
            (1, 0x2008)
        );
        assert_eq!(
            remote_target(&token, CafOp::Get, 1, 0, 0).unwrap(),
            (0, 0x1000)
        );
    }

    #[test]
    fn bad_targets() {
        let token = CoarrayToken::new(0, 1, 32, vec![0x1000, 0x2000]);
        assert!(matches!(
            remote_target(&token, CafOp::Send, 3, 0, 1),
            Err(CafError::InvalidImage { image: 3, .. })
        ));
        assert!(matches!(
            remote_target(&token, CafOp::Send, 0, 0, 1),
            Err(CafError::InvalidImage { image: 0, .. })
        ));
        assert!(matches!(
            remote_target(&token, CafOp::Get, 2, 30, 4),
            Err(CafError::Transport(
                CafOp::Get,
                RdmaError::OutOfBounds { offset: 30, .. }
            ))
        ));
        assert!(matches!(
            remote_target(&token, CafOp::Send, 2, usize::MAX, 2),
            Err(CafError::Transport(CafOp::Send, _))
        ));
    }
}
