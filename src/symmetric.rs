use crate::lamellae::{
    AllocResult, CommAlloc, Lamellae, LamellaeComm, LamellaeRDMA, RdmaResult, RemoteLockGuard,
};

use tracing::trace;

const ELEM: usize = std::mem::size_of::<i32>();

/// A remotely addressable array of `len` `i32` counters per image.
///
/// Row `pe` lives in image `pe`'s share. Every read-modify-write goes through
/// the owning image's mutex, so callers never see the raw remote addresses.
#[derive(Debug)]
pub(crate) struct SymmetricArray {
    alloc: CommAlloc,
    len: usize,
}

impl SymmetricArray {
    /// Collective: every image allocates its row together.
    pub(crate) fn new(lamellae: &Lamellae, len: usize) -> AllocResult<SymmetricArray> {
        let alloc = lamellae.alloc(len * ELEM)?;
        Ok(SymmetricArray { alloc, len })
    }

    fn elem_addr(&self, pe: usize, idx: usize) -> usize {
        debug_assert!(idx < self.len);
        self.alloc.addrs[pe] + idx * ELEM
    }

    #[cfg(test)]
    pub(crate) fn load(&self, lamellae: &Lamellae, pe: usize, idx: usize) -> RdmaResult<i32> {
        lamellae.atomic_load(pe, self.elem_addr(pe, idx))
    }

    /// Zero this image's own row; must be followed by a barrier before any peer signals.
    pub(crate) fn zero_local_row(&self, lamellae: &Lamellae) -> RdmaResult {
        let me = lamellae.my_pe();
        for idx in 0..self.len {
            lamellae.atomic_store(me, 0, self.elem_addr(me, idx))?;
        }
        Ok(())
    }

    /// Add one to `row[pe][idx]` while holding `pe`'s mutex.
    pub(crate) fn increment(&self, lamellae: &Lamellae, pe: usize, idx: usize) -> RdmaResult {
        let addr = self.elem_addr(pe, idx);
        let _guard = RemoteLockGuard::new(lamellae, pe);
        let val = lamellae.atomic_load(pe, addr)?;
        lamellae.atomic_store(pe, val + 1, addr)?;
        trace!("row[{}][{}] {} -> {}", pe, idx, val, val + 1);
        Ok(())
    }

    /// One consume pass over this image's row, under this image's mutex.
    ///
    /// For every `i` with `expected[i] != 0`, takes one pending count from
    /// `row[me][i]` if there is one and decrements `expected[i]` to match.
    /// Returns how many indices are still waiting after the pass.
    pub(crate) fn consume(&self, lamellae: &Lamellae, expected: &mut [i32]) -> RdmaResult<usize> {
        let me = lamellae.my_pe();
        let _guard = RemoteLockGuard::new(lamellae, me);
        let mut outstanding = 0;
        for (idx, want) in expected.iter_mut().enumerate().take(self.len) {
            if *want == 0 {
                continue;
            }
            let addr = self.elem_addr(me, idx);
            let val = lamellae.atomic_load(me, addr)?;
            if val != 0 {
                lamellae.atomic_store(me, val - 1, addr)?;
                *want -= 1;
                trace!("consumed signal from pe {}", idx);
            }
            if *want != 0 {
                outstanding += 1;
            }
        }
        Ok(outstanding)
    }

    pub(crate) fn free(self, lamellae: &Lamellae) -> AllocResult<()> {
        lamellae.free(self.alloc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lamellae::local_lamellae::LocalBuilder;
    use crate::lamellae::LamellaeInit;
    use crate::LocalFabric;
    use std::sync::Arc;

    fn pes(n: usize) -> Vec<Arc<Lamellae>> {
        let fabric = LocalFabric::with_heap_size(n, 1 << 16);
        (0..n)
            .map(|pe| {
                LocalBuilder::new(fabric.clone(), pe)
                    .init_lamellae()
                    .unwrap()
            })
            .collect()
    }

    #[test]
    fn increment_then_consume() {
        let pes = pes(3);
        let arrays = pes
            .iter()
            .map(|l| SymmetricArray::new(l, 3).unwrap())
            .collect::<Vec<_>>();
        for (l, a) in pes.iter().zip(arrays.iter()) {
            a.zero_local_row(l).unwrap();
        }

        // pe 1 and pe 2 each signal pe 0, pe 2 twice
        arrays[1].increment(&pes[1], 0, 1).unwrap();
        arrays[2].increment(&pes[2], 0, 2).unwrap();
        arrays[2].increment(&pes[2], 0, 2).unwrap();
        assert_eq!(arrays[0].load(&pes[0], 0, 1).unwrap(), 1);
        assert_eq!(arrays[0].load(&pes[0], 0, 2).unwrap(), 2);

        let mut expected = vec![0, 1, 1];
        assert_eq!(arrays[0].consume(&pes[0], &mut expected).unwrap(), 0);
        assert_eq!(expected, vec![0, 0, 0]);
        assert_eq!(arrays[0].load(&pes[0], 0, 1).unwrap(), 0);
        // the surplus signal from pe 2 stays for a later round
        assert_eq!(arrays[0].load(&pes[0], 0, 2).unwrap(), 1);

        let mut expected = vec![0, 1, 0];
        assert_eq!(arrays[0].consume(&pes[0], &mut expected).unwrap(), 1);
        assert_eq!(expected, vec![0, 1, 0]);

        for (l, a) in pes.iter().zip(arrays) {
            a.free(l).unwrap();
        }
    }
}
