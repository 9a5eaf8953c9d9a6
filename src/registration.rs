use crate::lamellae::{CommAlloc, Lamellae, LamellaeRDMA};
use crate::token::{CoarrayToken, RegistrationKind};
use crate::{CafError, CafResult};

use std::collections::HashMap;
use tracing::{debug, trace};

/// A token together with the backing memory it addresses.
#[derive(Debug)]
pub(crate) struct Registration {
    token: CoarrayToken,
    alloc: CommAlloc,
    kind: RegistrationKind,
}

impl Registration {
    pub(crate) fn kind(&self) -> RegistrationKind {
        self.kind
    }

    pub(crate) fn release(self, lamellae: &Lamellae) -> CafResult<()> {
        trace!(
            "releasing registration {} ({:?}, {} bytes)",
            self.token.id(),
            self.kind,
            self.token.size()
        );
        lamellae.free(self.alloc).map_err(CafError::FreeFailed)
        // the token's address vector goes away with `self`
    }
}

/// Program-lifetime registrations, released newest first.
#[derive(Debug, Default)]
pub(crate) struct StaticRegistrationList {
    entries: Vec<Registration>,
}

impl StaticRegistrationList {
    pub(crate) fn push(&mut self, registration: Registration) {
        self.entries.push(registration);
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    fn remove(&mut self, id: usize) -> Option<Registration> {
        let i = self.entries.iter().position(|r| r.token.id() == id)?;
        Some(self.entries.remove(i))
    }

    /// Release every entry, most recently registered first; returns how many were released.
    pub(crate) fn drain(&mut self, lamellae: &Lamellae) -> CafResult<usize> {
        let mut released = 0;
        while let Some(registration) = self.entries.pop() {
            registration.release(lamellae)?;
            released += 1;
        }
        Ok(released)
    }
}

/// Every registration this image currently owns.
#[derive(Debug, Default)]
pub(crate) struct RegistrationTable {
    next_id: usize,
    live: HashMap<usize, Registration>,
    static_list: StaticRegistrationList,
}

impl RegistrationTable {
    /// Collective: allocates `size` bytes on every image and hands back the addressing token.
    pub(crate) fn register(
        &mut self,
        lamellae: &Lamellae,
        this_image: usize,
        size: usize,
        kind: RegistrationKind,
    ) -> CafResult<CoarrayToken> {
        let alloc = lamellae.alloc(size).map_err(CafError::AllocationFailed)?;
        let id = self.next_id;
        self.next_id += 1;
        let token = CoarrayToken::new(id, this_image, size, alloc.addrs.clone());
        debug!(
            "registered {:?} {} of {} bytes at {:?}",
            kind,
            id,
            size,
            token.local_ptr()
        );
        let registration = Registration {
            token: token.clone(),
            alloc,
            kind,
        };
        if kind.is_static() {
            self.static_list.push(registration);
        } else {
            self.live.insert(id, registration);
        }
        Ok(token)
    }

    /// Remove the registration behind `token` from the table without freeing it.
    pub(crate) fn take(&mut self, token: &CoarrayToken) -> CafResult<Registration> {
        self.live
            .remove(&token.id())
            .or_else(|| self.static_list.remove(token.id()))
            .ok_or(CafError::UnknownToken(token.id()))
    }

    pub(crate) fn num_live(&self) -> usize {
        self.live.len()
    }

    pub(crate) fn static_list(&self) -> &StaticRegistrationList {
        &self.static_list
    }

    pub(crate) fn static_list_mut(&mut self) -> &mut StaticRegistrationList {
        &mut self.static_list
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lamellae::local_lamellae::LocalBuilder;
    use crate::lamellae::LamellaeInit;
    use crate::LocalFabric;

    fn single_image() -> std::sync::Arc<Lamellae> {
        LocalBuilder::new(LocalFabric::with_heap_size(1, 4096), 0)
            .init_lamellae()
            .unwrap()
    }

    #[test]
    fn static_registrations_drain_lifo() {
        let lamellae = single_image();
        let mut table = RegistrationTable::default();
        let a = table
            .register(&lamellae, 1, 8, RegistrationKind::CoarrayStatic)
            .unwrap();
        let b = table
            .register(&lamellae, 1, 8, RegistrationKind::LockStatic)
            .unwrap();
        let c = table
            .register(&lamellae, 1, 8, RegistrationKind::CoarrayAlloc)
            .unwrap();
        assert_eq!(table.static_list().len(), 2);
        assert_eq!(table.num_live(), 1);
        assert_ne!(a.id(), b.id());

        let order = table
            .static_list
            .entries
            .iter()
            .map(|r| r.token.id())
            .collect::<Vec<_>>();
        assert_eq!(order, vec![a.id(), b.id()]);

        assert_eq!(table.static_list_mut().drain(&lamellae).unwrap(), 2);
        assert_eq!(table.static_list().len(), 0);
        assert_eq!(lamellae.mem_occupied(), 8);

        let reg = table.take(&c).unwrap();
        assert_eq!(reg.kind(), RegistrationKind::CoarrayAlloc);
        reg.release(&lamellae).unwrap();
        assert_eq!(lamellae.mem_occupied(), 0);
        assert!(matches!(table.take(&c), Err(CafError::UnknownToken(_))));
    }

    #[test]
    fn failed_allocation_leaves_no_entry() {
        let lamellae = single_image();
        let mut table = RegistrationTable::default();
        let err = table
            .register(&lamellae, 1, 1 << 20, RegistrationKind::CoarrayStatic)
            .unwrap_err();
        assert!(matches!(err, CafError::AllocationFailed(_)));
        assert_eq!(table.static_list().len(), 0);
        assert_eq!(table.num_live(), 0);
        assert_eq!(lamellae.mem_occupied(), 0);
    }
}
