use crate::config;

pub(crate) enum RuntimeWarning<'a> {
    /// seconds waited so far, and the 1-based images still owing a signal
    SyncImagesTimeout(f64, &'a [usize]),
    UnfinalizedDrop(usize),
}

impl<'a> RuntimeWarning<'a> {
    fn print_warning(&self) -> bool {
        match self {
            RuntimeWarning::SyncImagesTimeout(elapsed, _) => {
                config().sync_warning.unwrap_or(true) && *elapsed > config().deadlock_timeout
            }
            RuntimeWarning::UnfinalizedDrop(_) => true,
        }
    }

    fn message(&self) -> String {
        match self {
            RuntimeWarning::SyncImagesTimeout(elapsed, pending) => {
                format!("[LAMELLAR WARNING] Potential deadlock detected.\n\
                SYNC IMAGES has waited {elapsed:.1} seconds for images {pending:?} to name this image in their own SYNC IMAGES.\n\
                Every image listed in a SYNC IMAGES must in turn list this image (directly or via '*'), otherwise the statement never completes.\n\
                The deadlock timeout can be set via the LAMELLAR_DEADLOCK_TIMEOUT environment variable, the current timeout is {} seconds.\n\
                Set LAMELLAR_SYNC_WARNING=false to disable this warning.", config().deadlock_timeout)
            }
            RuntimeWarning::UnfinalizedDrop(image) => {
                format!("[LAMELLAR WARNING] the coarray runtime of image {image} is being dropped without finalize() having been called.\n\
                finalize() will be called now; it is collective, so every image must also drop or finalize its runtime.")
            }
        }
    }

    pub(crate) fn print(self) {
        if self.print_warning() {
            let msg = self.message();
            tracing::warn!("{}", msg);
            println!("{msg}");
        }
    }
}
