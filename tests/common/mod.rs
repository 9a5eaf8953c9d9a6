#![allow(dead_code)]

use lamellar_caf::{CafRuntime, CafRuntimeBuilder, LocalFabric};
use tracing_subscriber::EnvFilter;

use std::process::Command;
use std::sync::Arc;

/// Set in the environment of a test binary re-run as a child process
pub const CHILD_ENV: &str = "CAF_TEST_CHILD";

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Run `f` as every image of an in-process job of `num_images` images, one
/// thread per image, and collect what each image returned (index = image - 1).
///
/// Each image's runtime is finalized once `f` returns.
pub fn run_images<T, F>(num_images: usize, f: F) -> Vec<T>
where
    F: Fn(&CafRuntime) -> T + Send + Sync + 'static,
    T: Send + 'static,
{
    init_tracing();
    let fabric = LocalFabric::with_heap_size(num_images, 1 << 20);
    let f = Arc::new(f);
    let handles = (0..num_images)
        .map(|pe| {
            let fabric = fabric.clone();
            let f = f.clone();
            std::thread::Builder::new()
                .name(format!("image-{}", pe + 1))
                .spawn(move || {
                    let caf = CafRuntimeBuilder::new()
                        .with_local_fabric(fabric, pe)
                        .build();
                    let res = f(&caf);
                    caf.finalize();
                    res
                })
                .expect("spawn image thread")
        })
        .collect::<Vec<_>>();
    handles
        .into_iter()
        .map(|h| h.join().expect("image panicked"))
        .collect()
}

/// True when this test binary was started by [child_command].
pub fn is_child() -> bool {
    std::env::var_os(CHILD_ENV).is_some()
}

/// Re-run the test named `test` of the current test binary, on its own, in a
/// child process. The test checks [is_child] to take its child role.
pub fn child_command(test: &str) -> Command {
    let mut cmd = Command::new(std::env::current_exe().expect("test binary path"));
    cmd.arg(test)
        .arg("--exact")
        .arg("--nocapture")
        .arg("--test-threads=1")
        .env(CHILD_ENV, "1");
    cmd
}
