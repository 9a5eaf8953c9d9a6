use crate::lamellae::{Lamellae, LamellaeComm};

use tracing::error;

/// Terminate every image: raise the collective abort if a transport is up, then exit.
fn abort_all(lamellae: Option<&Lamellae>, code: i32) -> ! {
    if let Some(lamellae) = lamellae {
        lamellae.abort(code);
    }
    std::process::exit(code)
}

/// Print an image-numbered diagnostic and abort all images with status 1.
pub(crate) fn runtime_error(lamellae: Option<&Lamellae>, this_image: usize, msg: &str) -> ! {
    error!("image {} runtime error: {}", this_image, msg);
    eprintln!("Coarray runtime error on image {this_image}: {msg}");
    abort_all(lamellae, 1)
}

/// `ERROR STOP "msg"`
pub(crate) fn error_stop_str(lamellae: Option<&Lamellae>, msg: &str) -> ! {
    error!("error stop: {}", msg);
    eprintln!("ERROR STOP {msg}");
    abort_all(lamellae, 1)
}

/// `ERROR STOP code`
pub(crate) fn error_stop(lamellae: Option<&Lamellae>, code: i32) -> ! {
    error!("error stop with code {}", code);
    eprintln!("ERROR STOP {code}");
    abort_all(lamellae, code)
}
