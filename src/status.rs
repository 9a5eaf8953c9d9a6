/// Where a recoverable failure is reported instead of aborting.
///
/// Mirrors the `STAT=` / `ERRMSG=` specifiers: `stat` receives `0` on success
/// or the error's status code, and `errmsg` (if non-empty) receives the
/// message, truncated to fit and blank-padded, never NUL terminated. An
/// errmsg buffer is left untouched on success.
#[derive(Debug)]
pub struct StatusSink<'a> {
    stat: &'a mut i32,
    errmsg: &'a mut [u8],
}

impl<'a> StatusSink<'a> {
    pub fn new(stat: &'a mut i32, errmsg: &'a mut [u8]) -> StatusSink<'a> {
        StatusSink { stat, errmsg }
    }

    /// A sink with no message buffer
    pub fn stat_only(stat: &'a mut i32) -> StatusSink<'a> {
        StatusSink {
            stat,
            errmsg: &mut [],
        }
    }

    pub(crate) fn success(&mut self) {
        *self.stat = 0;
    }

    pub(crate) fn fail(&mut self, stat: i32, msg: &str) {
        *self.stat = stat;
        copy_fixed(self.errmsg, msg);
    }
}

/// Copy `msg` into a fixed width buffer: truncate, then pad with blanks.
pub(crate) fn copy_fixed(buf: &mut [u8], msg: &str) {
    let bytes = msg.as_bytes();
    let len = bytes.len().min(buf.len());
    buf[..len].copy_from_slice(&bytes[..len]);
    buf[len..].fill(b' ');
}
