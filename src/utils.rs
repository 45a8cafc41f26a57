use std::sync::{Mutex, MutexGuard};

use crate::types::NR_MUXS;

/// whether `needle` shows up anywhere in `buf`, the modem may send garbage before its reply
pub(crate) fn find_in_buf(buf: &[u8], needle: &[u8]) -> bool {
    needle.is_empty() || buf.windows(needle.len()).any(|w| w == needle)
}

/// locks `mutex`, a panicked holder doesn't make the protocol state any less valid
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

/// port `line` runs over DLCI `line + 1`
#[must_use]
pub const fn line2dlci(line: usize) -> u8 {
    (line + 1) as u8
}

/// the port sitting on `dlci`, the control channel maps to the first port
#[must_use]
pub const fn dlci2line(dlci: u8) -> Option<usize> {
    match dlci as usize {
        0 => Some(0),
        d if d <= NR_MUXS => Some(d - 1),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_reply_after_garbage() {
        assert!(find_in_buf(b"\0\0AT\r\r\nOK\r\n", b"OK"));
        assert!(find_in_buf(b"OOK", b"OK"));
        assert!(!find_in_buf(b"O K", b"OK"));
        assert!(find_in_buf(b"\r\nERROR\r\n", b"ERROR"));
    }

    #[test]
    fn line_mapping() {
        assert_eq!(line2dlci(0), 1);
        assert_eq!(line2dlci(31), 32);
        assert_eq!(dlci2line(0), Some(0));
        assert_eq!(dlci2line(1), Some(0));
        assert_eq!(dlci2line(32), Some(31));
        assert_eq!(dlci2line(33), None);
    }
}
