//! The process-level error hook.
//!
//! Emitted code and the runtime report failures through [`weft_error`]:
//! the user-installed handler sees the message, or, with no handler
//! installed, the message prints to stderr and the process exits. The
//! runtime never retries or recovers past this point.

use std::ffi::{c_char, CStr, CString};
use std::sync::atomic::{AtomicUsize, Ordering};

/// A user error handler. Receives a NUL-terminated message.
pub type ErrorHandler = extern "C" fn(*const c_char);

static HANDLER: AtomicUsize = AtomicUsize::new(0);

/// Report a runtime error. Diverts to the installed handler when there
/// is one; otherwise prints and exits.
#[no_mangle]
pub extern "C" fn weft_error(msg: *const c_char) {
    let handler = HANDLER.load(Ordering::Acquire);
    if handler != 0 {
        // Stored from a valid fn pointer in weft_set_error_handler.
        let f: ErrorHandler = unsafe { std::mem::transmute::<usize, ErrorHandler>(handler) };
        f(msg);
        return;
    }
    let text = if msg.is_null() {
        "<null>".to_string()
    } else {
        unsafe { CStr::from_ptr(msg) }.to_string_lossy().into_owned()
    };
    eprintln!("Error: {text}");
    std::process::exit(1);
}

/// Install (or with `None`, remove) the process error handler.
#[no_mangle]
pub extern "C" fn weft_set_error_handler(handler: Option<ErrorHandler>) {
    let value = handler.map_or(0, |f| f as usize);
    HANDLER.store(value, Ordering::Release);
}

/// Report an error from Rust runtime code.
pub fn error(msg: &str) {
    match CString::new(msg) {
        Ok(c) => weft_error(c.as_ptr()),
        Err(_) => weft_error(c"runtime error with embedded NUL".as_ptr()),
    }
}

/// Print a message from emitted code. Goes to stderr so it interleaves
/// with error reports.
#[no_mangle]
pub extern "C" fn weft_print(msg: *const c_char) {
    if msg.is_null() {
        return;
    }
    let text = unsafe { CStr::from_ptr(msg) }.to_string_lossy();
    eprint!("{text}");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;

    static FIRED: AtomicBool = AtomicBool::new(false);

    extern "C" fn recording_handler(_msg: *const c_char) {
        FIRED.store(true, Ordering::SeqCst);
    }

    #[test]
    fn installed_handler_receives_errors() {
        weft_set_error_handler(Some(recording_handler));
        error("boom");
        assert!(FIRED.load(Ordering::SeqCst));
        weft_set_error_handler(None);
    }
}
