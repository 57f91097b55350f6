//! The pipeline allocator.
//!
//! Vector code wants 32-byte-aligned temporaries, so [`weft_malloc`]
//! over-allocates and rounds the returned pointer up, stashing the real
//! allocation's address and size in a header just below it for
//! [`weft_free`] to recover.
//!
//! With the `guard-fences` feature, each allocation gains canary words on
//! both sides, checked at free: a pipeline that stored out of bounds
//! aborts through the error hook instead of corrupting the heap
//! silently. The fences stay off the default path.

use std::alloc::{alloc, dealloc, Layout};

const ALIGNMENT: usize = 32;
/// Room for the header below the aligned pointer: original address and
/// total layout size.
const HEADER: usize = 16;

#[cfg(feature = "guard-fences")]
const FENCE_BYTES: usize = 32;
#[cfg(feature = "guard-fences")]
const CANARY: u8 = 0xa5;

fn layout_for(total: usize) -> Option<Layout> {
    // 16-byte base alignment keeps the rounded pointer at least a full
    // header above the allocation start.
    Layout::from_size_align(total, 16).ok()
}

/// Allocate `size` bytes aligned to 32. Returns null on failure; the
/// caller reports through the error hook.
#[no_mangle]
pub extern "C" fn weft_malloc(size: usize) -> *mut u8 {
    #[cfg(feature = "guard-fences")]
    let size = size + 2 * FENCE_BYTES;

    let Some(total) = size.checked_add(ALIGNMENT + HEADER) else {
        return std::ptr::null_mut();
    };
    let Some(layout) = layout_for(total) else {
        return std::ptr::null_mut();
    };
    let raw = unsafe { alloc(layout) };
    if raw.is_null() {
        return std::ptr::null_mut();
    }

    // The smallest 32-byte boundary with a full header below it.
    let aligned = (raw as usize + HEADER + ALIGNMENT - 1) & !(ALIGNMENT - 1);
    let aligned = aligned as *mut u8;
    unsafe {
        (aligned.cast::<usize>()).sub(2).write_unaligned(raw as usize);
        (aligned.cast::<usize>()).sub(1).write_unaligned(total);
    }

    arm_fences(aligned, size)
}

/// With fences on, paint the canaries and hand out the pointer between
/// them; otherwise the aligned pointer is the user pointer.
#[cfg(feature = "guard-fences")]
fn arm_fences(aligned: *mut u8, padded_size: usize) -> *mut u8 {
    unsafe {
        let user = aligned.add(FENCE_BYTES);
        std::ptr::write_bytes(aligned, CANARY, FENCE_BYTES);
        std::ptr::write_bytes(user.add(padded_size - 2 * FENCE_BYTES), CANARY, FENCE_BYTES);
        user
    }
}

#[cfg(not(feature = "guard-fences"))]
fn arm_fences(aligned: *mut u8, _padded_size: usize) -> *mut u8 {
    aligned
}

/// Free a pointer from [`weft_malloc`].
#[no_mangle]
pub extern "C" fn weft_free(ptr: *mut u8) {
    if ptr.is_null() {
        return;
    }

    #[cfg(feature = "guard-fences")]
    let ptr = {
        let fence = unsafe { ptr.sub(FENCE_BYTES) };
        for i in 0..FENCE_BYTES {
            if unsafe { fence.add(i).read() } != CANARY {
                crate::error::error("guard fence corrupted below allocation");
                return;
            }
        }
        fence
    };

    unsafe {
        let raw = ptr.cast::<usize>().sub(2).read_unaligned() as *mut u8;
        let total = ptr.cast::<usize>().sub(1).read_unaligned();
        #[cfg(feature = "guard-fences")]
        {
            // The trailing fence sits at the end of the usable region.
            let user_bytes = total - ALIGNMENT - HEADER - 2 * FENCE_BYTES;
            let high = ptr.add(FENCE_BYTES + user_bytes);
            for i in 0..FENCE_BYTES {
                if high.add(i).read() != CANARY {
                    crate::error::error("guard fence corrupted above allocation");
                    return;
                }
            }
        }
        if let Some(layout) = layout_for(total) {
            dealloc(raw, layout);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocations_are_aligned() {
        let p = weft_malloc(100);
        assert!(!p.is_null());
        assert_eq!(p as usize % ALIGNMENT, 0);
        unsafe { std::ptr::write_bytes(p, 0xcd, 100) };
        weft_free(p);
    }

    #[test]
    fn zero_sized_allocations_survive() {
        let p = weft_malloc(0);
        assert!(!p.is_null());
        weft_free(p);
    }

    #[test]
    fn null_free_is_a_noop() {
        weft_free(std::ptr::null_mut());
    }
}
