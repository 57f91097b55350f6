//! The device bridge.
//!
//! Compiled pipelines see devices through a fixed protocol: allocate and
//! free device memory for a [`BufferT`], copy between host and device
//! with the dirty-bit discipline, synchronize, and launch kernels. The
//! backend implementing the protocol is a registered
//! [`DeviceInterface`]; the runtime ships [`MallocDevice`], a reference
//! backend that backs "device" memory with host allocations, which is
//! what tests and the interpreter run against.
//!
//! The process-wide device context is a pointer guarded by a test-and-set
//! spinlock. The first acquisition initializes the context from the
//! registered backend; each acquisition pairs with a release; overlapping
//! acquisitions spin until the holder releases. `weft_release` tears the
//! context down.
//!
//! Consistency protocol: before a kernel reads a buffer, a dirty host
//! copy flushes down and clears `host_dirty`; after a kernel writes,
//! `dev_dirty` is set; before host code reads, a dirty device copy
//! flushes up and clears `dev_dirty`. Strided buffers copy as a nest of
//! contiguous chunk transfers.

use std::collections::HashMap;
use std::ffi::{c_char, CStr};
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use crate::buffer::BufferT;
use crate::error::error;

/// Result codes crossing the ABI: 0 is success, anything else is a
/// backend-defined error.
pub const DEV_SUCCESS: i32 = 0;
/// No backend has been registered.
pub const DEV_NO_INTERFACE: i32 = -1;
/// The named kernel is not loaded.
pub const DEV_UNKNOWN_KERNEL: i32 = -2;

/// A device backend.
pub trait DeviceInterface: Send + Sync {
    fn device_malloc(&self, bytes: usize) -> Result<u64, i32>;
    fn device_free(&self, handle: u64) -> Result<(), i32>;
    /// Copy `src` into device memory at `byte_offset` within `handle`.
    fn copy_to_device(&self, handle: u64, byte_offset: usize, src: &[u8]) -> Result<(), i32>;
    /// Copy device memory at `byte_offset` within `handle` into `dst`.
    fn copy_to_host(&self, handle: u64, byte_offset: usize, dst: &mut [u8]) -> Result<(), i32>;
    /// Block until queued device work finishes.
    fn sync(&self) -> Result<(), i32>;
    /// Load a kernel module; returns an opaque module state id.
    fn init_kernels(&self, source: &str) -> Result<(), i32>;
    /// Launch `entry` over the given grid.
    fn run(
        &self,
        entry: &str,
        blocks: [i32; 3],
        threads: [i32; 3],
        shared_bytes: usize,
        args: &[*mut u8],
    ) -> Result<(), i32>;
}

struct Context {
    interface: Box<dyn DeviceInterface>,
}

static CONTEXT_LOCK: AtomicBool = AtomicBool::new(false);
static CONTEXT: Mutex<Option<Context>> = Mutex::new(None);
static REGISTERED: Mutex<Option<Box<dyn DeviceInterface>>> = Mutex::new(None);

/// Install the backend the next context acquisition will use. Replaces
/// any previously registered backend; an initialized context keeps the
/// backend it was created with until released.
pub fn register_device(interface: Box<dyn DeviceInterface>) {
    *REGISTERED.lock() = Some(interface);
}

/// Exclusive access to the process device context.
struct ContextGuard;

impl ContextGuard {
    fn acquire() -> Result<ContextGuard, i32> {
        // Test-and-set spinlock; overlapping acquires block here until
        // the previous release.
        while CONTEXT_LOCK.swap(true, Ordering::Acquire) {
            std::hint::spin_loop();
        }
        // Initialize on first use.
        let mut ctx = CONTEXT.lock();
        if ctx.is_none() {
            match REGISTERED.lock().take() {
                Some(interface) => *ctx = Some(Context { interface }),
                None => {
                    drop(ctx);
                    CONTEXT_LOCK.store(false, Ordering::Release);
                    return Err(DEV_NO_INTERFACE);
                }
            }
        }
        Ok(ContextGuard)
    }

    fn with<R>(&self, f: impl FnOnce(&dyn DeviceInterface) -> Result<R, i32>) -> Result<R, i32> {
        let ctx = CONTEXT.lock();
        match ctx.as_ref() {
            Some(c) => f(c.interface.as_ref()),
            None => Err(DEV_NO_INTERFACE),
        }
    }
}

impl Drop for ContextGuard {
    fn drop(&mut self) {
        CONTEXT_LOCK.store(false, Ordering::Release);
    }
}

fn with_context<R>(f: impl FnOnce(&dyn DeviceInterface) -> Result<R, i32>) -> Result<R, i32> {
    let guard = ContextGuard::acquire()?;
    guard.with(f)
}

/// Allocate device memory for `buf` if it has none.
#[no_mangle]
pub extern "C" fn weft_dev_malloc(buf: *mut BufferT) -> i32 {
    let buf = unsafe { &mut *buf };
    if buf.dev != 0 {
        return DEV_SUCCESS;
    }
    match with_context(|dev| dev.device_malloc(buf.size_in_bytes())) {
        Ok(handle) => {
            buf.dev = handle;
            DEV_SUCCESS
        }
        Err(code) => {
            error("device malloc failed");
            code
        }
    }
}

/// Release `buf`'s device memory. Accepts buffers that never touched
/// the device.
#[no_mangle]
pub extern "C" fn weft_dev_free(buf: *mut BufferT) -> i32 {
    let buf = unsafe { &mut *buf };
    if buf.dev == 0 {
        return DEV_SUCCESS;
    }
    let handle = buf.dev;
    buf.dev = 0;
    match with_context(|dev| dev.device_free(handle)) {
        Ok(()) => DEV_SUCCESS,
        Err(code) => code,
    }
}

/// Flush a dirty host copy down to the device.
#[no_mangle]
pub extern "C" fn weft_copy_to_dev(buf: *mut BufferT) -> i32 {
    let buf = unsafe { &mut *buf };
    if !buf.host_dirty {
        return DEV_SUCCESS;
    }
    if buf.dev == 0 {
        let code = weft_dev_malloc(buf);
        if code != DEV_SUCCESS {
            return code;
        }
    }
    let elem = usize::try_from(buf.elem_size.max(1)).unwrap_or(1);
    let host = buf.host;
    let handle = buf.dev;
    let result = with_context(|dev| {
        buf.for_each_contiguous_chunk(|offset, len| {
            let bytes = len * elem;
            let src = unsafe { std::slice::from_raw_parts(host.add(offset * elem), bytes) };
            dev.copy_to_device(handle, offset * elem, src)
        })
    });
    match result {
        Ok(()) => {
            buf.host_dirty = false;
            DEV_SUCCESS
        }
        Err(code) => code,
    }
}

/// Flush a dirty device copy up to the host.
#[no_mangle]
pub extern "C" fn weft_copy_to_host(buf: *mut BufferT) -> i32 {
    let buf = unsafe { &mut *buf };
    if !buf.dev_dirty {
        return DEV_SUCCESS;
    }
    if buf.dev == 0 || buf.host.is_null() {
        return DEV_NO_INTERFACE;
    }
    let elem = usize::try_from(buf.elem_size.max(1)).unwrap_or(1);
    let host = buf.host;
    let handle = buf.dev;
    let result = with_context(|dev| {
        buf.for_each_contiguous_chunk(|offset, len| {
            let bytes = len * elem;
            let dst =
                unsafe { std::slice::from_raw_parts_mut(host.add(offset * elem), bytes) };
            dev.copy_to_host(handle, offset * elem, dst)
        })
    });
    match result {
        Ok(()) => {
            buf.dev_dirty = false;
            DEV_SUCCESS
        }
        Err(code) => code,
    }
}

/// Block until the device drains its queue.
#[no_mangle]
pub extern "C" fn weft_dev_sync() -> i32 {
    match with_context(|dev| dev.sync()) {
        Ok(()) => DEV_SUCCESS,
        Err(code) => code,
    }
}

/// Load a kernel module for the current context.
#[no_mangle]
pub extern "C" fn weft_init_kernels(source: *const c_char) -> i32 {
    let text = if source.is_null() {
        String::new()
    } else {
        unsafe { CStr::from_ptr(source) }.to_string_lossy().into_owned()
    };
    match with_context(|dev| dev.init_kernels(&text)) {
        Ok(()) => DEV_SUCCESS,
        Err(code) => code,
    }
}

/// Launch a kernel.
#[no_mangle]
pub extern "C" fn weft_dev_run(
    entry: *const c_char,
    blocks_x: i32,
    blocks_y: i32,
    blocks_z: i32,
    threads_x: i32,
    threads_y: i32,
    threads_z: i32,
    shared_bytes: usize,
    args: *const *mut u8,
    num_args: usize,
) -> i32 {
    let name = if entry.is_null() {
        return DEV_UNKNOWN_KERNEL;
    } else {
        unsafe { CStr::from_ptr(entry) }.to_string_lossy().into_owned()
    };
    let args = if args.is_null() {
        &[]
    } else {
        unsafe { std::slice::from_raw_parts(args, num_args) }
    };
    match with_context(|dev| {
        dev.run(
            &name,
            [blocks_x, blocks_y, blocks_z],
            [threads_x, threads_y, threads_z],
            shared_bytes,
            args,
        )
    }) {
        Ok(()) => DEV_SUCCESS,
        Err(code) => code,
    }
}

/// Tear down the device context. The next acquisition re-initializes
/// from the registered backend.
#[no_mangle]
pub extern "C" fn weft_release() {
    while CONTEXT_LOCK.swap(true, Ordering::Acquire) {
        std::hint::spin_loop();
    }
    *CONTEXT.lock() = None;
    CONTEXT_LOCK.store(false, Ordering::Release);
}

// The reference backend.

/// A kernel the reference backend can launch: receives the grid and the
/// raw argument pointers.
pub type HostKernel = fn(blocks: [i32; 3], threads: [i32; 3], args: &[*mut u8]);

/// A backend that implements the device protocol with host memory.
///
/// "Device" allocations are boxed byte vectors; kernels are Rust
/// functions registered by name. Exercises the full consistency
/// protocol without any device hardware.
#[derive(Default)]
pub struct MallocDevice {
    allocations: Mutex<HashMap<u64, Box<[u8]>>>,
    kernels: Mutex<HashMap<String, HostKernel>>,
    next_handle: Mutex<u64>,
}

impl MallocDevice {
    pub fn new() -> MallocDevice {
        MallocDevice::default()
    }

    /// Register a kernel launched by [`DeviceInterface::run`].
    pub fn register_kernel(&self, name: impl Into<String>, kernel: HostKernel) {
        self.kernels.lock().insert(name.into(), kernel);
    }
}

impl DeviceInterface for MallocDevice {
    fn device_malloc(&self, bytes: usize) -> Result<u64, i32> {
        let mut next = self.next_handle.lock();
        *next += 1;
        let handle = *next;
        self.allocations
            .lock()
            .insert(handle, vec![0u8; bytes.max(1)].into_boxed_slice());
        Ok(handle)
    }

    fn device_free(&self, handle: u64) -> Result<(), i32> {
        match self.allocations.lock().remove(&handle) {
            Some(_) => Ok(()),
            None => Err(DEV_NO_INTERFACE),
        }
    }

    fn copy_to_device(&self, handle: u64, byte_offset: usize, src: &[u8]) -> Result<(), i32> {
        let mut allocs = self.allocations.lock();
        let Some(mem) = allocs.get_mut(&handle) else {
            return Err(DEV_NO_INTERFACE);
        };
        let end = byte_offset + src.len();
        if end > mem.len() {
            return Err(DEV_NO_INTERFACE);
        }
        mem[byte_offset..end].copy_from_slice(src);
        Ok(())
    }

    fn copy_to_host(&self, handle: u64, byte_offset: usize, dst: &mut [u8]) -> Result<(), i32> {
        let allocs = self.allocations.lock();
        let Some(mem) = allocs.get(&handle) else {
            return Err(DEV_NO_INTERFACE);
        };
        let end = byte_offset + dst.len();
        if end > mem.len() {
            return Err(DEV_NO_INTERFACE);
        }
        dst.copy_from_slice(&mem[byte_offset..end]);
        Ok(())
    }

    fn sync(&self) -> Result<(), i32> {
        Ok(())
    }

    fn init_kernels(&self, _source: &str) -> Result<(), i32> {
        Ok(())
    }

    fn run(
        &self,
        entry: &str,
        blocks: [i32; 3],
        threads: [i32; 3],
        _shared_bytes: usize,
        args: &[*mut u8],
    ) -> Result<(), i32> {
        let Some(kernel) = self.kernels.lock().get(entry).copied() else {
            return Err(DEV_UNKNOWN_KERNEL);
        };
        kernel(blocks, threads, args);
        Ok(())
    }
}

#[cfg(test)]
#[expect(clippy::unwrap_used, reason = "Tests use unwrap for brevity")]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    /// Device tests share the process context; serialize them.
    static DEVICE_TEST_LOCK: Mutex<()> = Mutex::new(());

    fn with_fresh_device<R>(setup: impl FnOnce(&MallocDevice), test: impl FnOnce() -> R) -> R {
        let _guard = DEVICE_TEST_LOCK.lock();
        weft_release();
        let device = MallocDevice::new();
        setup(&device);
        register_device(Box::new(device));
        let result = test();
        weft_release();
        result
    }

    #[test]
    fn copy_round_trip_clears_dirty_bits() {
        with_fresh_device(
            |_| {},
            || {
                let mut data: Vec<u16> = (0..32u16).collect();
                let mut buf = BufferT::dense(data.as_mut_ptr().cast(), &[32], 2);
                buf.host_dirty = true;

                assert_eq!(weft_copy_to_dev(&mut buf), DEV_SUCCESS);
                assert!(!buf.host_dirty);
                assert_ne!(buf.dev, 0);

                // Wipe the host side, pretend the device wrote.
                data.fill(0);
                buf.dev_dirty = true;
                assert_eq!(weft_copy_to_host(&mut buf), DEV_SUCCESS);
                assert!(!buf.dev_dirty);
                assert_eq!(data[5], 5);
                assert_eq!(data[31], 31);

                assert_eq!(weft_dev_free(&mut buf), DEV_SUCCESS);
                assert_eq!(buf.dev, 0);
            },
        );
    }

    #[test]
    fn clean_buffers_do_not_copy() {
        with_fresh_device(
            |_| {},
            || {
                let mut buf = BufferT::dense(std::ptr::null_mut(), &[8], 1);
                // Neither bit set: both directions are no-ops even with a
                // null host pointer.
                assert_eq!(weft_copy_to_dev(&mut buf), DEV_SUCCESS);
                assert_eq!(weft_copy_to_host(&mut buf), DEV_SUCCESS);
            },
        );
    }

    #[test]
    fn kernels_launch_by_name() {
        fn double_kernel(_blocks: [i32; 3], _threads: [i32; 3], args: &[*mut u8]) {
            let buf = unsafe { &mut *args[0].cast::<BufferT>() };
            let len = usize::try_from(buf.extent[0]).unwrap();
            let data = unsafe { std::slice::from_raw_parts_mut(buf.host.cast::<i32>(), len) };
            for v in data {
                *v *= 2;
            }
            buf.dev_dirty = true;
        }

        with_fresh_device(
            |device| device.register_kernel("double", double_kernel),
            || {
                let mut data: Vec<i32> = (0..16).collect();
                let mut buf = BufferT::dense(data.as_mut_ptr().cast(), &[16], 4);
                let mut args = [(&mut buf as *mut BufferT).cast::<u8>()];

                assert_eq!(weft_init_kernels(c"".as_ptr()), DEV_SUCCESS);
                let code = weft_dev_run(
                    c"double".as_ptr(),
                    1,
                    1,
                    1,
                    16,
                    1,
                    1,
                    0,
                    args.as_mut_ptr(),
                    1,
                );
                assert_eq!(code, DEV_SUCCESS);
                assert!(buf.dev_dirty);
                assert_eq!(data[3], 6);

                let missing = weft_dev_run(
                    c"nope".as_ptr(),
                    1,
                    1,
                    1,
                    1,
                    1,
                    1,
                    0,
                    std::ptr::null(),
                    0,
                );
                assert_eq!(missing, DEV_UNKNOWN_KERNEL);
            },
        );
    }

    #[test]
    fn no_backend_is_an_error() {
        with_fresh_device(
            |_| {},
            || {
                // Tear down and drop the registration.
                weft_release();
                *REGISTERED.lock() = None;
                assert_eq!(weft_dev_sync(), DEV_NO_INTERFACE);
            },
        );
    }
}
