//! Weft Runtime Library (`libweft_rt`)
//!
//! Runtime support for compiled Weft pipelines. Contains the C-ABI
//! entry points emitted code links against:
//!
//! - **Errors**: `weft_error`, `weft_set_error_handler`, `weft_print`
//! - **Time**: `weft_current_time_ns`
//! - **Memory**: `weft_malloc`, `weft_free`
//! - **Parallel loops**: `weft_do_par_for`
//! - **Device bridge**: `weft_dev_malloc`, `weft_dev_free`,
//!   `weft_copy_to_dev`, `weft_copy_to_host`, `weft_dev_sync`,
//!   `weft_dev_run`, `weft_init_kernels`, `weft_release`
//!
//! # Build Modes
//!
//! - **rlib**: for Rust consumers (the interpreter, tests)
//! - **staticlib**: for AOT linking (`libweft_rt.a`)
//!
//! # Safety
//!
//! The entry points use `#[no_mangle]` and `extern "C"`. Functions that
//! take raw pointers are called from emitted code which guarantees valid
//! pointers; they are not marked `unsafe` because they are ABI surface,
//! not Rust API.

#![allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_possible_wrap,
    clippy::cast_ptr_alignment,
    reason = "ABI code converts between C integer types; casts are intentional"
)]

mod alloc;
mod buffer;
mod device;
mod error;
mod parallel;
mod time;

pub use alloc::{weft_free, weft_malloc};
pub use buffer::BufferT;
pub use device::{
    register_device, weft_copy_to_dev, weft_copy_to_host, weft_dev_free, weft_dev_malloc,
    weft_dev_run, weft_dev_sync, weft_init_kernels, weft_release, DeviceInterface, HostKernel,
    MallocDevice, DEV_NO_INTERFACE, DEV_SUCCESS, DEV_UNKNOWN_KERNEL,
};
pub use error::{error, weft_error, weft_print, weft_set_error_handler, ErrorHandler};
pub use parallel::{weft_do_par_for, TaskFn};
pub use time::weft_current_time_ns;
