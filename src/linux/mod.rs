//! Linux specific glue, mostly the TAP device.

pub mod dev;
pub mod libc;
