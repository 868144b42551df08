//! Library surface for the kernel binary, so integration tests can
//! build and drive a [`Kernel`] without going through `main`.

pub mod kernel;

pub use kernel::{default_gateway, Kernel};
