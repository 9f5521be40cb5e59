//! Library side of the `sift` binary: filesystem access and log setup.
pub mod fs_apply;
pub mod logging;
