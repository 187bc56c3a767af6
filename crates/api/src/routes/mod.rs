//! Route handlers

pub mod camera;
pub mod session;
