#![allow(dead_code)]

pub mod polling;
pub mod session_guard;
