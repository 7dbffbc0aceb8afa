//! HTTP service exposing the display job dispatcher.

pub mod server;
