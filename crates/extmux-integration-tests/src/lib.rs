//! End-to-end tests for ExtMux
//!
//! The tests under `tests/` run a multiplexer in front of real extension
//! dispatchers served over TCP, with instances "provisioned" in-process.
