//! Support library for the `genq-runner` daemon.

pub mod history;
