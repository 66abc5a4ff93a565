//! Functional tests against a scripted broker

#[path = "../common/mod.rs"]
mod common;

mod monitor_test;
