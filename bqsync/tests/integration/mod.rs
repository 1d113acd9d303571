#![cfg(feature = "test-utils")]

mod orchestrator_test;
mod postgres_test;
mod schedule_test;
mod writer_test;
