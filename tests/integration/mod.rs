//! Integration tests: one component at a time against a wiremock org

mod config_tests;
mod orchestrator_tests;
mod transport_tests;
