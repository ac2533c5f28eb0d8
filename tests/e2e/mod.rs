//! End-to-end flows against a wiremock org

mod scenarios;
