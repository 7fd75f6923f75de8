//! Integration tests for the scrape pipeline, the TCP session and the HTTP exposition

#[path = "integration/helpers.rs"]
mod helpers;

#[path = "integration/scrape_pipeline.rs"]
mod scrape_pipeline;

#[path = "integration/tcp_session.rs"]
mod tcp_session;

#[path = "integration/api_endpoints.rs"]
mod api_endpoints;
