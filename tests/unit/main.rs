//! Unit tests for configuration and the request lifecycle
