//! End-to-end tests of `crypto-relay` live in `tests/`
