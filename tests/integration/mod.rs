//! Integration tests for Rapid Texter LAN
//!
//! Most scenarios run several room controllers on an in-memory network
//! with a manual clock; `socket_test` drives real nodes over loopback.

mod harness;

mod discovery_flow_test;
mod race_test;
mod room_test;
mod socket_test;
