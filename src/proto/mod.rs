//! Wire messages for the calculator and greet services.
//!
//! The messages are protobuf (proto3) encoded with `prost`; field numbers match the service
//! definitions the clients of this server were built against.

pub mod calculator;
pub mod greet;
