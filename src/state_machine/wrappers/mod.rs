//! Wrappers that let a [`StateMachine`](super::StateMachine) receive system resources, such as
//! the current time, as ordinary input instead of reading them itself.

pub mod input;
