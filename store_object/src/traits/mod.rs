//! Traits for remote store access
//!
//! This module contains the contract every remote relational store backend
//! implements.

pub mod remote_store;

pub use remote_store::{
    ChangeChannel, ChannelCloser, ReadRequest, RemoteStore, WriteOperation, WriteRequest,
};
