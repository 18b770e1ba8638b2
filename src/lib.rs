//! Open Supervised Device Protocol (OSDP) engine.
//!
//! This crate implements the protocol-layer machinery shared by a Control
//! Panel (CP) and its Peripheral Devices (PDs): packet framing, the secure
//! channel cryptographic transform, the command/reply catalogue, and the
//! per-role state machines that drive an exchange to completion.
//!
//! The transport (serial/RS-485), the AES-128 primitive, the file-system
//! backing store for file transfers, and the application's own command/event
//! handling are all external collaborators, consumed through the traits in
//! [`channel`], [`crypto`] and [`file_transfer`]. This crate never owns a
//! socket, a UART, or an AES implementation.
//!
//! Callers drive a [`cp::Cp`] or [`pd::Pd`] instance by invoking `refresh()`
//! at least once every 50 ms; `refresh` never blocks.
#![no_std]
#![warn(rust_2018_idioms)]
#![warn(unused_qualifications)]

pub mod catalogue;
pub mod channel;
pub mod config;
pub mod cp;
pub mod crypto;
pub mod error;
pub mod file_transfer;
pub mod logging;
pub mod packet;
pub mod pd;
pub mod pd_model;
pub mod queue;
pub mod secure_channel;

pub use crate::channel::{Channel, ChannelId};
pub use crate::cp::Cp;
pub use crate::crypto::{BlockCipher, RandomSource};
pub use crate::error::Error;
pub use crate::file_transfer::FileOps;
pub use crate::pd::Pd;

/// Crate-wide `Result` alias; every fallible operation in this crate returns
/// a [`Error`] from the §7 taxonomy, never a bare `bool`/`i32`.
pub type Result<T> = core::result::Result<T, Error>;
