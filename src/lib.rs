//! Crate used to interface with SD cards through an SDIO host peripheral
//! with a DMA data path
//!
//! The driver is written against the [`SdioPeripheral`] and [`DmaChannel`]
//! traits; implement them for the target's registers and hand both to
//! [`SdioHost::new`]. Every operation blocks until it completes.
//!
//! *currently in the alpha phase: works but missing important features. future
//! updates guarentee breaking changes.*

#![cfg_attr(not(test), no_std)]

pub mod command;
pub mod config;
pub mod errors;
mod init;
pub mod peripheral;
pub mod poll;
pub mod registers;
pub mod sdio;
pub mod shared;
pub mod stream;
mod transfer;

#[cfg(test)]
mod sim;

pub use command::{SdCmd, SdCmdResponse};
pub use config::Config;
pub use errors::SdioError;
pub use peripheral::{DmaChannel, SdioPeripheral};
pub use sdio::{CardVariant, InitState, SdCard, SdioHost};
pub use shared::SharedSdio;
pub use stream::SdStream;
pub use transfer::block_size_exp;
