#![cfg_attr(not(feature = "std"), no_std, no_main)]

extern crate alloc;

pub type DrawNumber = u32;
pub type Number = u16;
pub type TicketId = [u8; 32];
pub type DeviceId = alloc::string::String;
pub type Timestamp = u64;
pub type ClientSeq = u64;
pub type LedgerSeq = u64;
pub type Balance = u64;

pub mod codec;
pub mod config;
pub mod error;
pub mod prize_table;
pub mod types;

// locks, threads and the system clock
#[cfg(feature = "std")]
pub mod authorization;
#[cfg(feature = "std")]
pub mod draw;
#[cfg(feature = "std")]
pub mod ledger;
#[cfg(feature = "std")]
pub mod reconciliation;
#[cfg(feature = "std")]
pub mod store;
