#[macro_use]
extern crate serde;

#[macro_use]
extern crate log;

mod board;
mod cast;
mod ceremony;
mod clock;
mod ecies;
mod election;
mod engine;
mod error;
mod ledger;
mod projection;
mod retry;
mod scheme;
mod serde_hex;
mod settings;
mod state;
mod tally;
mod token;
mod trustee;

pub use board::*;
pub use cast::*;
pub use ceremony::*;
pub use clock::*;
pub use ecies::{EncryptionKey, EncryptionSecret};
pub use election::*;
pub use engine::*;
pub use error::*;
pub use ledger::*;
pub use projection::*;
pub use retry::*;
pub use scheme::*;
pub use settings::*;
pub use state::*;
pub use tally::*;
pub use token::*;
pub use trustee::*;

#[cfg(test)]
mod testing;
