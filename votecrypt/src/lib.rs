#[macro_use]
extern crate serde;

pub mod cipher;
mod ballot;
mod config;
mod election;
mod error;
mod keygen;
mod seal;
mod serde_decimal;
mod store;
mod tally;
mod wrap;

pub use ballot::*;
pub use config::*;
pub use election::*;
pub use error::*;
pub use keygen::*;
pub use seal::*;
pub use store::*;
pub use tally::*;
pub use wrap::*;

pub use num_bigint_dig::BigUint;
