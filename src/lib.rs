//! Bakebook - daily bakery production and distribution ledger.
//!
//! Tracks a fixed catalog of bakery SKUs across ten sale locations: admins
//! maintain the per-location order grid, workers submit daily sale sheets,
//! and the reconciliation engine keeps the two consistent while carrying
//! tray remainders into the next calendar day. Persistence is a local
//! SQLite database; there is no network boundary in the core.

pub mod catalog;
pub mod dates;
pub mod db;
pub mod error;
pub mod location;
pub mod main_table;
pub mod rates;
pub mod reconcile;
pub mod reports;
pub mod submissions;
pub mod users;

pub use db::{init, DbState};
pub use error::{Error, Result};
pub use location::Location;
