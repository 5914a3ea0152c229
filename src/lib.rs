pub mod batch;
pub mod config;
pub mod damage;
pub mod engine;
pub mod error;
pub mod events;
pub mod guard;
pub mod ledger;
pub mod params;
pub mod payout;
pub mod policy;
pub mod signals;
pub mod synthetic;
pub mod trigger;
pub mod types;
