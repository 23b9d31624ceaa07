pub mod account;

pub use account::{AccountStore, PgAccountStore};
