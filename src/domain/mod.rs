pub mod access;
pub mod buddy;
pub mod lending;
pub mod models;
pub mod ports;

pub use access::Access;
pub use buddy::{BuddyService, SendOutcome};
pub use lending::LendingService;
pub use ports::{
    AccessStore, BuddyStore, CoreStore, LendingStore, StoreError, StoreResult, UserDirectory,
};
