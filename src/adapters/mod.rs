pub mod keeper_contract;
pub mod memory_store;
pub mod postgres;
pub mod price_feed;

pub use keeper_contract::ContractKeeperClient;
pub use memory_store::{InMemoryJobStore, StoreCall};
pub use postgres::PostgresJobStore;
pub use price_feed::{price_from_units, OraclePriceSource, StaticPriceSource};
