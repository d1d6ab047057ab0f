pub mod keeper_service;

pub use keeper_service::{shutdown_signal, KeeperService};
