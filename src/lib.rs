pub mod cache;
pub mod config;
pub mod delivery;
pub mod error;
pub mod fetch;
pub mod manager;
pub mod models;
pub mod parser;
pub mod resolver;
pub mod scheduler;
pub mod selector;
pub mod tracker;

pub use config::ResolverConfig;
pub use error::{ResolveError, VastError, VastErrorCode};
pub use manager::VastManager;
pub use parser::parse_vast;
pub use resolver::{resolve, CancellationFlag, ResolvedVideoAd, Resolver};
pub use scheduler::PlaybackTrackerScheduler;
