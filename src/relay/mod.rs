//! Challenge-bypass scrape relay
//!
//! A fixed-size pool of proxy-bound scraper sessions, grown by [`Bootstrap`] from
//! pool-service candidates and pruned by the [`Dispatcher`] as sessions get blocked.

pub mod account;
pub mod bootstrap;
pub mod candidates;
pub mod dispatcher;
pub mod scraper_pool;
pub mod session;

pub use account::{AccountSnapshot, ErrorAccount};
pub use bootstrap::{Bootstrap, BootstrapConfig};
pub use candidates::{CandidateSource, PoolServiceClient};
pub use dispatcher::{Dispatcher, DispatcherConfig, ScrapeRequest, ScrapeResponse};
pub use scraper_pool::ScraperPool;
pub use session::{FetchedPage, HttpScraperSession, HttpSessionFactory, ScraperSession, SessionFactory};
