#![forbid(unsafe_code)]

pub mod cli;
pub mod config;
pub mod crawl;
pub mod detect;
pub mod gateway;
pub mod health;
pub mod ledger;
pub mod logging;
pub mod scrape;
pub mod sections;
pub mod sitemap;
pub mod stats;
pub mod timestamp;
pub mod update;
pub mod urls;
pub mod writer;
