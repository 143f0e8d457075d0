#![allow(dead_code)]

pub mod store;
pub use self::store::{Fault, MockStore};

use std::{str::FromStr, sync::LazyLock};
use tracing_subscriber::filter::LevelFilter;

pub static TRACER: LazyLock<()> = LazyLock::new(|| {
    let level = std::env::var("LOG_LEVEL")
        .map(|l| LevelFilter::from_str(l.as_str()).unwrap())
        .unwrap_or(LevelFilter::INFO);
    tracing_subscriber::fmt().with_max_level(level).init()
});

pub const MIB: usize = 1 << 20;

/// Deterministic test data that differs at every offset of a part.
pub fn data(len: usize) -> Vec<u8> {
    (0..len).map(|n| (n % 251) as u8).collect()
}
