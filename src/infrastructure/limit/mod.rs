//! Limit infrastructure - repository over the storage and cache ports

mod repository;

pub use repository::LimitRepository;
