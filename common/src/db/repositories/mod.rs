// Postgres implementations of the store traits

pub mod catalog;
pub mod channel;
pub mod integration;
pub mod job;

pub use catalog::CatalogRepository;
pub use channel::ChannelRepository;
pub use integration::IntegrationRepository;
pub use job::JobRepository;
