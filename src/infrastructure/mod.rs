pub mod clock;
pub mod config;
pub mod payment_provider;
pub mod paystack;
pub mod postgres_payment_repo;
pub mod repository;

pub use clock::*;
pub use config::*;
pub use payment_provider::*;
pub use paystack::*;
pub use postgres_payment_repo::*;
pub use repository::*;
