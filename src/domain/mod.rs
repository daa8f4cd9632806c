pub mod account;
pub mod payment;
pub mod subscription;

pub use account::*;
pub use payment::*;
pub use subscription::*;
