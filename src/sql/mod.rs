pub mod build;
pub mod encode;

pub use build::{build, ReplicationStatement};
pub use encode::encode;
