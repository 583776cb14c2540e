pub mod dalle;
pub mod gateway;
pub mod media;
pub mod openai;
pub mod replicate;

pub use gateway::{GatewayError, HostedGateway};
