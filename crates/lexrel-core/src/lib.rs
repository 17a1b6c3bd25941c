pub mod aggregate;
pub mod client;
pub mod error;
pub mod lead;
pub mod normalize;
pub mod pipeline;
pub mod recommend;
pub mod score_math;
pub mod summary;

pub use aggregate::*;
pub use client::*;
pub use error::EngineError;
pub use lead::*;
pub use pipeline::*;
pub use recommend::*;
pub use score_math::*;
pub use summary::*;
