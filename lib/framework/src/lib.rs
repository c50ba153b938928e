pub mod context;
pub mod discovery;
pub mod http;
pub mod tls;
pub mod trace;

pub use context::{Context, ContextError};

#[macro_use]
extern crate tracing;

/// The basic error type, dynamically dispatched and safe to send across threads
pub type Error = Box<dyn std::error::Error + Send + Sync + 'static>;

/// The basic result type, defined in terms of [`Error`] and generic over `T`
pub type Result<T> = std::result::Result<T, Error>;

/// Value of the `User-Agent` header sent by [`http::HttpClient`].
pub const USER_AGENT: &str = concat!("triton-sd/", env!("CARGO_PKG_VERSION"));
