pub mod http;
mod socket;
pub mod temp;
pub mod tls;

// re-export
pub use socket::{next_addr, next_addr_for_ip};
