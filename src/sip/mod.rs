pub mod address;
pub mod message;
pub mod server;
pub use address::{Address, Uri};
pub use message::{Header, HeadersExt, Method, Request, Response};
pub use server::{SipClient, SipServer};

#[cfg(test)]
pub mod tests;
