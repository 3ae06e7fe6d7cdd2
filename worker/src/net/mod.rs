mod client;

pub use client::{PsClient, Received};
