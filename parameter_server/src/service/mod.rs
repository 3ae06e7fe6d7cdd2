mod builder;
mod pserver;
mod server;
mod session;

pub use builder::ServerBuilder;
pub use pserver::ParameterServer;
pub use server::Server;
pub use session::Session;

use std::io;

use comms::msg::Msg;
use machine_learning::MlErr;

/// Creates an error for when an unexpected message kind is received.
///
/// # Arguments
/// * `msg` - The received message.
///
/// # Returns
/// An error.
fn unexpected_message_kind<U>(msg: Msg) -> io::Result<U> {
    Err(io::Error::new(
        io::ErrorKind::InvalidData,
        format!("Received an unexpected message kind, got: {}", msg.kind()),
    ))
}

/// Maps a storage error into the io error of a session.
fn invalid_data(err: MlErr) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, err)
}
