pub mod frame;
pub mod ingest;

// the client's ephemeral socket is a unix datagram socket
#[cfg(target_family = "unix")]
pub mod client;
