//! vstream - frame-paced streaming over lossy UDP
//!
//! A streamer emits fixed-size frames at a target rate; a client
//! reassembles them, plays them out on its own clock, requests missing
//! packets and throttles the streamer with PAUSE/RESUME.

pub use vstream_io as io;
pub use vstream_protocol as protocol;

// Re-export commonly used types
pub use io::{Runtime, Simulation, StreamSocket};
pub use protocol::{Client, ClientConfig, Endpoint, Streamer, StreamerConfig};
