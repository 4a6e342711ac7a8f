//! Content delivery infrastructure
//!
//! - Server: supervised static HTTP server for the content root
//! - Cast: cast session control via catt

pub mod cast;
pub mod server;

pub use cast::{CastClient, CastSessionController, CattClient};
pub use server::{ContentServerSupervisor, DockerServer, ServerBackend};
