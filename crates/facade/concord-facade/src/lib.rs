//! Integration façade: the only crate that names every concrete
//! collaborator type, wiring security, consensus, voting, the detector,
//! the state machine, and the performance optimiser behind a handful of
//! named operations.

pub mod crypto;
pub mod error;
pub mod facade;
pub mod sink;
pub mod transport;

pub use crypto::CryptoBridge;
pub use error::FacadeError;
pub use facade::ConcordFacade;
pub use sink::{NoopReplicator, StateSink};
pub use transport::LocalTransport;
