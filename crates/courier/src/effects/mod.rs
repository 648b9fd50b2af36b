//! Side effects: the transport seam, the task registry, sessions and
//! transfers.
//!
//! [`Transport`] is the only place bytes hit the network. Everything above it
//! talks to the transport through [`TaskRequest`]s going down and
//! [`TransportEvent`]s coming back up.

mod callback;
mod engine;
mod mock;
mod registry;
#[cfg(feature = "reqwest")]
mod reqwest_transport;
mod runtime;
mod session;
mod transfer;
mod transport;

pub use callback::{CallbackContext, CallbackQueue, DataStreamHandler, DestinationFn, ProgressHandler};
pub use engine::TransferPhase;
pub use mock::{MockResponse, MockTransport, Submission, SubmittedBody};
pub use registry::TaskRegistry;
#[cfg(feature = "reqwest")]
pub use reqwest_transport::ReqwestTransport;
pub use runtime::{dedicated_handle, handle};
pub use session::Session;
pub use transfer::{DataTransfer, DownloadTransfer, Downloadable, TransferHandle, Uploadable};
pub use transport::{
    BoxStream, Challenge, ChallengeDisposition, ChallengeKind, DownloadSource, EventSink, ResumeDataFuture,
    ServerTrustPolicy, StreamProvider, TaskRequest, Transport, TransportEvent, UploadBody, event_channel,
};
