pub mod controller;
pub mod error;
pub mod relay;

pub use controller::{
    ControllerEvent, ControllerSettings, SubmissionController, SubmissionSnapshot,
    DEFAULT_REVERT_AFTER,
};
pub use error::{EditError, RelayError, SubmitError, ValidationError, TRANSPORT_FALLBACK_MESSAGE};
pub use relay::{HttpRelay, RelayTransport};
