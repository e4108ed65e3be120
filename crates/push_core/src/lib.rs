pub mod actions;
pub mod call_verifier;
pub mod dispatcher;

pub use actions::{
    main_thread, InlineExecutor, MainThreadExecutor, MainThreadQueue, NotificationSink,
    UiBridge, UiExecutor,
};
pub use call_verifier::{
    verify_locally, verify_remotely, CallVerifier, Clock, SystemClock, VerificationStrategy,
    CALL_VALIDITY_WINDOW, DEFAULT_REMOTE_TIMEOUT,
};
pub use dispatcher::{classify, Dispatched, Dispatcher, Intent};

#[cfg(test)]
#[path = "tests/test_support.rs"]
pub(crate) mod test_support;
