//! Process-level coordination: signal handling and ordered shutdown

pub mod shutdown;

pub use shutdown::{
    install_signal_handlers, GracefulShutdown, ShutdownError, ShutdownPhase, ShutdownSignal,
};
