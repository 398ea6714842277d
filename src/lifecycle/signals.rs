//! OS termination signals.
//!
//! # Design Decisions
//! - Uses Tokio's signal handling (async-safe)
//! - SIGINT and SIGTERM both mean "leave Start"; nothing else is handled
//! - Signal streams live only for the duration of one wait and are dropped on return
//! - A listener that cannot be registered is logged and never fires

/// Wait for SIGINT or SIGTERM; returns the name of the signal received.
#[cfg(unix)]
pub async fn terminate() -> &'static str {
    use tokio::signal::unix::{signal, SignalKind};

    let mut term = match signal(SignalKind::terminate()) {
        Ok(stream) => stream,
        Err(e) => {
            tracing::warn!(error = %e, "Unable to listen for SIGTERM");
            return interrupt().await;
        }
    };

    tokio::select! {
        name = interrupt() => name,
        _ = term.recv() => "SIGTERM",
    }
}

#[cfg(not(unix))]
pub async fn terminate() -> &'static str {
    interrupt().await
}

async fn interrupt() -> &'static str {
    match tokio::signal::ctrl_c().await {
        Ok(()) => "SIGINT",
        Err(e) => {
            tracing::warn!(error = %e, "Unable to listen for SIGINT");
            std::future::pending().await
        }
    }
}
