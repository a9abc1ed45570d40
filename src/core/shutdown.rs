//! # OS termination signals.
//!
//! [`wait_for_shutdown_signal`] resolves with the name of the first termination
//! signal the process receives, so the runtime can log what stopped it.
//!
//! | Platform | Signals |
//! |---|---|
//! | Unix | `SIGINT`, `SIGTERM`, `SIGQUIT` |
//! | other | Ctrl-C |

/// Waits for a termination signal and returns its name.
///
/// Listeners are installed per call. Fails only if they cannot be installed.
#[cfg(unix)]
pub(crate) async fn wait_for_shutdown_signal() -> std::io::Result<&'static str> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;
    let mut quit = signal(SignalKind::quit())?;

    let name = tokio::select! {
        _ = interrupt.recv() => "SIGINT",
        _ = terminate.recv() => "SIGTERM",
        _ = quit.recv() => "SIGQUIT",
    };
    Ok(name)
}

/// Waits for a termination signal and returns its name.
#[cfg(not(unix))]
pub(crate) async fn wait_for_shutdown_signal() -> std::io::Result<&'static str> {
    tokio::signal::ctrl_c().await?;
    Ok("ctrl-c")
}
