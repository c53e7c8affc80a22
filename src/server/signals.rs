//! OS signal handling.
//!
//! [`listen_for_signals`] registers the handlers immediately and keeps them
//! for the rest of the process, so a signal never falls back to the default
//! action once the monitor has started. Each signal becomes one request on
//! a [`Shutdown`] handle:
//!
//! - the first request ends idle serving (a request made while tasks are
//!   still running is held until they finish)
//! - a second request interrupts the cleanup prompt
//!
//! ## Unix
//! SIGINT, SIGTERM and SIGQUIT are handled.
//!
//! ## Windows
//! Only Ctrl-C is handled.

use std::io;

use log::info;
use tokio::sync::watch;

/// Registered process signal streams.
pub struct ShutdownSignals {
    #[cfg(unix)]
    sigint: tokio::signal::unix::Signal,
    #[cfg(unix)]
    sigterm: tokio::signal::unix::Signal,
    #[cfg(unix)]
    sigquit: tokio::signal::unix::Signal,
    #[cfg(not(unix))]
    ctrl_c: tokio::signal::windows::CtrlC,
}

impl ShutdownSignals {
    /// Registers the handlers. Must be called from within a tokio runtime.
    #[cfg(unix)]
    pub fn install() -> io::Result<Self> {
        use tokio::signal::unix::{signal, SignalKind};

        Ok(Self {
            sigint: signal(SignalKind::interrupt())?,
            sigterm: signal(SignalKind::terminate())?,
            sigquit: signal(SignalKind::quit())?,
        })
    }

    /// Registers the handlers. Must be called from within a tokio runtime.
    #[cfg(not(unix))]
    pub fn install() -> io::Result<Self> {
        Ok(Self {
            ctrl_c: tokio::signal::windows::ctrl_c()?,
        })
    }

    /// Waits for the next signal and returns its name.
    ///
    /// Returns `None` once no more signals can be received.
    #[cfg(unix)]
    pub async fn recv(&mut self) -> Option<&'static str> {
        tokio::select! {
            s = self.sigint.recv()  => s.map(|_| "SIGINT"),
            s = self.sigterm.recv() => s.map(|_| "SIGTERM"),
            s = self.sigquit.recv() => s.map(|_| "SIGQUIT"),
        }
    }

    /// Waits for the next signal and returns its name.
    ///
    /// Returns `None` once no more signals can be received.
    #[cfg(not(unix))]
    pub async fn recv(&mut self) -> Option<&'static str> {
        self.ctrl_c.recv().await.map(|_| "Ctrl-C")
    }
}

/// Sending side of a [`Shutdown`] handle.
#[derive(Debug)]
pub struct ShutdownTrigger {
    requests: watch::Sender<u32>,
}

impl ShutdownTrigger {
    /// Records one shutdown request.
    pub fn trigger(&self) {
        self.requests.send_modify(|n| *n = n.saturating_add(1));
    }
}

/// Counted shutdown requests, consumed one at a time.
#[derive(Debug, Clone)]
pub struct Shutdown {
    requests: watch::Receiver<u32>,
    seen: u32,
}

impl Shutdown {
    /// Creates a handle fed by the returned trigger.
    pub fn channel() -> (ShutdownTrigger, Shutdown) {
        let (tx, rx) = watch::channel(0);
        (
            ShutdownTrigger { requests: tx },
            Shutdown {
                requests: rx,
                seen: 0,
            },
        )
    }

    /// Whether a request is waiting to be consumed.
    pub fn is_requested(&self) -> bool {
        *self.requests.borrow() > self.seen
    }

    /// Waits for the next unconsumed request and consumes it.
    ///
    /// Never completes if the trigger is dropped without a pending request.
    pub async fn requested(&mut self) {
        let seen = self.seen;
        let arrived = self.requests.wait_for(|n| *n > seen).await.is_ok();
        if !arrived {
            std::future::pending::<()>().await;
        }
        self.seen = seen + 1;
    }
}

/// Installs the OS handlers now and forwards every signal as a request.
///
/// Must be called from within a tokio runtime.
pub fn listen_for_signals() -> io::Result<Shutdown> {
    let mut signals = ShutdownSignals::install()?;
    let (trigger, shutdown) = Shutdown::channel();

    tokio::spawn(async move {
        while let Some(name) = signals.recv().await {
            info!("Received {}", name);
            trigger.trigger();
        }
    });

    Ok(shutdown)
}
