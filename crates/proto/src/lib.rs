pub mod session;
pub mod wire;

#[cfg(test)]
mod tests;

pub use session::{Channel, DebugSession};
pub use wire::{Command, StateFrame, WireError, FRAME_LEN};

use faultline_core::{Debugger, HandlerRole};
use std::net::TcpListener;

/// Wire a channel into a debugger: the session becomes the stop sink and
/// the step-engine handler, and stepping is armed so the very first fetch
/// reports an initial stop before any target instruction runs.
pub fn attach_session<C: Channel + 'static>(debugger: &mut Debugger, chan: C) {
    debugger.install();
    debugger.step.install_handler(HandlerRole::Session);
    debugger.attach_sink(Box::new(DebugSession::new(chan)));
    debugger.step.enable(&mut debugger.machine.dbg);
}

pub struct SessionServer {
    port: u16,
}

impl SessionServer {
    pub fn new(port: u16) -> Self {
        Self { port }
    }

    /// Accept one host connection and drive the target under its control.
    pub fn run(&self, mut debugger: Debugger) -> anyhow::Result<()> {
        let listener = TcpListener::bind(format!("0.0.0.0:{}", self.port))?;
        tracing::info!("debug session listening on 0.0.0.0:{}", self.port);

        let (stream, addr) = listener.accept()?;
        tracing::info!("host connected from {}", addr);

        attach_session(&mut debugger, stream);
        match debugger.run(None) {
            Ok(reason) => tracing::info!("target stopped: {:?}", reason),
            Err(e) => tracing::error!("debug session error: {:?}", e),
        }

        Ok(())
    }
}
