//! Readiness wait on the X11 socket
//!
//! The update loop drains the connection's event queue and, when it is empty,
//! parks here until the socket becomes readable or the idle timeout expires.
//! The timeout bounds how long a cancellation request can go unnoticed.

use std::os::unix::io::RawFd;
use std::time::Duration;

use anyhow::{Context, Result};

pub struct EventStream {
    poll: mio::Poll,
    events: mio::Events,
}

impl EventStream {
    /// Register the X11 file descriptor for read readiness
    pub fn new(fd: RawFd) -> Result<Self> {
        let poll = mio::Poll::new().context("Failed to create mio Poll")?;
        poll.registry()
            .register(
                &mut mio::unix::SourceFd(&fd),
                mio::Token(0),
                mio::Interest::READABLE,
            )
            .context("Failed to register X11 FD with mio")?;

        Ok(Self {
            poll,
            events: mio::Events::with_capacity(1),
        })
    }

    /// Block until the socket is readable or `timeout` passes
    ///
    /// Returns `true` when readiness was reported.
    pub fn wait_readable(&mut self, timeout: Duration) -> Result<bool> {
        match self.poll.poll(&mut self.events, Some(timeout)) {
            Ok(()) => Ok(self
                .events
                .iter()
                .any(|event| event.token() == mio::Token(0))),
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => Ok(false),
            Err(e) => Err(e).context("X11 socket poll failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::os::unix::io::AsRawFd;
    use std::os::unix::net::UnixStream;

    #[test]
    fn test_times_out_when_idle() {
        let (a, _b) = UnixStream::pair().unwrap();
        let mut stream = EventStream::new(a.as_raw_fd()).unwrap();
        assert!(!stream.wait_readable(Duration::from_millis(10)).unwrap());
    }

    #[test]
    fn test_reports_readable_socket() {
        let (a, mut b) = UnixStream::pair().unwrap();
        let mut stream = EventStream::new(a.as_raw_fd()).unwrap();
        b.write_all(b"x").unwrap();
        assert!(stream.wait_readable(Duration::from_secs(1)).unwrap());
    }
}
