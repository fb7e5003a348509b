//! Thin wire-protocol client
//!
//! Speaks the command protocol for tests and the binary's one-shot mode:
//! send a text line, collect 0x18-terminated frames. Not a general client
//! library; beamline software has its own.

use crate::protocol::{Frame, FRAME_SENTINEL};
use std::io::{self, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};

pub struct CamClient {
    stream: TcpStream,
    pending: Vec<u8>,
}

impl CamClient {
    pub fn connect<A: ToSocketAddrs>(addr: A) -> io::Result<CamClient> {
        let stream = TcpStream::connect(addr)?;
        stream.set_nodelay(true)?;
        Ok(CamClient {
            stream,
            pending: Vec::new(),
        })
    }

    /// Send one command line
    pub fn send_line(&mut self, line: &str) -> io::Result<()> {
        self.stream.write_all(line.as_bytes())?;
        self.stream.write_all(b"\n")
    }

    /// Wait for the next complete frame
    pub fn read_frame(&mut self, timeout: Duration) -> io::Result<Frame> {
        let deadline = Instant::now() + timeout;
        loop {
            // consume up to the first sentinel; later frames stay pending
            if let Some(end) = self.pending.iter().position(|&b| b == FRAME_SENTINEL) {
                let chunk: Vec<u8> = self.pending.drain(..=end).collect();
                let text = String::from_utf8_lossy(&chunk[..chunk.len() - 1]);
                match Frame::parse(&text) {
                    Some(frame) => return Ok(frame),
                    None => continue, // malformed frame, skip it
                }
            }

            let left = deadline.saturating_duration_since(Instant::now());
            if left.is_zero() {
                return Err(io::Error::new(io::ErrorKind::TimedOut, "no frame"));
            }
            self.stream.set_read_timeout(Some(left))?;
            let mut chunk = [0u8; 1024];
            match self.stream.read(&mut chunk) {
                Ok(0) => {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "server closed",
                    ))
                }
                Ok(n) => self.pending.extend_from_slice(&chunk[..n]),
                Err(e)
                    if e.kind() == io::ErrorKind::WouldBlock
                        || e.kind() == io::ErrorKind::TimedOut =>
                {
                    return Err(io::Error::new(io::ErrorKind::TimedOut, "no frame"))
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Send a line and wait for its response frame
    pub fn transact(&mut self, line: &str, timeout: Duration) -> io::Result<Frame> {
        self.send_line(line)?;
        self.read_frame(timeout)
    }
}
