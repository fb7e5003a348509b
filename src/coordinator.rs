//! Master/secondary coordination for multi-computer detectors
//!
//! Large detectors are split into banks of module rows, one computer per
//! bank. The master keeps a persistent socket to each secondary and relays
//! detector-affecting commands before executing them locally. Relay policy
//! is per command:
//!
//! - skip: local-only commands never leave the master
//! - fire-and-forget: sent without waiting (historically unacknowledged
//!   commands; MenU prints to the remote console and answers nothing)
//! - acknowledged: wait for the secondary's 0x18-terminated frame, with a
//!   timeout sized to the command (exposure family waits out the exposure
//!   itself plus slack; everything else gets a fixed allowance)
//!
//! A dead or slow secondary is counted and reported once per relay; delivery
//! to the remaining secondaries always continues.

use crate::command::{CmdCode, Command};
use crate::protocol::{split_frames, Frame};
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::os::fd::AsFd;
use std::path::Path;
use std::time::{Duration, Instant};

/// Slack added to the exposure time when waiting for exposure-family acks
const EXPOSURE_ACK_SLACK: Duration = Duration::from_secs(2);
/// Ack allowance for everything else (ResetCam can be slow)
const DEFAULT_ACK_TIMEOUT: Duration = Duration::from_secs(7);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// What the relay decided about one command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Policy {
    Skip,
    Fire,
    Acked(Duration),
}

fn policy_for(code: CmdCode, exposure_seconds: f64) -> Policy {
    use CmdCode::*;
    let exposure_ack =
        Policy::Acked(EXPOSURE_ACK_SLACK + Duration::from_secs_f64(exposure_seconds.max(0.0)));
    match code {
        Exposure | ExpEnd | ExpTime | Stop => exposure_ack,
        NImages | ExpPeriod | ExtEnable | ShutterEnable | ResetCam | ReadSetup | Trim | Cpix
        | CpixX => Policy::Acked(DEFAULT_ACK_TIMEOUT),
        // K races the deferred exposure reply on the secondary, so it
        // cannot be acknowledged cleanly; urgency wins
        K | Menu | ImgOnly => Policy::Fire,
        // ExiT/QuiT stay local; the supervisor broadcasts an exit via
        // relay_shutdown only when this server actually stops
        _ => Policy::Skip,
    }
}

/// True for commands whose argument is an image filename
fn carries_filename(code: CmdCode) -> bool {
    matches!(
        code,
        CmdCode::Exposure | CmdCode::ExpEnd | CmdCode::ImgOnly
    )
}

/// Prefix an image filename with the bank letter for `computer`:
/// `frame.img` on computer 1 becomes `B_frame.img`.
pub fn prefix_filename(argument: &str, computer: usize) -> String {
    if argument.is_empty() {
        return String::new();
    }
    let letter = (b'A' + (computer % 26) as u8) as char;
    let path = Path::new(argument);
    match path.file_name().and_then(|n| n.to_str()) {
        Some(name) => {
            let prefixed = format!("{}_{}", letter, name);
            path.with_file_name(prefixed).display().to_string()
        }
        None => argument.to_string(),
    }
}

/// Outcome of one relay pass
#[derive(Debug)]
pub struct RelayReport {
    /// Secondaries the command was sent to
    pub attempted: usize,
    /// Dead, timed out, or ERR-acking secondaries
    pub failures: usize,
    /// Argument for local execution; `None` means the command belongs
    /// entirely to a secondary bank
    pub local_argument: Option<String>,
}

impl RelayReport {
    fn local_only(argument: String) -> Self {
        RelayReport {
            attempted: 0,
            failures: 0,
            local_argument: Some(argument),
        }
    }
}

struct Link {
    addr: String,
    /// Bank index of this secondary (1-based; the master is 0)
    computer: usize,
    stream: Option<TcpStream>,
}

impl Link {
    fn connect(&mut self) -> std::io::Result<&mut TcpStream> {
        if self.stream.is_none() {
            let addr = self
                .addr
                .to_socket_addrs()?
                .next()
                .ok_or_else(|| std::io::Error::other("unresolvable address"))?;
            let stream = TcpStream::connect_timeout(&addr, CONNECT_TIMEOUT)?;
            stream.set_nodelay(true)?;
            self.stream = Some(stream);
        }
        Ok(self.stream.as_mut().unwrap())
    }

    fn send_line(&mut self, line: &str) -> std::io::Result<()> {
        let result = (|| {
            let stream = self.connect()?;
            stream.write_all(line.as_bytes())?;
            stream.write_all(b"\n")
        })();
        if result.is_err() {
            self.stream = None;
        }
        result
    }

    /// Wait for one complete frame, discarding any stale bytes before it
    fn read_ack(&mut self, timeout: Duration) -> std::io::Result<Frame> {
        let deadline = Instant::now() + timeout;
        let mut pending: Vec<u8> = Vec::new();
        let result = (|| {
            let stream = self.stream.as_mut().ok_or_else(|| {
                std::io::Error::new(std::io::ErrorKind::NotConnected, "link down")
            })?;
            loop {
                let left = deadline.saturating_duration_since(Instant::now());
                if left.is_zero() {
                    return Err(std::io::Error::new(
                        std::io::ErrorKind::TimedOut,
                        "ack timeout",
                    ));
                }
                let millis = left.as_millis().min(u16::MAX as u128) as u16;
                let mut fds = [PollFd::new(stream.as_fd(), PollFlags::POLLIN)];
                let n = poll(&mut fds, PollTimeout::from(millis))
                    .map_err(|e| std::io::Error::from_raw_os_error(e as i32))?;
                if n == 0 {
                    continue;
                }
                let mut chunk = [0u8; 512];
                let read = stream.read(&mut chunk)?;
                if read == 0 {
                    return Err(std::io::Error::new(
                        std::io::ErrorKind::UnexpectedEof,
                        "secondary closed",
                    ));
                }
                pending.extend_from_slice(&chunk[..read]);
                let (frames, _) = split_frames(&pending);
                if let Some(frame) = frames.into_iter().next() {
                    return Ok(frame);
                }
            }
        })();
        if result.is_err() {
            self.stream = None;
        }
        result
    }
}

/// The master's view of its secondaries.
pub struct Coordinator {
    links: Vec<Link>,
    rows_per_computer: u32,
}

impl Coordinator {
    pub fn new(secondaries: &[String], rows_per_computer: u32) -> Coordinator {
        let links = secondaries
            .iter()
            .enumerate()
            .map(|(i, addr)| Link {
                addr: addr.clone(),
                computer: i + 1,
                stream: None,
            })
            .collect();
        Coordinator {
            links,
            rows_per_computer,
        }
    }

    pub fn secondaries(&self) -> usize {
        self.links.len()
    }

    /// Tell every secondary to exit. Sent without acks; the secondaries are
    /// shutting down and will not answer.
    pub fn relay_shutdown(&mut self) {
        for link in &mut self.links {
            let _ = link.send_line("ExiT");
        }
    }

    /// Relay `cmd` per its policy. Returns delivery counts and the argument
    /// the master should use for its own local execution.
    pub fn relay(&mut self, cmd: &Command, name: &str, exposure_seconds: f64) -> RelayReport {
        let policy = policy_for(cmd.code, exposure_seconds);
        if policy == Policy::Skip {
            return RelayReport::local_only(cmd.argument.clone());
        }

        // Pixel-addressed commands go to exactly the bank owning the row
        if matches!(cmd.code, CmdCode::Cpix | CmdCode::CpixX) {
            return self.relay_pixel(cmd, name, policy);
        }

        let mut attempted = 0;
        let mut failures = 0;
        for link in &mut self.links {
            let argument = if carries_filename(cmd.code) {
                prefix_filename(&cmd.argument, link.computer)
            } else {
                cmd.argument.clone()
            };
            let line = if argument.is_empty() {
                name.to_string()
            } else {
                format!("{} {}", name, argument)
            };
            attempted += 1;
            if link.send_line(&line).is_err() {
                failures += 1;
                continue;
            }
            if let Policy::Acked(timeout) = policy {
                match link.read_ack(timeout) {
                    Ok(frame) if frame.ok => {}
                    _ => failures += 1,
                }
            }
        }

        let local_argument = if carries_filename(cmd.code) {
            prefix_filename(&cmd.argument, 0)
        } else {
            cmd.argument.clone()
        };
        RelayReport {
            attempted,
            failures,
            local_argument: Some(local_argument),
        }
    }

    /// Route a `x y` pixel command to the bank owning the global row,
    /// translating y into that bank's local coordinates.
    fn relay_pixel(&mut self, cmd: &Command, name: &str, policy: Policy) -> RelayReport {
        let (x, y) = match parse_pixel(&cmd.argument) {
            Some(pair) => pair,
            None => return RelayReport::local_only(cmd.argument.clone()),
        };
        if self.rows_per_computer == 0 {
            return RelayReport::local_only(cmd.argument.clone());
        }
        let computer = (y / self.rows_per_computer) as usize;
        let local_y = y % self.rows_per_computer;
        let translated = format!("{} {}", x, local_y);

        if computer == 0 {
            return RelayReport::local_only(translated);
        }

        let mut failures = 0;
        let mut attempted = 0;
        if let Some(link) = self.links.iter_mut().find(|l| l.computer == computer) {
            attempted = 1;
            let line = format!("{} {}", name, translated);
            if link.send_line(&line).is_err() {
                failures = 1;
            } else if let Policy::Acked(timeout) = policy {
                match link.read_ack(timeout) {
                    Ok(frame) if frame.ok => {}
                    _ => failures = 1,
                }
            }
        } else {
            failures = 1;
        }
        RelayReport {
            attempted,
            failures,
            local_argument: None,
        }
    }
}

fn parse_pixel(argument: &str) -> Option<(u32, u32)> {
    let mut it = argument.split_whitespace();
    let x = it.next()?.parse().ok()?;
    let y = it.next()?.parse().ok()?;
    Some((x, y))
}
