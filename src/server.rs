//! Connection supervisor
//!
//! One listener, one worker thread per accepted connection, one dispatch
//! loop. Workers only move bytes: they poll their socket at the tick
//! interval, deframe inbound messages, and forward each line over the shared
//! event channel; outbound frames come back over a per-worker outbox. All
//! detector state lives in the dispatch loop, which waits on the channel
//! with the tick interval as its timeout so the exposure timer is serviced
//! every cycle whether or not traffic arrives.
//!
//! The first connection takes the control token. When the controlling
//! worker's socket dies its exit arrives as a Disconnected event and the
//! token is reclaimed; the next connection to arrive picks it up.

use crate::config::Config;
use crate::coordinator::Coordinator;
use crate::dispatch::{Caller, Dispatcher, Outcome, WorkerId};
use crate::hardware::{Detector, SimDetector, WriterPool};
use crate::protocol::{deframe, ResponseBuffer};
use crate::status::StatusStore;
use anyhow::{Context, Result};
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use std::collections::HashMap;
use std::io::{BufRead, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::os::fd::AsFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Tick interval; bounds exposure-timer resolution
const POLL_INTERVAL: Duration = Duration::from_millis(1);

enum Event {
    Line { worker: WorkerId, line: String },
    ConsoleLine(String),
    Disconnected(WorkerId),
}

struct WorkerHandle {
    outbox: Sender<Vec<u8>>,
    quit: Arc<AtomicBool>,
    buffer: ResponseBuffer,
    peer: SocketAddr,
}

pub struct Server {
    listener: TcpListener,
    dispatcher: Dispatcher,
    pool: WriterPool,
    events_tx: Sender<Event>,
    events_rx: Receiver<Event>,
    workers: HashMap<WorkerId, WorkerHandle>,
    next_id: WorkerId,
    shutdown: Arc<AtomicBool>,
    startup_file: Option<std::path::PathBuf>,
}

impl Server {
    /// Bind on the configured port with a simulated detector.
    pub fn new(config: &Config, shutdown: Arc<AtomicBool>) -> Result<Server> {
        let pool = WriterPool::new(config.max_writers);
        let detector = Box::new(SimDetector::new(pool.clone()));
        Server::with_detector(config, detector, pool, shutdown)
    }

    /// Bind with a caller-supplied detector adapter.
    pub fn with_detector(
        config: &Config,
        detector: Box<dyn Detector>,
        pool: WriterPool,
        shutdown: Arc<AtomicBool>,
    ) -> Result<Server> {
        let listener = TcpListener::bind(("0.0.0.0", config.port))
            .with_context(|| format!("binding port {}", config.port))?;
        listener
            .set_nonblocking(true)
            .context("setting listener non-blocking")?;

        let status = StatusStore::open(&config.status_path)
            .with_context(|| format!("opening status store {}", config.status_path.display()))?;
        let coordinator = if config.is_master() {
            Some(Coordinator::new(
                &config.secondaries,
                config.rows_per_computer,
            ))
        } else {
            None
        };
        let dispatcher = Dispatcher::new(config, detector, status, coordinator);

        let (events_tx, events_rx) = mpsc::channel();
        Ok(Server {
            listener,
            dispatcher,
            pool,
            events_tx,
            events_rx,
            workers: HashMap::new(),
            next_id: 1,
            shutdown,
            startup_file: config.startup_file.clone(),
        })
    }

    /// Actual bound address (port 0 in tests resolves here)
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Run until console quit, SIGINT/SIGTERM, or listener failure.
    /// `console` attaches stdin as the operator (master) input; tests
    /// leave it off.
    pub fn run(&mut self, console: bool) -> Result<()> {
        if let Some(file) = self.startup_file.take() {
            self.dispatcher.run_startup(&file);
        }
        if console {
            spawn_console(self.events_tx.clone());
        }
        log(&format!(
            "listening on {}",
            self.listener.local_addr()?
        ));

        loop {
            if self.shutdown.load(Ordering::SeqCst) {
                log("shutdown signal received");
                break;
            }
            self.accept_new();

            match self.events_rx.recv_timeout(POLL_INTERVAL) {
                Ok(event) => {
                    if self.handle_event(event) == Outcome::Shutdown {
                        break;
                    }
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }

            self.dispatcher.tick(Instant::now());
            self.flush_replies();
        }

        self.dispatcher.propagate_shutdown();
        self.shut_down_workers();
        if !self.pool.wait_idle(Duration::from_secs(10)) {
            log("image writers still busy at shutdown");
        }
        Ok(())
    }

    fn accept_new(&mut self) {
        loop {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    let id = self.next_id;
                    self.next_id += 1;
                    let (outbox_tx, outbox_rx) = mpsc::channel();
                    let quit = Arc::new(AtomicBool::new(false));
                    let handle = WorkerHandle {
                        outbox: outbox_tx,
                        quit: Arc::clone(&quit),
                        buffer: ResponseBuffer::new(),
                        peer,
                    };
                    self.workers.insert(id, handle);
                    spawn_worker(id, stream, self.events_tx.clone(), outbox_rx, quit);

                    if self.dispatcher.controller().is_none() {
                        self.dispatcher.set_controller(Some(id));
                        log(&format!("connection {} from {} takes control", id, peer));
                    } else {
                        log(&format!("connection {} from {}", id, peer));
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    eprintln!("*** accept failed: {}", e);
                    break;
                }
            }
        }
    }

    fn handle_event(&mut self, event: Event) -> Outcome {
        match event {
            Event::Line { worker, line } => {
                let outcome = self.dispatcher.handle_line(Caller::Worker(worker), &line);
                self.flush_replies();
                if outcome == Outcome::CloseCaller {
                    self.close_worker(worker);
                    return Outcome::Continue;
                }
                outcome
            }
            Event::ConsoleLine(line) => self.dispatcher.handle_line(Caller::Console, &line),
            Event::Disconnected(worker) => {
                if let Some(handle) = self.workers.remove(&worker) {
                    log(&format!("connection {} from {} closed", worker, handle.peer));
                }
                self.dispatcher.worker_disconnected(worker);
                Outcome::Continue
            }
        }
    }

    fn close_worker(&mut self, id: WorkerId) {
        if let Some(handle) = self.workers.get(&id) {
            handle.quit.store(true, Ordering::SeqCst);
        }
        // reclamation happens when the Disconnected event lands
    }

    /// Route queued frames into per-worker buffers, then hand each worker
    /// its batch in one write.
    fn flush_replies(&mut self) {
        for (worker, frame) in self.dispatcher.take_replies() {
            if let Some(handle) = self.workers.get_mut(&worker) {
                handle.buffer.push(&frame);
            }
            // frames for departed workers are dropped
        }
        for handle in self.workers.values_mut() {
            if !handle.buffer.is_empty() {
                let bytes = handle.buffer.take();
                let _ = handle.outbox.send(bytes);
            }
        }
    }

    fn shut_down_workers(&mut self) {
        for handle in self.workers.values() {
            handle.quit.store(true, Ordering::SeqCst);
        }
        self.workers.clear();
    }
}

/// Socket loop for one connection: poll for readability at the tick
/// interval, forward deframed lines, drain the outbox between polls.
fn spawn_worker(
    id: WorkerId,
    mut stream: TcpStream,
    events: Sender<Event>,
    outbox: Receiver<Vec<u8>>,
    quit: Arc<AtomicBool>,
) {
    thread::spawn(move || {
        let mut read_buf = [0u8; 4096];
        'conn: loop {
            if quit.load(Ordering::SeqCst) {
                break;
            }

            while let Ok(bytes) = outbox.try_recv() {
                if stream.write_all(&bytes).is_err() {
                    break 'conn;
                }
            }

            let mut fds = [PollFd::new(stream.as_fd(), PollFlags::POLLIN)];
            let ready = match poll(&mut fds, PollTimeout::from(1u8)) {
                Ok(n) => n,
                Err(nix::errno::Errno::EINTR) => continue,
                Err(_) => break,
            };
            if ready == 0 {
                continue;
            }

            match stream.read(&mut read_buf) {
                Ok(0) => break, // peer closed
                Ok(n) => {
                    for line in deframe(&read_buf[..n]) {
                        if events.send(Event::Line { worker: id, line }).is_err() {
                            break 'conn;
                        }
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {}
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
                Err(_) => break,
            }
        }
        let _ = events.send(Event::Disconnected(id));
    });
}

/// Stdin as the operator console; EOF detaches it without stopping the
/// server.
fn spawn_console(events: Sender<Event>) {
    thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let line = match line {
                Ok(l) => l,
                Err(_) => break,
            };
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            if events.send(Event::ConsoleLine(trimmed.to_string())).is_err() {
                break;
            }
        }
    });
}

fn log(msg: &str) {
    println!(
        "[{}] {}",
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
        msg
    );
}
