//! Loopback integration tests: full server, real sockets.

use detserver::client::CamClient;
use detserver::config::Config;
use detserver::server::Server;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

const TIMEOUT: Duration = Duration::from_secs(5);

struct TestServer {
    addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    handle: JoinHandle<()>,
    dir: tempfile::TempDir,
}

impl TestServer {
    fn start() -> TestServer {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.port = 0;
        config.data_path = dir.path().to_path_buf();
        config.image_path = dir.path().to_path_buf();
        config.status_path = dir.path().join("cam_stat");
        let shutdown = Arc::new(AtomicBool::new(false));
        let mut server = Server::new(&config, Arc::clone(&shutdown)).unwrap();
        let port = server.local_addr().unwrap().port();
        let handle = thread::spawn(move || {
            server.run(false).unwrap();
        });
        TestServer {
            addr: SocketAddr::from(([127, 0, 0, 1], port)),
            shutdown,
            handle,
            dir,
        }
    }

    fn client(&self) -> CamClient {
        CamClient::connect(self.addr).unwrap()
    }

    fn stop(self) {
        self.shutdown.store(true, Ordering::SeqCst);
        self.handle.join().unwrap();
    }
}

#[test]
fn test_first_connection_takes_control() {
    let server = TestServer::start();
    let mut first = server.client();
    let frame = first.transact("ExpTime 2.5", TIMEOUT).unwrap();
    assert!(frame.ok, "{}", frame.text);
    assert_eq!(frame.text, "Exposure time set to: 2.500000 sec");

    let mut second = server.client();
    let frame = second.transact("ExpTime 5.0", TIMEOUT).unwrap();
    assert!(!frame.ok);
    assert_eq!(frame.code, 8);
    assert_eq!(frame.text, "access denied");

    // queries stay open to the second connection
    let frame = second.transact("ExpTime", TIMEOUT).unwrap();
    assert!(frame.ok);
    assert_eq!(frame.text, "Exposure time: 2.500000 sec");

    server.stop();
}

#[test]
fn test_kill_denied_for_non_controller() {
    let server = TestServer::start();
    let _first = server.client();
    // ensure the first connection is accepted before the second
    thread::sleep(Duration::from_millis(50));
    let mut second = server.client();
    let frame = second.transact("K", TIMEOUT).unwrap();
    assert_eq!(frame.code, 13);
    assert!(!frame.ok);
    assert_eq!(frame.text, "access denied");
    server.stop();
}

#[test]
fn test_exposure_over_the_wire() {
    let server = TestServer::start();
    let mut client = server.client();
    client.transact("ExpTime 0.05", TIMEOUT).unwrap();

    let started = Instant::now();
    let frame = client.transact("Exposure wire_test.img", TIMEOUT).unwrap();
    assert!(frame.ok, "{}", frame.text);
    assert_eq!(frame.code, 7);
    assert!(frame.text.ends_with("wire_test.img"));
    // the 50 ms exposure must complete in well under a second
    assert!(started.elapsed() < Duration::from_secs(1));

    // the writer thread finishes shortly after the reply
    let path = server.dir.path().join("wire_test.img");
    let deadline = Instant::now() + TIMEOUT;
    while !path.is_file() {
        assert!(Instant::now() < deadline, "image never written");
        thread::sleep(Duration::from_millis(5));
    }
    server.stop();
}

#[test]
fn test_numeric_command_form_on_wire() {
    let server = TestServer::start();
    thread::sleep(Duration::from_millis(50));
    let mut client = server.client();

    // bare numeric token with no argument
    let frame = client.transact("16", TIMEOUT).unwrap();
    assert!(frame.ok);
    assert_eq!(frame.code, 16);
    assert!(frame.text.starts_with("PID = "));

    // numeric token with argument, sub-second wait
    let started = Instant::now();
    let frame = client.transact("3 0.05", TIMEOUT).unwrap();
    assert!(frame.ok, "{}", frame.text);
    assert_eq!(frame.code, 3);
    assert!(frame.text.starts_with("wait finished"));
    assert!(started.elapsed() < Duration::from_secs(1));
    server.stop();
}

#[test]
fn test_concatenated_and_odd_terminators() {
    let server = TestServer::start();
    let mut client = server.client();

    // two messages in one segment, ^X-terminated like peer processes send
    client.send_line("Send one\x18Send two").unwrap();
    let a = client.read_frame(TIMEOUT).unwrap();
    let b = client.read_frame(TIMEOUT).unwrap();
    assert_eq!((a.code, a.text.as_str()), (15, "one"));
    assert_eq!((b.code, b.text.as_str()), (15, "two"));

    client.send_line("Send three\r").unwrap();
    let c = client.read_frame(TIMEOUT).unwrap();
    assert_eq!(c.text, "three");
    server.stop();
}

#[test]
fn test_unrecognized_command_tagged_code_one() {
    let server = TestServer::start();
    let mut client = server.client();
    let frame = client.transact("definitely_not_a_command", TIMEOUT).unwrap();
    assert_eq!(frame.code, 1);
    assert!(!frame.ok);
    assert!(frame.text.contains("Unrecognized command"));
    server.stop();
}

#[test]
fn test_abbreviated_commands_on_wire() {
    let server = TestServer::start();
    let mut client = server.client();
    let frame = client.transact("tel", TIMEOUT).unwrap();
    assert_eq!(frame.code, 18);
    assert!(frame.text.contains("Telemetry"));

    let frame = client.transact("Ex", TIMEOUT).unwrap();
    assert_eq!(frame.code, 1);
    assert!(frame.text.contains("Ambiguous"));
    server.stop();
}

#[test]
fn test_controller_reclaimed_after_disconnect() {
    let server = TestServer::start();
    let first = server.client();
    thread::sleep(Duration::from_millis(50));
    let mut second = server.client();

    let frame = second.transact("ExpTime 9", TIMEOUT).unwrap();
    assert!(!frame.ok);

    drop(first);

    // reclamation is asynchronous: a later connection takes the token
    let deadline = Instant::now() + TIMEOUT;
    loop {
        let mut probe = server.client();
        let frame = probe.transact("ExpTime 9", TIMEOUT).unwrap();
        if frame.ok {
            break;
        }
        assert!(Instant::now() < deadline, "control token never reclaimed");
        thread::sleep(Duration::from_millis(20));
    }
    server.stop();
}

#[test]
fn test_quit_closes_only_that_connection() {
    let server = TestServer::start();
    let mut first = server.client();
    thread::sleep(Duration::from_millis(50));
    let mut second = server.client();

    second.send_line("quit").unwrap();
    assert!(second.read_frame(Duration::from_millis(500)).is_err());

    let frame = first.transact("Send still here", TIMEOUT).unwrap();
    assert_eq!(frame.text, "still here");
    server.stop();
}

#[test]
fn test_status_word_during_exposure() {
    let server = TestServer::start();
    let mut client = server.client();
    client.transact("ExpTime 10", TIMEOUT).unwrap();
    client.send_line("Exposure long.img").unwrap();
    thread::sleep(Duration::from_millis(50));

    let mut observer = server.client();
    let frame = observer.transact("Status", TIMEOUT).unwrap();
    assert!(frame.ok);
    assert!(frame.text.contains("state=exposing"), "{}", frame.text);
    assert!(frame.text.contains("remaining="));

    let frame = observer.transact("K", TIMEOUT).unwrap();
    assert!(!frame.ok, "observer must not be able to kill");

    // the initiator gets the aborted-exposure ERR first, then the kill ack
    client.send_line("K").unwrap();
    let frame = client.read_frame(TIMEOUT).unwrap();
    assert_eq!(frame.code, 7);
    assert!(!frame.ok);
    assert_eq!(frame.text, "exposure killed");
    let frame = client.read_frame(TIMEOUT).unwrap();
    assert_eq!(frame.code, 13);
    assert!(frame.ok);
    server.stop();
}

#[test]
fn test_startup_file_runs_before_accepting() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("boot.cmd"), "ExpTime 7.5\n").unwrap();
    let mut config = Config::default();
    config.port = 0;
    config.data_path = dir.path().to_path_buf();
    config.image_path = dir.path().to_path_buf();
    config.status_path = dir.path().join("cam_stat");
    config.startup_file = Some(dir.path().join("boot.cmd"));

    let shutdown = Arc::new(AtomicBool::new(false));
    let mut server = Server::new(&config, Arc::clone(&shutdown)).unwrap();
    let port = server.local_addr().unwrap().port();
    let handle = thread::spawn(move || {
        server.run(false).unwrap();
    });

    let mut client = CamClient::connect(("127.0.0.1", port)).unwrap();
    let frame = client.transact("ExpTime", TIMEOUT).unwrap();
    assert_eq!(frame.text, "Exposure time: 7.500000 sec");

    shutdown.store(true, Ordering::SeqCst);
    handle.join().unwrap();
}
