//! Command dispatch
//!
//! One dispatcher instance owns the exposure state machine, the detector
//! adapter, the status store, and (on the master) the coordinator. All
//! command lines from every connection and the operator console funnel
//! through [`Dispatcher::handle_line`] on a single thread, so no handler
//! ever races another; workers only do socket I/O.
//!
//! Reply routing: most commands answer the caller immediately, but the
//! response to Exposure and CamWait is produced when the timer finishes and
//! goes to the recorded initiator, which may no longer be the controlling
//! connection by then.

use crate::command::{clean_argument, split_line, CmdCode, Command, CommandRegistry};
use crate::config::{expand_tilde, Config};
use crate::coordinator::Coordinator;
use crate::error::CamError;
use crate::exposure::{CamState, ExposureState};
use crate::hardware::{Detector, StopPriority};
use crate::protocol::Frame;
use crate::status::StatusStore;
use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

pub type WorkerId = u32;

/// Where a command line came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Caller {
    /// Operator console; always permitted, replies print locally
    Console,
    Worker(WorkerId),
}

/// What the supervisor should do after a line is handled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Continue,
    /// Close the calling connection (client ExiT/QuiT)
    CloseCaller,
    /// Shut the whole server down (console ExiT/QuiT)
    Shutdown,
}

/// Commands that mutate detector or server state need the control token.
/// Only the query forms (no argument) of ExpTime and the two paths are open
/// to all; HeaderString and ShutterEnable are gated even as queries.
fn requires_control(code: CmdCode, argument: &str) -> bool {
    use CmdCode::*;
    match code {
        // ExiT is privileged (it can take the server down); QuiT only
        // closes the caller's own connection
        Telemetry | Status | CamStatus | CamSetup | ShowPid | Send | Df | Menu | Quit => false,
        ExpTime | DataPath | ImgPath => !argument.is_empty(),
        _ => true,
    }
}

const ILLEGAL_PATH_CHARS: &[char] = &['*', '?', '<', '>', '|', ';', '&', '$', '`'];

pub struct Dispatcher {
    registry: CommandRegistry,
    exposure: ExposureState,
    detector: Box<dyn Detector>,
    status: StatusStore,
    coordinator: Option<Coordinator>,
    /// True on secondary-bank servers; a relayed ExiT then stops the server
    secondary: bool,
    controller: Option<WorkerId>,
    replies: Vec<(WorkerId, Frame)>,
    /// Highest-priority stop requested since the timer started
    pending_stop: Option<StopPriority>,
    exposure_seconds: f64,
    data_path: PathBuf,
    image_path: PathBuf,
    shutter_enabled: bool,
    header_string: Option<String>,
    /// Last published tenths-of-a-second remaining, to throttle status writes
    published_tenths: Option<u64>,
}

impl Dispatcher {
    pub fn new(
        config: &Config,
        detector: Box<dyn Detector>,
        status: StatusStore,
        coordinator: Option<Coordinator>,
    ) -> Dispatcher {
        Dispatcher {
            registry: CommandRegistry::new(),
            exposure: ExposureState::new(),
            detector,
            status,
            coordinator,
            secondary: config.this_computer > 0,
            controller: None,
            replies: Vec::new(),
            pending_stop: None,
            exposure_seconds: 1.0,
            data_path: config.data_path.clone(),
            image_path: config.image_path.clone(),
            shutter_enabled: config.shutter_enabled,
            header_string: None,
            published_tenths: None,
        }
    }

    pub fn controller(&self) -> Option<WorkerId> {
        self.controller
    }

    /// Hand the control token to a worker (or park it)
    pub fn set_controller(&mut self, id: Option<WorkerId>) {
        self.controller = id;
        match id {
            Some(w) => self.status.set("controller", w.to_string()),
            None => self.status.set("controller", "none"),
        }
    }

    /// A worker's socket died. Reclaims the control token and re-reads
    /// cached settings from the status store; a running timer is kept.
    pub fn worker_disconnected(&mut self, id: WorkerId) {
        if self.controller == Some(id) {
            self.log(&format!("controlling connection {} lost, reclaiming", id));
            self.set_controller(None);
            if let Some(secs) = self.status.get("exposure_time").and_then(|s| s.parse().ok()) {
                self.exposure_seconds = secs;
            }
            if let Some(p) = self.status.get("data_path") {
                self.data_path = PathBuf::from(p);
            }
            if let Some(p) = self.status.get("image_path") {
                self.image_path = PathBuf::from(p);
            }
        }
    }

    /// Frames queued for workers since the last call
    pub fn take_replies(&mut self) -> Vec<(WorkerId, Frame)> {
        std::mem::take(&mut self.replies)
    }

    /// Tell the secondaries to exit too; called once when this server
    /// stops, whatever triggered the stop.
    pub fn propagate_shutdown(&mut self) {
        if let Some(coord) = self.coordinator.as_mut() {
            coord.relay_shutdown();
        }
    }

    /// Run the startup command file, if configured
    pub fn run_startup(&mut self, file: &Path) {
        self.log(&format!("running startup file {}", file.display()));
        let line = format!("LdCmndFile {}", file.display());
        self.handle_line(Caller::Console, &line);
    }

    fn permitted(&self, caller: Caller) -> bool {
        match caller {
            Caller::Console => true,
            Caller::Worker(id) => self.controller == Some(id),
        }
    }

    fn push_reply(&mut self, to: Caller, frame: Frame) {
        match to {
            Caller::Console => {
                if frame.ok {
                    println!("{}", frame.text);
                } else {
                    println!("*** {}", frame.text);
                }
            }
            Caller::Worker(id) => self.replies.push((id, frame)),
        }
    }

    fn log(&self, msg: &str) {
        println!(
            "[{}] {}",
            chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
            msg
        );
    }

    /// Interpret one command line from `caller`.
    pub fn handle_line(&mut self, caller: Caller, line: &str) -> Outcome {
        let (token, raw) = split_line(line);
        let code = match self.registry.resolve(token) {
            Ok(code) => code,
            Err(e) => {
                self.push_reply(caller, Frame::err(CmdCode::CamCmd.wire(), e.to_string()));
                return Outcome::Continue;
            }
        };
        let argument = clean_argument(raw);

        if requires_control(code, &argument) && !self.permitted(caller) {
            self.push_reply(caller, Frame::err(code.wire(), "access denied"));
            return Outcome::Continue;
        }

        let mut cmd = Command {
            code,
            argument,
            wants_response: caller != Caller::Console,
        };

        // arguments rejected locally never reach the secondaries
        if matches!(code, CmdCode::Exposure | CmdCode::ImgOnly) && cmd.argument.is_empty() {
            self.push_reply(caller, Frame::err(code.wire(), "no image file name given"));
            return Outcome::Continue;
        }

        // Master relays to its secondaries before executing locally
        let name = self.registry.name_of(code);
        let exposure_seconds = self.exposure_seconds;
        if let Some(coord) = self.coordinator.as_mut() {
            let report = coord.relay(&cmd, name, exposure_seconds);
            if report.failures > 0 {
                self.push_reply(
                    caller,
                    Frame::err(
                        code.wire(),
                        format!("{} secondary computer(s) failed", report.failures),
                    ),
                );
            }
            match report.local_argument {
                Some(arg) => cmd.argument = arg,
                None => {
                    // the command belonged entirely to a secondary bank
                    if report.failures == 0 {
                        self.push_reply(caller, Frame::ok(code.wire(), "done"));
                    }
                    return Outcome::Continue;
                }
            }
        }

        self.execute(caller, cmd)
    }

    fn execute(&mut self, caller: Caller, cmd: Command) -> Outcome {
        use CmdCode::*;
        let code = cmd.code.wire();
        let arg = cmd.argument.as_str();

        match cmd.code {
            CamCmd => {
                if arg.is_empty() {
                    self.push_reply(caller, Frame::ok(code, ""));
                    return Outcome::Continue;
                }
                let inner = arg.to_string();
                return self.handle_line(caller, &inner);
            }

            CamSetup => {
                let text = format!(
                    "Exposure time: {:.6} sec\n\
                     Data path: {}/\n\
                     Image path: {}/\n\
                     Shutter enabled: {}\n\
                     Controlling connection: {}",
                    self.exposure_seconds,
                    self.data_path.display(),
                    self.image_path.display(),
                    if self.shutter_enabled { "yes" } else { "no" },
                    match self.controller {
                        Some(w) => w.to_string(),
                        None => "none".to_string(),
                    },
                );
                self.push_reply(caller, Frame::ok(code, text));
            }

            CamWait => {
                self.drain_timer();
                // no argument means a zero wait: the timer is entered and
                // expires on the next tick
                let seconds: f64 = if arg.is_empty() {
                    0.0
                } else {
                    match arg.parse() {
                        Ok(s) if s >= 0.0 => s,
                        _ => {
                            self.push_reply(
                                caller,
                                Frame::err(code, format!("bad wait time: {}", arg)),
                            );
                            return Outcome::Continue;
                        }
                    }
                };
                let now = Instant::now();
                if self
                    .exposure
                    .begin_wait(seconds, now, caller, cmd.wants_response)
                    .is_err()
                {
                    self.push_reply(caller, Frame::err(code, "timer busy"));
                    return Outcome::Continue;
                }
                self.publish_state();
            }

            DataPath => {
                let reply = self.path_command(arg, false);
                self.push_reply(caller, reply_frame(code, reply));
            }

            ImgPath => {
                let reply = self.path_command(arg, true);
                self.push_reply(caller, reply_frame(code, reply));
            }

            Df => {
                let reply = self.free_blocks();
                self.push_reply(caller, reply_frame(code, reply));
            }

            Exposure => {
                self.drain_timer();
                let target = self.resolve_image(arg);
                if let Err(e) = self.begin_exposure(target, caller, cmd.wants_response) {
                    self.push_reply(caller, Frame::err(code, e.to_string()));
                }
                // OK arrives from the tick when the exposure completes
            }

            ExpEnd | Stop => {
                if !self.exposure.timer_running() {
                    self.push_reply(caller, Frame::err(code, "no exposure in progress"));
                    return Outcome::Continue;
                }
                let initiator = self.exposure.initiator();
                self.request_stop(StopPriority::Forced);
                self.tick(Instant::now());
                if initiator != Some(caller) {
                    self.push_reply(caller, Frame::ok(code, "exposure ended"));
                }
            }

            ExpTime => {
                if arg.is_empty() {
                    let text = format!("Exposure time: {:.6} sec", self.exposure_seconds);
                    self.push_reply(caller, Frame::ok(code, text));
                    return Outcome::Continue;
                }
                match arg.parse::<f64>() {
                    Ok(s) if s > 0.0 => {
                        self.exposure_seconds = s;
                        self.status.set("exposure_time", format!("{:.6}", s));
                        let text = format!("Exposure time set to: {:.6} sec", s);
                        self.push_reply(caller, Frame::ok(code, text));
                    }
                    _ => {
                        self.push_reply(
                            caller,
                            Frame::err(code, format!("Illegal exposure time: {}", arg)),
                        );
                    }
                }
            }

            HeaderString => {
                if arg.is_empty() {
                    let text = self.header_string.clone().unwrap_or_default();
                    self.push_reply(caller, Frame::ok(code, text));
                } else {
                    self.header_string = Some(arg.to_string());
                    self.push_reply(caller, Frame::ok(code, "header string set"));
                }
            }

            LdCmndFile => {
                let outcome = self.run_command_file(caller, arg);
                return outcome;
            }

            ReadSetup => {
                let reply = self.read_setup(arg);
                self.push_reply(caller, reply_frame(code, reply));
            }

            K => {
                if !self.exposure.timer_running() {
                    self.push_reply(caller, Frame::err(code, "no exposure in progress"));
                    return Outcome::Continue;
                }
                self.request_stop(StopPriority::Abort);
                self.tick(Instant::now());
                self.push_reply(caller, Frame::ok(code, "exposure killed"));
            }

            ResetCam => {
                if self.exposure.timer_running() {
                    self.finish_exposure(Instant::now(), StopPriority::Abort);
                }
                let reply = self
                    .detector
                    .reset()
                    .map(|_| "camera reset".to_string());
                self.exposure_seconds = 1.0;
                self.header_string = None;
                self.status.set("exposure_time", "1.000000");
                self.push_reply(caller, reply_frame(code, reply));
            }

            Send => {
                self.push_reply(caller, Frame::ok(code, arg));
            }

            ShowPid => {
                self.push_reply(caller, Frame::ok(code, format!("PID = {}", std::process::id())));
            }

            ShutterEnable => {
                if !arg.is_empty() {
                    self.shutter_enabled = !matches!(arg, "0" | "off" | "no");
                }
                let text = format!(
                    "Shutter enable: {}",
                    if self.shutter_enabled { "on" } else { "off" }
                );
                self.push_reply(caller, Frame::ok(code, text));
            }

            Telemetry => {
                let text = self.detector.read_telemetry();
                self.push_reply(caller, Frame::ok(code, text));
            }

            Exit | Quit => {
                return match caller {
                    Caller::Console => {
                        self.log("console quit, shutting down");
                        Outcome::Shutdown
                    }
                    // on a secondary bank ExiT comes relayed from the
                    // master's shutdown and stops the whole server
                    Caller::Worker(_) if cmd.code == Exit && self.secondary => {
                        self.log("exit received, shutting down");
                        Outcome::Shutdown
                    }
                    Caller::Worker(_) => Outcome::CloseCaller,
                };
            }

            Menu => {
                self.print_menu();
                // historically no frame on the wire
            }

            Status | CamStatus => {
                self.push_reply(caller, Frame::ok(code, self.status_word()));
            }

            ImgOnly => {
                let target = self.resolve_image(arg);
                let reply = self
                    .detector
                    .control("ImgonlY", &target.display().to_string());
                self.push_reply(caller, reply_frame(code, reply));
            }

            Cpix | CpixX | Trim | NImages | ExpPeriod | ExtEnable => {
                let name = self.registry.name_of(cmd.code);
                let reply = self.detector.control(name, arg);
                self.push_reply(caller, reply_frame(code, reply));
            }
        }

        Outcome::Continue
    }

    /// Advance the timer; called every poll cycle by the server loop.
    pub fn tick(&mut self, now: Instant) {
        if !self.exposure.timer_running() {
            return;
        }
        if let Some(priority) = self.pending_stop {
            self.finish_exposure(now, priority);
            return;
        }
        match self.exposure.state() {
            CamState::Exposing => {
                if self.detector.check_status(self.exposure.elapsed(now)) {
                    self.log("premature exposure end signalled by detector");
                    self.finish_exposure(now, StopPriority::Normal);
                } else if self.exposure.expired(now) {
                    self.finish_exposure(now, StopPriority::Normal);
                } else {
                    self.publish_remaining(now);
                }
            }
            CamState::Waiting => {
                if self.exposure.expired(now) {
                    self.finish_exposure(now, StopPriority::Normal);
                } else {
                    self.publish_remaining(now);
                }
            }
            _ => {}
        }
    }

    /// Queue a stop; the next tick acts on it. A higher priority overrides
    /// a pending lower one, never the reverse.
    pub fn request_stop(&mut self, priority: StopPriority) {
        self.pending_stop = Some(match self.pending_stop {
            Some(p) => p.max(priority),
            None => priority,
        });
    }

    /// Service a running timer to completion. Blocks the dispatch loop the
    /// way the original served a second exposure request: the new command
    /// proceeds only once the detector is Idle.
    fn drain_timer(&mut self) {
        while self.exposure.timer_running() {
            self.tick(Instant::now());
            if self.exposure.timer_running() {
                thread::sleep(Duration::from_millis(1));
            }
        }
    }

    fn begin_exposure(
        &mut self,
        target: PathBuf,
        caller: Caller,
        wants_response: bool,
    ) -> Result<(), CamError> {
        if self.exposure_seconds <= 0.0 {
            return Err(CamError::Hardware(format!(
                "Illegal exposure time: {:.6}",
                self.exposure_seconds
            )));
        }
        self.exposure
            .begin_preparing(target.clone(), self.exposure_seconds, caller, wants_response)
            .map_err(|e| CamError::Hardware(e.to_string()))?;
        if self.shutter_enabled {
            self.detector.shutter(true);
            self.exposure.shutter_open = true;
        }
        let result = self
            .detector
            .prepare(self.exposure_seconds)
            .and_then(|_| self.detector.start());
        if let Err(e) = result {
            if self.exposure.shutter_open {
                self.detector.shutter(false);
                self.exposure.shutter_open = false;
            }
            self.exposure.cancel_preparing();
            self.publish_state();
            return Err(e);
        }
        let now = Instant::now();
        self.exposure.confirm_started(now);
        self.log(&format!(
            "starting {:.6} s exposure -> {}",
            self.exposure_seconds,
            target.display()
        ));
        self.status.set("target", target.display().to_string());
        self.publish_state();
        Ok(())
    }

    /// Unwind the timer to Idle, read out if appropriate, and route the
    /// deferred response to the initiator.
    fn finish_exposure(&mut self, now: Instant, priority: StopPriority) {
        self.detector.stop(priority);
        if self.exposure.shutter_open {
            self.detector.shutter(false);
            self.exposure.shutter_open = false;
        }
        let run = self.exposure.finish(now);
        self.pending_stop = None;
        self.published_tenths = None;

        match run.was {
            CamState::Preparing | CamState::Exposing => {
                self.header_string = None;
                self.status.remove("target");
                if priority == StopPriority::Abort {
                    self.log("exposure aborted");
                    if let Some(to) = run.initiator {
                        if run.wants_response {
                            self.push_reply(
                                to,
                                Frame::err(CmdCode::Exposure.wire(), "exposure killed"),
                            );
                        }
                    }
                } else if let Some(target) = run.target {
                    let reply = match self.detector.readout(&target) {
                        Ok(text) => {
                            self.log(&format!(
                                "exposure finished after {:.3} s -> {}",
                                run.elapsed.as_secs_f64(),
                                target.display()
                            ));
                            self.status.set("last_image", target.display().to_string());
                            Frame::ok(CmdCode::Exposure.wire(), text)
                        }
                        Err(e) => {
                            self.log(&format!("readout failed: {}", e));
                            Frame::err(CmdCode::Exposure.wire(), e.to_string())
                        }
                    };
                    if let Some(to) = run.initiator {
                        if run.wants_response {
                            self.push_reply(to, reply);
                        }
                    }
                }
            }
            CamState::Waiting => {
                // a wait has no readout
                if let Some(to) = run.initiator {
                    if run.wants_response {
                        let text = format!("wait finished: {:.3} s", run.elapsed.as_secs_f64());
                        self.push_reply(to, Frame::ok(CmdCode::CamWait.wire(), text));
                    }
                }
            }
            CamState::Idle => {}
        }
        self.publish_state();
    }

    fn resolve_image(&self, name: &str) -> PathBuf {
        let p = expand_tilde(name);
        if p.is_absolute() {
            p
        } else {
            self.image_path.join(p)
        }
    }

    fn path_command(&mut self, arg: &str, is_image: bool) -> Result<String, CamError> {
        if arg.is_empty() {
            let current = if is_image {
                &self.image_path
            } else {
                &self.data_path
            };
            return Ok(format!("{}/", current.display()));
        }
        if arg.contains(ILLEGAL_PATH_CHARS) {
            return Err(CamError::Resource(format!(
                "illegal character in path: {}",
                arg
            )));
        }
        let path = expand_tilde(arg.trim_end_matches('/'));
        fs::create_dir_all(&path).map_err(|e| CamError::resource(arg, e))?;
        if is_image {
            // probe that images will actually be writable here
            let probe = path.join(".detserver_probe");
            fs::write(&probe, b"probe").map_err(|e| CamError::resource(arg, e))?;
            let _ = fs::remove_file(&probe);
            self.image_path = path.clone();
            self.status.set("image_path", path.display().to_string());
        } else {
            self.data_path = path.clone();
            self.status.set("data_path", path.display().to_string());
        }
        Ok(format!("{}/", path.display()))
    }

    fn free_blocks(&self) -> Result<String, CamError> {
        let stat = nix::sys::statvfs::statvfs(&self.image_path)
            .map_err(|e| CamError::Resource(format!("statvfs: {}", e)))?;
        let kb = stat.blocks_available() as u64 * stat.fragment_size() as u64 / 1024;
        Ok(kb.to_string())
    }

    fn run_command_file(&mut self, caller: Caller, arg: &str) -> Outcome {
        let code = CmdCode::LdCmndFile.wire();
        if arg.is_empty() {
            self.push_reply(caller, Frame::err(code, "no command file given"));
            return Outcome::Continue;
        }
        let path = {
            let p = expand_tilde(arg);
            if p.is_absolute() {
                p
            } else {
                self.data_path.join(p)
            }
        };
        let content = match fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) => {
                self.push_reply(
                    caller,
                    Frame::err(code, CamError::resource(arg, e).to_string()),
                );
                return Outcome::Continue;
            }
        };
        let lines: Vec<String> = content
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty() && !l.starts_with('#'))
            .map(String::from)
            .collect();
        for line in &lines {
            match self.handle_line(caller, line) {
                Outcome::Continue => {}
                other => return other,
            }
        }
        self.push_reply(
            caller,
            Frame::ok(code, format!("{}: {} commands", path.display(), lines.len())),
        );
        Outcome::Continue
    }

    fn read_setup(&mut self, arg: &str) -> Result<String, CamError> {
        if arg.is_empty() {
            return Err(CamError::Resource("no setup file given".into()));
        }
        let path = {
            let p = expand_tilde(arg);
            if p.is_absolute() {
                p
            } else {
                self.data_path.join(p)
            }
        };
        let content =
            fs::read_to_string(&path).map_err(|e| CamError::resource(arg, e))?;
        let mut applied = 0;
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (key, value) = match line.split_once(char::is_whitespace) {
                Some((k, v)) => (k, v.trim()),
                None => continue,
            };
            match key {
                "exposure_time" => {
                    if let Ok(s) = value.parse::<f64>() {
                        if s > 0.0 {
                            self.exposure_seconds = s;
                            self.status.set("exposure_time", format!("{:.6}", s));
                            applied += 1;
                        }
                    }
                }
                "n_images" => {
                    if self.detector.control("NImages", value).is_ok() {
                        applied += 1;
                    }
                }
                "exposure_period" => {
                    if self.detector.control("ExpPeriod", value).is_ok() {
                        applied += 1;
                    }
                }
                "shutter_enabled" => {
                    self.shutter_enabled = matches!(value, "true" | "yes" | "on" | "1");
                    applied += 1;
                }
                _ => {}
            }
        }
        Ok(format!("{}: {} settings applied", path.display(), applied))
    }

    /// Sorted command menu, twelve names per row
    fn menu_lines(&self) -> Vec<String> {
        let mut names = self.registry.names();
        names.sort_by_key(|n| n.to_lowercase());
        let width = names.iter().map(|n| n.len()).max().unwrap_or(0) + 2;
        names
            .chunks(12)
            .map(|row| {
                let line: String = row.iter().map(|n| format!("{:w$}", n, w = width)).collect();
                format!("  {}", line.trim_end())
            })
            .collect()
    }

    fn print_menu(&self) {
        println!("Commands:");
        for line in self.menu_lines() {
            println!("{}", line);
        }
    }

    fn status_word(&self) -> String {
        let now = Instant::now();
        let mut parts = vec![format!("state={}", self.exposure.state().as_str())];
        if self.exposure.timer_running() {
            parts.push(format!("remaining={:.3}", self.exposure.remaining(now)));
        }
        if let Some(target) = self.exposure.target() {
            parts.push(format!("target={}", target.display()));
        }
        parts.push(format!("exposure_time={:.6}", self.exposure_seconds));
        parts.push(format!(
            "shutter={}",
            if self.exposure.shutter_open {
                "open"
            } else {
                "closed"
            }
        ));
        parts.push(format!(
            "controller={}",
            match self.controller {
                Some(w) => w.to_string(),
                None => "none".to_string(),
            }
        ));
        parts.join(" ")
    }

    fn publish_state(&mut self) {
        let state = self.exposure.state().as_str();
        self.status.set("state", state);
    }

    fn publish_remaining(&mut self, now: Instant) {
        let tenths = (self.exposure.remaining(now) * 10.0) as u64;
        if self.published_tenths != Some(tenths) {
            self.published_tenths = Some(tenths);
            self.status
                .set("time_remaining", format!("{:.1}", tenths as f64 / 10.0));
        }
    }
}

fn reply_frame(code: u16, result: Result<String, CamError>) -> Frame {
    match result {
        Ok(text) => Frame::ok(code, text),
        Err(e) => Frame::err(code, e.to_string()),
    }
}
