//! Detector adapter boundary
//!
//! Everything register-level lives behind the [`Detector`] trait; the rest of
//! the server only sees prepare/start/stop/readout and a small passthrough
//! for detector-specific settings. [`SimDetector`] stands in for real
//! hardware: it honors the full call protocol and writes flat simulated
//! images so the exposure paths can be exercised end to end.
//!
//! Image files are written by short-lived [`WriterPool`] threads so a slow
//! disk never stalls the dispatch loop.

use crate::error::CamError;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// How urgently an exposure is being ended. Ranked: a stop already underway
/// is only superseded by a higher-priority one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum StopPriority {
    /// Timer ran to completion
    Normal = 0,
    /// Operator stop; readout still happens
    Forced = 1,
    /// Abort; no readout
    Abort = 2,
}

/// Hardware abstraction implemented per detector family.
///
/// All calls come from the single dispatch loop, never concurrently.
pub trait Detector: Send {
    /// Program the exposure time; called before `start`
    fn prepare(&mut self, seconds: f64) -> Result<(), CamError>;

    /// Open the acquisition; the caller arms the timer on success
    fn start(&mut self) -> Result<(), CamError>;

    /// End the acquisition at the given priority
    fn stop(&mut self, priority: StopPriority);

    /// Read the image out to `path`; returns the text for the OK frame
    fn readout(&mut self, path: &Path) -> Result<String, CamError>;

    /// Multi-line hardware telemetry block
    fn read_telemetry(&mut self) -> String;

    /// Poll during an exposure; true means the hardware ended the run
    /// early (external trigger de-asserted, error latch)
    fn check_status(&mut self, elapsed: f64) -> bool;

    /// Actuate the shutter
    fn shutter(&mut self, open: bool);

    /// Return the detector to its power-on state
    fn reset(&mut self) -> Result<(), CamError>;

    /// Detector-specific settings passthrough (NImages, ExpPeriod,
    /// ExtEnable, Cpix, Trim, ...); returns the OK frame text
    fn control(&mut self, name: &str, argument: &str) -> Result<String, CamError>;
}

/// Bounds concurrent readout writers.
///
/// Spawning is throttled, not refused: when the outstanding count is above
/// the limit the caller sleeps 10 ms per excess writer before spawning, so
/// a burst of short exposures backs off smoothly instead of failing.
#[derive(Debug, Clone)]
pub struct WriterPool {
    active: Arc<AtomicUsize>,
    max: usize,
}

impl WriterPool {
    pub fn new(max: usize) -> Self {
        WriterPool {
            active: Arc::new(AtomicUsize::new(0)),
            max: max.max(1),
        }
    }

    /// Writers currently running
    pub fn outstanding(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Run `job` on its own thread, throttling first if the pool is over
    /// its limit.
    pub fn spawn<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let count = self.active.load(Ordering::SeqCst);
        if count > self.max {
            let excess = (count - self.max) as u64;
            thread::sleep(Duration::from_millis(10 * excess));
        }
        self.active.fetch_add(1, Ordering::SeqCst);
        let active = Arc::clone(&self.active);
        thread::spawn(move || {
            job();
            active.fetch_sub(1, Ordering::SeqCst);
        });
    }

    /// Block until all writers are done or the timeout passes; true when
    /// the pool drained.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while self.outstanding() > 0 {
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(Duration::from_millis(1));
        }
        true
    }
}

/// Simulated detector: one flat module, 16-bit pixels.
pub struct SimDetector {
    width: u32,
    height: u32,
    exposure_seconds: f64,
    acquiring: bool,
    shutter_open: bool,
    n_images: u32,
    exposure_period: f64,
    ext_enable: bool,
    trim_file: Option<PathBuf>,
    /// Forced early end at this many elapsed seconds, for tests
    pub premature_at: Option<f64>,
    /// Next prepare call fails, for tests
    pub fail_next_prepare: bool,
    readouts: u64,
    pool: WriterPool,
}

impl SimDetector {
    pub fn new(pool: WriterPool) -> Self {
        SimDetector {
            width: 487,
            height: 195,
            exposure_seconds: 1.0,
            acquiring: false,
            shutter_open: false,
            n_images: 1,
            exposure_period: 0.0,
            ext_enable: false,
            trim_file: None,
            premature_at: None,
            fail_next_prepare: false,
            readouts: 0,
            pool,
        }
    }

    pub fn n_images(&self) -> u32 {
        self.n_images
    }

    pub fn readouts(&self) -> u64 {
        self.readouts
    }

    fn write_image(path: &Path, width: u32, height: u32, seconds: f64) -> std::io::Result<()> {
        let mut file = File::create(path)?;
        writeln!(file, "SIMDET {}x{} exposure_time {:.6}", width, height, seconds)?;
        let row = vec![0u8; width as usize * 2];
        for _ in 0..height {
            file.write_all(&row)?;
        }
        Ok(())
    }
}

impl Detector for SimDetector {
    fn prepare(&mut self, seconds: f64) -> Result<(), CamError> {
        if self.fail_next_prepare {
            self.fail_next_prepare = false;
            return Err(CamError::Hardware("detector not responding".into()));
        }
        if self.acquiring {
            return Err(CamError::Hardware("acquisition already open".into()));
        }
        self.exposure_seconds = seconds;
        Ok(())
    }

    fn start(&mut self) -> Result<(), CamError> {
        self.acquiring = true;
        Ok(())
    }

    fn stop(&mut self, _priority: StopPriority) {
        self.acquiring = false;
    }

    fn readout(&mut self, path: &Path) -> Result<String, CamError> {
        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() && !dir.is_dir() {
                return Err(CamError::Resource(format!(
                    "{}: no such directory",
                    dir.display()
                )));
            }
        }
        self.readouts += 1;
        let (width, height, seconds) = (self.width, self.height, self.exposure_seconds);
        let target = path.to_path_buf();
        self.pool.spawn(move || {
            if let Err(e) = SimDetector::write_image(&target, width, height, seconds) {
                eprintln!("*** image write failed: {}: {}", target.display(), e);
            }
        });
        Ok(path.display().to_string())
    }

    fn read_telemetry(&mut self) -> String {
        format!(
            "=== Telemetry ===\n\
             Image format: {} (w) x {} (h) pixels\n\
             Exposure time: {:.6} s\n\
             Exposure period: {:.6} s\n\
             N images: {}\n\
             External enable: {}\n\
             Shutter: {}\n\
             Trim file: {}\n\
             Readouts since start: {}",
            self.width,
            self.height,
            self.exposure_seconds,
            self.exposure_period,
            self.n_images,
            if self.ext_enable { "on" } else { "off" },
            if self.shutter_open { "open" } else { "closed" },
            self.trim_file
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "(none)".to_string()),
            self.readouts,
        )
    }

    fn check_status(&mut self, elapsed: f64) -> bool {
        match self.premature_at {
            Some(at) => elapsed >= at,
            None => false,
        }
    }

    fn shutter(&mut self, open: bool) {
        self.shutter_open = open;
    }

    fn reset(&mut self) -> Result<(), CamError> {
        self.acquiring = false;
        self.shutter_open = false;
        self.n_images = 1;
        self.exposure_period = 0.0;
        self.ext_enable = false;
        self.trim_file = None;
        Ok(())
    }

    fn control(&mut self, name: &str, argument: &str) -> Result<String, CamError> {
        match name {
            "NImages" => {
                if !argument.is_empty() {
                    self.n_images = argument
                        .parse()
                        .map_err(|_| CamError::Hardware(format!("bad count: {}", argument)))?;
                }
                Ok(format!("N images set to: {}", self.n_images))
            }
            "ExpPeriod" => {
                if !argument.is_empty() {
                    self.exposure_period = argument
                        .parse()
                        .map_err(|_| CamError::Hardware(format!("bad period: {}", argument)))?;
                }
                Ok(format!("Exposure period set to: {:.6} sec", self.exposure_period))
            }
            "ExtEnable" => {
                self.ext_enable = !matches!(argument, "0" | "off");
                Ok(format!(
                    "External enable mode: {}",
                    if self.ext_enable { "on" } else { "off" }
                ))
            }
            "Cpix" | "Cpix_x" => {
                // argument already translated to local coordinates
                Ok(format!("calibrate pixel {}", argument))
            }
            "Trim" => {
                let file = PathBuf::from(argument);
                if !argument.is_empty() && !file.is_file() {
                    return Err(CamError::Resource(format!("{}: not found", argument)));
                }
                self.trim_file = Some(file);
                Ok(format!("trim file: {}", argument))
            }
            "ImgonlY" => {
                // image dump without an exposure cycle
                self.readout(Path::new(argument)).map(|p| format!("imgonly {}", p))
            }
            other => Err(CamError::Hardware(format!(
                "detector does not implement: {}",
                other
            ))),
        }
    }
}
