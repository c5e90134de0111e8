//! Live output devices
//!
//! An output device pulls blocks from the shared render core at its own
//! cadence. The graph starts the device before a preview and stops it for
//! offline renders.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, warn};

use crate::engine::buffer::{AudioBuffer, GRAPH_SAMPLE_RATE};
use crate::engine::graph::{lock_core, SharedCore};
use crate::error::{MixError, Result};

/// A sink that pulls audio from the render core
pub trait OutputDevice: Send {
    /// Start pulling from `core`; a no-op when already running
    fn start(&mut self, core: SharedCore) -> Result<()>;

    /// Stop pulling; idempotent
    fn stop(&mut self);

    fn is_running(&self) -> bool;
}

/// Callback receiving every block a clocked output pulls
pub type BlockSink = Box<dyn FnMut(&AudioBuffer) + Send>;

// ============================================================================
// Clocked output
// ============================================================================

/// Headless device pulling blocks on a real-time clock
pub struct ClockedOutput {
    block_frames: usize,
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<Option<BlockSink>>>,
    sink: Option<BlockSink>,
}

impl ClockedOutput {
    pub fn new(block_frames: usize) -> Self {
        Self {
            block_frames: block_frames.max(1),
            running: Arc::new(AtomicBool::new(false)),
            thread: None,
            sink: None,
        }
    }

    /// Hand every pulled block to `sink`
    pub fn with_sink(mut self, sink: BlockSink) -> Self {
        self.sink = Some(sink);
        self
    }
}

impl OutputDevice for ClockedOutput {
    fn start(&mut self, core: SharedCore) -> Result<()> {
        if self.is_running() {
            return Ok(());
        }
        self.running.store(true, Ordering::SeqCst);
        let running = Arc::clone(&self.running);
        let frames = self.block_frames;
        let mut sink = self.sink.take();
        let period = Duration::from_secs_f64(frames as f64 / GRAPH_SAMPLE_RATE as f64);

        let handle = thread::Builder::new()
            .name("mixdown-output".to_string())
            .spawn(move || {
                let mut next = Instant::now();
                while running.load(Ordering::SeqCst) {
                    {
                        let mut core = lock_core(&core);
                        let block = core.render(frames);
                        if let Some(sink) = sink.as_mut() {
                            sink(block);
                        }
                    }
                    next += period;
                    let now = Instant::now();
                    if next > now {
                        thread::sleep(next - now);
                    } else {
                        next = now;
                    }
                }
                sink
            })
            .map_err(|e| {
                self.running.store(false, Ordering::SeqCst);
                MixError::OutputUnavailable {
                    reason: e.to_string(),
                }
            })?;

        self.thread = Some(handle);
        debug!("Clocked output started ({} frames per block)", frames);
        Ok(())
    }

    fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread.take() {
            match handle.join() {
                Ok(sink) => self.sink = sink,
                Err(_) => warn!("Output thread panicked"),
            }
            debug!("Clocked output stopped");
        }
    }

    fn is_running(&self) -> bool {
        self.thread.is_some() && self.running.load(Ordering::SeqCst)
    }
}

impl Drop for ClockedOutput {
    fn drop(&mut self) {
        self.stop();
    }
}

// ============================================================================
// Manual output
// ============================================================================

#[derive(Default)]
struct ManualShared {
    core: Option<SharedCore>,
}

/// Device driven by its host: nothing plays until the handle pulls
pub struct ManualOutput {
    shared: Arc<Mutex<ManualShared>>,
}

/// Pull side of a [`ManualOutput`]
#[derive(Clone)]
pub struct ManualOutputHandle {
    shared: Arc<Mutex<ManualShared>>,
}

impl ManualOutput {
    pub fn new() -> (Self, ManualOutputHandle) {
        let shared = Arc::new(Mutex::new(ManualShared::default()));
        (
            Self {
                shared: Arc::clone(&shared),
            },
            ManualOutputHandle { shared },
        )
    }
}

impl OutputDevice for ManualOutput {
    fn start(&mut self, core: SharedCore) -> Result<()> {
        let mut shared = self.shared.lock().unwrap_or_else(PoisonError::into_inner);
        if shared.core.is_none() {
            shared.core = Some(core);
        }
        Ok(())
    }

    fn stop(&mut self) {
        self.shared
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .core = None;
    }

    fn is_running(&self) -> bool {
        self.shared
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .core
            .is_some()
    }
}

impl ManualOutputHandle {
    /// Pull one block; `None` while the device is stopped
    pub fn pull(&self, frames: usize) -> Option<AudioBuffer> {
        let core = self
            .shared
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .core
            .clone()?;
        let mut core = lock_core(&core);
        Some(core.render(frames).clone())
    }

    pub fn is_running(&self) -> bool {
        self.shared
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .core
            .is_some()
    }
}

// ============================================================================
// cpal output
// ============================================================================

#[cfg(feature = "cpal-output")]
pub use self::device::CpalOutput;

#[cfg(feature = "cpal-output")]
mod device {
    use std::sync::mpsc::{channel, sync_channel, Sender};
    use std::thread::{self, JoinHandle};

    use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
    use log::{debug, error};

    use super::OutputDevice;
    use crate::engine::buffer::GRAPH_SAMPLE_RATE;
    use crate::engine::graph::{lock_core, SharedCore};
    use crate::error::{MixError, Result};

    /// System default output device via cpal
    ///
    /// The stream lives on its own thread since it cannot move between
    /// threads on every platform.
    #[derive(Default)]
    pub struct CpalOutput {
        stop: Option<Sender<()>>,
        thread: Option<JoinHandle<()>>,
    }

    impl CpalOutput {
        pub fn new() -> Self {
            Self::default()
        }
    }

    fn unavailable(reason: impl ToString) -> MixError {
        MixError::OutputUnavailable {
            reason: reason.to_string(),
        }
    }

    impl OutputDevice for CpalOutput {
        fn start(&mut self, core: SharedCore) -> Result<()> {
            if self.is_running() {
                return Ok(());
            }
            let (stop_tx, stop_rx) = channel::<()>();
            let (ready_tx, ready_rx) = sync_channel::<Result<()>>(1);

            let handle = thread::Builder::new()
                .name("mixdown-cpal".to_string())
                .spawn(move || {
                    let host = cpal::default_host();
                    let stream = host
                        .default_output_device()
                        .ok_or_else(|| unavailable("no output device available"))
                        .and_then(|device| {
                            let supported = device.default_output_config().map_err(unavailable)?;
                            let channels = supported.channels();
                            let config = cpal::StreamConfig {
                                channels,
                                sample_rate: cpal::SampleRate(GRAPH_SAMPLE_RATE),
                                buffer_size: cpal::BufferSize::Default,
                            };
                            let stream = device
                                .build_output_stream(
                                    &config,
                                    move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                                        lock_core(&core).fill_interleaved(data, channels as usize);
                                    },
                                    |err| error!("Output stream error: {}", err),
                                    None,
                                )
                                .map_err(unavailable)?;
                            stream.play().map_err(unavailable)?;
                            Ok(stream)
                        });

                    match stream {
                        Ok(stream) => {
                            let _ = ready_tx.send(Ok(()));
                            // Blocks until stop() drops or signals the sender
                            let _ = stop_rx.recv();
                            drop(stream);
                        }
                        Err(e) => {
                            let _ = ready_tx.send(Err(e));
                        }
                    }
                })
                .map_err(unavailable)?;

            match ready_rx.recv() {
                Ok(Ok(())) => {
                    self.stop = Some(stop_tx);
                    self.thread = Some(handle);
                    debug!("cpal output started at {} Hz", GRAPH_SAMPLE_RATE);
                    Ok(())
                }
                Ok(Err(e)) => {
                    let _ = handle.join();
                    Err(e)
                }
                Err(_) => {
                    let _ = handle.join();
                    Err(unavailable("output thread exited during startup"))
                }
            }
        }

        fn stop(&mut self) {
            if let Some(stop) = self.stop.take() {
                let _ = stop.send(());
            }
            if let Some(handle) = self.thread.take() {
                let _ = handle.join();
                debug!("cpal output stopped");
            }
        }

        fn is_running(&self) -> bool {
            self.thread.is_some()
        }
    }

    impl Drop for CpalOutput {
        fn drop(&mut self) {
            self.stop();
        }
    }
}
