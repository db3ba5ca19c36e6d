use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, error, info, warn};

use crate::config::RendererConfig;
use crate::core::renderer::api::{Dimensions, LifecycleState, NativeHandle, RenderBackend};
use crate::error::{RenderError, Result};

/// Cloneable, thread-safe writer for a renderer's drawable size.
#[derive(Debug, Clone, Default)]
pub struct SizeHandle {
    size: Arc<Mutex<Dimensions>>,
}

impl SizeHandle {
    /// Store a new size; the render thread applies the latest value on its next frame.
    pub fn set(&self, width: i32, height: i32) {
        *self.size.lock().unwrap_or_else(PoisonError::into_inner) = Dimensions::new(width, height);
    }

    pub fn get(&self) -> Dimensions {
        *self.size.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Drives a [`RenderBackend`] through its lifecycle on a dedicated thread.
///
/// The backend is moved into the render thread on `start` and handed back
/// through the join handle on `stop`, so GPU state is never touched from two
/// threads at once.
pub struct Renderer<B: RenderBackend> {
    config: RendererConfig,
    state: LifecycleState,
    backend: Option<B>,
    size: SizeHandle,
    running: Arc<AtomicBool>,
    frames: Arc<AtomicU64>,
    worker: Option<JoinHandle<B>>,
}

impl<B: RenderBackend> Renderer<B> {
    pub fn new(backend: B, config: RendererConfig) -> Self {
        Self {
            config,
            state: LifecycleState::Uninitialized,
            backend: Some(backend),
            size: SizeHandle::default(),
            running: Arc::new(AtomicBool::new(false)),
            frames: Arc::new(AtomicU64::new(0)),
            worker: None,
        }
    }

    /// `Running` becomes `Stopped` once a loop has ended on a frame error.
    pub fn state(&self) -> LifecycleState {
        if self.state == LifecycleState::Running && !self.is_running() {
            return LifecycleState::Stopped;
        }
        self.state
    }

    /// True while a render thread is alive and looping.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Frames that reached the screen since construction.
    pub fn frames_presented(&self) -> u64 {
        self.frames.load(Ordering::Acquire)
    }

    pub fn size(&self) -> Dimensions {
        self.size.get()
    }

    pub fn resize_handle(&self) -> SizeHandle {
        self.size.clone()
    }

    pub fn initialize(&mut self, handle: &NativeHandle) -> Result<()> {
        match self.state {
            LifecycleState::Uninitialized => {}
            LifecycleState::Disposed => return Err(RenderError::Disposed),
            _ => return Err(RenderError::AlreadyInitialized),
        }

        let backend = self.backend.as_mut().ok_or(RenderError::NotInitialized)?;
        if let Err(err) = backend.initialize_context(handle) {
            error!("{} context creation failed: {err}", backend.name());
            backend.destroy_context();
            return Err(err);
        }

        info!("{} renderer initialized", backend.name());
        self.state = LifecycleState::Initialized;
        Ok(())
    }

    /// Store the drawable size. Never touches the backend; the next frame applies it.
    pub fn resize(&self, width: i32, height: i32) {
        self.size.set(width, height);
    }

    pub fn start(&mut self) -> Result<()> {
        match self.state {
            LifecycleState::Uninitialized => return Err(RenderError::NotInitialized),
            LifecycleState::Disposed => return Err(RenderError::Disposed),
            _ => {}
        }

        if self.is_running() {
            return Ok(());
        }

        // A loop that died on a frame error still owns the backend.
        self.reap_worker();

        let backend = self.backend.take().ok_or(RenderError::NotInitialized)?;
        let shared = LoopShared {
            size: self.size.clone(),
            running: Arc::clone(&self.running),
            frames: Arc::clone(&self.frames),
            interval: self.config.frame_interval,
        };

        self.running.store(true, Ordering::Release);
        let spawned = thread::Builder::new()
            .name(self.config.thread_name.clone())
            .spawn(move || run_frame_loop(backend, shared));

        match spawned {
            Ok(worker) => {
                self.worker = Some(worker);
                self.state = LifecycleState::Running;
                info!("render thread '{}' started", self.config.thread_name);
                Ok(())
            }
            Err(err) => {
                self.running.store(false, Ordering::Release);
                Err(err.into())
            }
        }
    }

    /// Request the loop to exit and block until the in-flight frame finishes.
    pub fn stop(&mut self) {
        if self.worker.is_none() {
            return;
        }

        self.running.store(false, Ordering::Release);
        self.reap_worker();
        self.state = LifecycleState::Stopped;
        info!("render thread '{}' stopped", self.config.thread_name);
    }

    /// Stop, then tear down the native context. Idempotent.
    pub fn dispose(&mut self) {
        if self.state == LifecycleState::Disposed {
            return;
        }

        self.stop();

        if self.state != LifecycleState::Uninitialized {
            match self.backend.as_mut() {
                Some(backend) => {
                    backend.destroy_context();
                    info!("{} renderer disposed", backend.name());
                }
                None => warn!("backend was lost with its render thread; nothing to tear down"),
            }
        }

        self.state = LifecycleState::Disposed;
    }

    fn reap_worker(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };

        match worker.join() {
            Ok(backend) => self.backend = Some(backend),
            Err(_) => error!("render thread panicked; its GPU resources are leaked"),
        }
        self.running.store(false, Ordering::Release);
    }
}

impl<B: RenderBackend> Drop for Renderer<B> {
    fn drop(&mut self) {
        self.dispose();
    }
}

struct LoopShared {
    size: SizeHandle,
    running: Arc<AtomicBool>,
    frames: Arc<AtomicU64>,
    interval: Duration,
}

fn run_frame_loop<B: RenderBackend>(mut backend: B, shared: LoopShared) -> B {
    let mut applied = None;

    while shared.running.load(Ordering::Acquire) {
        match tick(&mut backend, shared.size.get(), &mut applied) {
            Ok(true) => {
                shared.frames.fetch_add(1, Ordering::AcqRel);
            }
            Ok(false) => {}
            Err(err) => {
                error!("{} render loop terminated: {err}", backend.name());
                break;
            }
        }

        thread::sleep(shared.interval);
    }

    backend.release_thread();
    shared.running.store(false, Ordering::Release);
    backend
}

/// One loop iteration. Returns whether a frame was presented.
fn tick<B: RenderBackend>(
    backend: &mut B,
    size: Dimensions,
    applied: &mut Option<(u32, u32)>,
) -> Result<bool> {
    let Some(extent) = size.extent() else {
        return Ok(false);
    };

    if *applied != Some(extent) {
        debug!("{} resize to {}x{}", backend.name(), extent.0, extent.1);
        backend.resize_to(extent.0, extent.1)?;
        *applied = Some(extent);
    }

    backend.render_frame()
}
