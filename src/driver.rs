use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::time::{Duration, Instant};

use log::{debug, info};
use tracing::info_span;

use crate::compute::{PSpec, ReadListener, ResourceLayout, ShaderInstance};
use crate::error::{Error, ErrorKind, ErrorSink};
use crate::mouse::MouseState;
use crate::uniforms::SystemUniforms;
use crate::view::BufferView;
use crate::{shader, Core};

/// Produces a fresh spec from the current shader source and the canvas size
/// the instance is built for.
pub type SpecFactory = Box<dyn FnMut(&str, (u32, u32)) -> Result<PSpec, Error>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    Idle,
    Running,
    Paused,
    Destroyed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverCommand {
    Start,
    TogglePlayPause,
    Stop,
}

impl DriverState {
    pub fn next(self, command: DriverCommand) -> DriverState {
        use DriverCommand::*;
        use DriverState::*;
        match (self, command) {
            (Destroyed, _) => Destroyed,
            (_, Stop) => Destroyed,
            (_, Start) => Running,
            (Running, TogglePlayPause) => Paused,
            (Paused, TogglePlayPause) => Running,
            (Idle, TogglePlayPause) => Idle,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DriverConfig {
    pub resize_debounce: Duration,
    /// Frame deltas above this are clamped, e.g. after the window was hidden.
    pub max_delta: Duration,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            resize_debounce: Duration::from_millis(200),
            max_delta: Duration::from_millis(250),
        }
    }
}

impl DriverConfig {
    pub fn with_resize_debounce(mut self, delay: Duration) -> Self {
        self.resize_debounce = delay;
        self
    }

    pub fn with_max_delta(mut self, max_delta: Duration) -> Self {
        self.max_delta = max_delta;
        self
    }
}

/// Frame counter, elapsed time and a rolling frame rate.
#[derive(Debug)]
pub struct FrameClock {
    started: Instant,
    last: Instant,
    frame: u64,
    frame_times: VecDeque<f32>,
    max_delta: f32,
}

impl FrameClock {
    pub fn new(now: Instant, max_delta: Duration) -> Self {
        Self {
            started: now,
            last: now,
            frame: 0,
            frame_times: VecDeque::with_capacity(30),
            max_delta: max_delta.as_secs_f32(),
        }
    }

    pub fn restart(&mut self, now: Instant) {
        self.started = now;
        self.last = now;
        self.frame = 0;
        self.frame_times.clear();
    }

    /// Index of the frame about to run.
    pub fn frame(&self) -> u64 {
        self.frame
    }

    /// Returns `(time, delta)` for the frame about to run.
    pub fn sample(&mut self, now: Instant) -> (f32, f32) {
        let delta = now.saturating_duration_since(self.last).as_secs_f32().min(self.max_delta);
        self.last = now;
        if delta > 0.0 {
            self.frame_times.push_back(delta);
            if self.frame_times.len() > 30 {
                self.frame_times.pop_front();
            }
        }
        (now.saturating_duration_since(self.started).as_secs_f32(), delta)
    }

    pub fn advance(&mut self) {
        self.frame += 1;
    }

    /// Skips the time spent paused so `time` does not jump on resume.
    pub fn resume(&mut self, now: Instant) {
        let paused = now.saturating_duration_since(self.last);
        self.started += paused;
        self.last = now;
    }

    pub fn fps(&self) -> f32 {
        if self.frame_times.is_empty() {
            return 0.0;
        }
        let average = self.frame_times.iter().sum::<f32>() / self.frame_times.len() as f32;
        1.0 / average
    }
}

/// Holds the most recent resize until it has been quiet for `delay`.
#[derive(Debug)]
pub struct ResizeDebouncer {
    delay: Duration,
    pending: Option<((u32, u32), Instant)>,
}

impl ResizeDebouncer {
    pub fn new(delay: Duration) -> Self {
        Self { delay, pending: None }
    }

    pub fn request(&mut self, size: (u32, u32), now: Instant) {
        self.pending = Some((size, now));
    }

    /// The settled size, once.
    pub fn poll(&mut self, now: Instant) -> Option<(u32, u32)> {
        match self.pending {
            Some((size, at)) if now.saturating_duration_since(at) >= self.delay => {
                self.pending = None;
                Some(size)
            }
            _ => None,
        }
    }

    pub fn cancel(&mut self) {
        self.pending = None;
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }
}

/// Owns a [`ShaderInstance`] and runs it once per tick.
pub struct FrameDriver {
    config: DriverConfig,
    state: DriverState,
    source: String,
    factory: SpecFactory,
    instance: Option<ShaderInstance>,
    clock: FrameClock,
    resize: ResizeDebouncer,
    mouse: MouseState,
    size: (u32, u32),
    listeners: Rc<RefCell<Vec<ReadListener>>>,
    sink: ErrorSink,
}

impl FrameDriver {
    pub fn new(
        source: impl Into<String>,
        factory: impl FnMut(&str, (u32, u32)) -> Result<PSpec, Error> + 'static,
        sink: ErrorSink,
        config: DriverConfig,
    ) -> Self {
        let now = Instant::now();
        Self {
            clock: FrameClock::new(now, config.max_delta),
            resize: ResizeDebouncer::new(config.resize_debounce),
            config,
            state: DriverState::Idle,
            source: source.into(),
            factory: Box::new(factory),
            instance: None,
            mouse: MouseState::default(),
            size: (0, 0),
            listeners: Rc::new(RefCell::new(Vec::new())),
            sink,
        }
    }

    pub fn state(&self) -> DriverState {
        self.state
    }

    pub fn instance(&self) -> Option<&ShaderInstance> {
        self.instance.as_ref()
    }

    pub fn frame(&self) -> u64 {
        self.clock.frame()
    }

    pub fn fps(&self) -> f32 {
        self.clock.fps()
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Canvas size the current instance was built for.
    pub fn size(&self) -> (u32, u32) {
        self.size
    }

    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    /// Listeners survive rebuilds; they are attached to every new instance.
    pub fn add_read_listener(&mut self, listener: impl FnMut(&str, &BufferView) + 'static) {
        self.listeners.borrow_mut().push(Box::new(listener));
    }

    /// Builds the instance if needed, resets counters and begins running.
    pub fn start(&mut self, core: &Core) -> Result<(), Error> {
        if self.state == DriverState::Destroyed {
            return Err(Error::Runtime("driver was stopped".to_string()));
        }
        self.size = (core.size.width, core.size.height);
        if self.instance.is_none() {
            self.rebuild(core)?;
        }
        self.clock.restart(Instant::now());
        self.state = self.state.next(DriverCommand::Start);
        info!("FrameDriver::start");
        Ok(())
    }

    pub fn toggle_play_pause(&mut self) -> DriverState {
        let next = self.state.next(DriverCommand::TogglePlayPause);
        if self.state == DriverState::Paused && next == DriverState::Running {
            self.clock.resume(Instant::now());
        }
        self.state = next;
        debug!("FrameDriver state: {next:?}");
        next
    }

    /// Evaluates a fresh spec and rebuilds every device resource. If the new
    /// spec does not validate the current instance stays in place.
    pub fn reset(&mut self, core: &Core) -> Result<(), Error> {
        if self.state == DriverState::Destroyed {
            return Err(Error::Runtime("driver was stopped".to_string()));
        }
        self.rebuild(core)?;
        self.clock.restart(Instant::now());
        Ok(())
    }

    /// Replaces the shader source and resets.
    pub fn set_source(&mut self, core: &Core, source: impl Into<String>) -> Result<(), Error> {
        let previous = std::mem::replace(&mut self.source, source.into());
        let result = self.reset(core);
        if result.is_err() {
            self.source = previous;
        }
        result
    }

    /// Cancels pending resizes and releases the instance. Final.
    pub fn stop(&mut self) {
        self.resize.cancel();
        if let Some(mut instance) = self.instance.take() {
            instance.destroy();
        }
        self.state = self.state.next(DriverCommand::Stop);
        info!("FrameDriver::stop");
    }

    /// Schedules a rebuild for the new size once resizing settles.
    pub fn resize(&mut self, width: u32, height: u32) {
        if width == 0 || height == 0 {
            return;
        }
        self.resize.request((width, height), Instant::now());
    }

    pub fn pointer(&mut self, x: f32, y: f32) {
        self.mouse.position = [x, y];
        if let Some(instance) = &mut self.instance {
            instance.pointer(x, y);
        }
    }

    pub fn set_mouse(&mut self, mouse: MouseState) {
        self.mouse = mouse;
    }

    /// Runs one frame if running. Returns whether a frame was submitted.
    pub fn tick(&mut self, core: &Core, target: Option<&wgpu::TextureView>) -> Result<bool, Error> {
        if self.state != DriverState::Running {
            return Ok(false);
        }
        if let Some(reason) = core.device_lost() {
            self.stop();
            self.sink.report(Error::Runtime(format!("device lost: {reason}")))?;
            return Ok(false);
        }
        let now = Instant::now();
        if let Some(size) = self.resize.poll(now) {
            self.size = size;
            self.reset(core)?;
        }
        let Some(instance) = &mut self.instance else {
            return Ok(false);
        };

        let frame = self.clock.frame();
        let span = info_span!("[FrameDriver::tick]", frame);
        let _guard = span.enter();
        let (time, delta) = self.clock.sample(now);
        let system = SystemUniforms {
            frame,
            time,
            delta,
            mouse: self.mouse,
            resolution: [self.size.0 as f32, self.size.1 as f32],
        };
        if let Err(e) = instance.run(core, frame, &system, target) {
            self.sink.report(e)?;
            return Ok(false);
        }
        self.clock.advance();
        Ok(true)
    }

    fn rebuild(&mut self, core: &Core) -> Result<(), Error> {
        let span = info_span!("[FrameDriver::rebuild]");
        let _guard = span.enter();
        let spec = self.sink.check((self.factory)(&self.source, self.size))?;
        // nothing is released until the new spec is known to be sound
        self.sink.check(ResourceLayout::from_spec(&spec))?;
        self.sink.check(shader::check_source(&spec.code))?;
        if let Some(mut old) = self.instance.take() {
            old.destroy();
        }
        let mut instance = ShaderInstance::build(core, spec, &self.sink)?;
        let listeners = Rc::clone(&self.listeners);
        instance.add_read_listeners(move |name, view| {
            for listener in listeners.borrow_mut().iter_mut() {
                listener(name, view);
            }
        });
        self.instance = Some(instance);
        Ok(())
    }

    /// Reports a non-fatal problem through the driver's sink.
    pub fn warn(&self, kind: ErrorKind, message: impl Into<String>) {
        self.sink.warn(kind, message);
    }
}

impl Drop for FrameDriver {
    fn drop(&mut self) {
        if let Some(mut instance) = self.instance.take() {
            instance.destroy();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_transitions() {
        use DriverCommand::*;
        use DriverState::*;
        assert_eq!(Idle.next(TogglePlayPause), Idle);
        assert_eq!(Idle.next(Start), Running);
        assert_eq!(Running.next(TogglePlayPause), Paused);
        assert_eq!(Paused.next(TogglePlayPause), Running);
        assert_eq!(Paused.next(Start), Running);
        assert_eq!(Running.next(Stop), Destroyed);
        assert_eq!(Destroyed.next(Start), Destroyed);
        assert_eq!(Destroyed.next(TogglePlayPause), Destroyed);
    }

    #[test]
    fn debouncer_waits_for_quiet() {
        let t0 = Instant::now();
        let mut debouncer = ResizeDebouncer::new(Duration::from_millis(200));
        debouncer.request((100, 100), t0);
        debouncer.request((120, 90), t0 + Duration::from_millis(150));
        assert_eq!(debouncer.poll(t0 + Duration::from_millis(300)), None);
        assert_eq!(debouncer.poll(t0 + Duration::from_millis(350)), Some((120, 90)));
        assert_eq!(debouncer.poll(t0 + Duration::from_secs(5)), None);

        debouncer.request((10, 10), t0);
        debouncer.cancel();
        assert!(!debouncer.is_pending());
        assert_eq!(debouncer.poll(t0 + Duration::from_secs(5)), None);
    }

    #[test]
    fn clock_counts_and_clamps() {
        let t0 = Instant::now();
        let mut clock = FrameClock::new(t0, Duration::from_millis(250));
        let (time, delta) = clock.sample(t0 + Duration::from_millis(16));
        assert!((time - 0.016).abs() < 1e-4);
        assert!((delta - 0.016).abs() < 1e-4);
        clock.advance();
        assert_eq!(clock.frame(), 1);

        let (_, delta) = clock.sample(t0 + Duration::from_secs(3));
        assert!((delta - 0.25).abs() < 1e-6);

        clock.restart(t0 + Duration::from_secs(4));
        assert_eq!(clock.frame(), 0);
        assert_eq!(clock.fps(), 0.0);
    }

    #[test]
    fn resume_skips_paused_time() {
        let t0 = Instant::now();
        let mut clock = FrameClock::new(t0, Duration::from_secs(1));
        clock.sample(t0 + Duration::from_secs(1));
        clock.resume(t0 + Duration::from_secs(11));
        let (time, _) = clock.sample(t0 + Duration::from_secs(11));
        assert!((time - 1.0).abs() < 1e-4);
    }

    #[test]
    fn idle_driver_does_not_toggle() {
        let mut driver = FrameDriver::new(
            "",
            |source: &str, _size| PSpec::from_source(source),
            ErrorSink::new(),
            DriverConfig::default(),
        );
        assert_eq!(driver.toggle_play_pause(), DriverState::Idle);
        driver.stop();
        assert_eq!(driver.state(), DriverState::Destroyed);
        assert_eq!(driver.toggle_play_pause(), DriverState::Destroyed);
    }
}
