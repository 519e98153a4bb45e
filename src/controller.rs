//! The public face of the crate: a double-buffered LED strip.
//!
//! Edits go to the *pending* strip and return immediately. `render()` takes a
//! snapshot of it, builds the brightness-adjusted wire buffer and queues both
//! for the render thread. Once the bus confirms the write, the snapshot
//! becomes the *displayed* strip, which is all `displayed_strip()` ever
//! returns.
//!
//! Every method takes `&self`, so one controller can be shared behind an
//! `Arc` by HTTP handlers, animation loops and listeners at once.

use crate::StripConfig;
use crate::brightness::{Brightness, build_wire_buffer};
use crate::bus::{ClockSpeed, SimulatedBus, StripBus};
use crate::color::Color;
use crate::error::{DeviceError, LedError, Result};
use crate::events::{EventKind, SubscriptionId};
use crate::render::{RenderHandle, RenderQueue, RenderState, Shared};
use crate::validation::validate_strip;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;

/// Default SPI device on a Raspberry Pi.
pub const DEFAULT_DEVICE_PATH: &str = "/dev/spidev0.0";

// ── Options ──────────────────────────────────────────────────────────

/// Construction-time settings for a [`LedController`].
#[derive(Clone, Debug)]
pub struct ControllerOptions {
    /// Skip the SPI device and simulate writes instead.
    pub debug: bool,
    /// Render after every edit instead of waiting for an explicit `render()`.
    pub automatic_rendering: bool,
    pub clock_speed: ClockSpeed,
    pub device_path: PathBuf,
    /// Idle time after each frame so the strip latches before the next one.
    pub latch_delay: Duration,
    /// How long a simulated write takes in debug mode.
    pub simulated_write_delay: Duration,
}

impl Default for ControllerOptions {
    fn default() -> Self {
        Self {
            debug: false,
            automatic_rendering: false,
            clock_speed: ClockSpeed::default(),
            device_path: PathBuf::from(DEFAULT_DEVICE_PATH),
            latch_delay: Duration::from_millis(10),
            simulated_write_delay: SimulatedBus::DEFAULT_WRITE_DELAY,
        }
    }
}

// ── Controller ───────────────────────────────────────────────────────

pub struct LedController {
    config: StripConfig,
    automatic_rendering: bool,
    pending: Mutex<Vec<Color>>,
    brightness: RwLock<Brightness>,
    clock_speed: Mutex<ClockSpeed>,
    queue: RenderQueue,
    shared: Arc<Shared>,
}

impl LedController {
    /// Open the SPI device (or a simulated one in debug mode) and start the
    /// render thread.
    pub fn new(led_amount: usize, options: ControllerOptions) -> Result<Self> {
        let config = strip_config(led_amount)?;
        let bus: Box<dyn StripBus> = if options.debug {
            tracing::info!("Debug mode: SPI writes are simulated");
            Box::new(SimulatedBus::new(options.simulated_write_delay))
        } else {
            open_hardware_bus(&options)?
        };
        Self::build(config, &options, bus)
    }

    /// Drive a caller-supplied bus instead of opening one. `options.debug`
    /// and `options.device_path` are ignored.
    pub fn with_bus(led_amount: usize, options: ControllerOptions, bus: impl StripBus) -> Result<Self> {
        let config = strip_config(led_amount)?;
        Self::build(config, &options, Box::new(bus))
    }

    fn build(config: StripConfig, options: &ControllerOptions, mut bus: Box<dyn StripBus>) -> Result<Self> {
        bus.set_clock_speed(options.clock_speed)?;

        let black = vec![Color::BLACK; config.led_amount];
        let shared = Arc::new(Shared::new(black.clone().into()));
        let queue = RenderQueue::spawn(bus, shared.clone(), options.latch_delay)?;

        let controller = Self {
            config,
            automatic_rendering: options.automatic_rendering,
            pending: Mutex::new(black),
            brightness: RwLock::new(Brightness::default()),
            clock_speed: Mutex::new(options.clock_speed),
            queue,
            shared,
        };

        tracing::info!(
            "Strip ready: {} leds, {} Hz, automatic rendering {}",
            config.led_amount,
            options.clock_speed.hz(),
            if options.automatic_rendering { "on" } else { "off" }
        );

        // Whatever the strip showed before, start dark.
        let _ = controller.render();

        Ok(controller)
    }

    pub fn config(&self) -> StripConfig {
        self.config
    }

    pub fn automatic_rendering(&self) -> bool {
        self.automatic_rendering
    }

    // ── Edits ────────────────────────────────────────────────────────

    /// Set one pixel. Out-of-range channels saturate.
    pub fn set_pixel(&self, index: usize, color: impl Into<Color>) -> Result<&Self> {
        if index >= self.config.led_amount {
            return Err(LedError::PixelOutOfRange {
                index,
                len: self.config.led_amount,
            });
        }
        let color = color.into();
        Ok(self.edit(|strip| strip[index] = color))
    }

    /// Set every pixel to the same color. Out-of-range channels saturate.
    pub fn fill_all(&self, color: impl Into<Color>) -> &Self {
        let color = color.into();
        self.edit(|strip| strip.fill(color))
    }

    pub fn clear(&self) -> &Self {
        self.fill_all(Color::BLACK)
    }

    /// Replace the whole pending strip with untrusted data.
    ///
    /// Unlike the per-pixel edits nothing is saturated here: a wrong length
    /// or any bad pixel rejects the whole replacement and leaves the strip
    /// untouched.
    pub fn replace_strip(&self, candidate: &[serde_json::Value]) -> Result<&Self> {
        let colors = validate_strip(self.config.led_amount, candidate)?;
        Ok(self.edit(|strip| strip.copy_from_slice(&colors)))
    }

    fn edit(&self, apply: impl FnOnce(&mut [Color])) -> &Self {
        apply(&mut self.pending());
        if self.automatic_rendering {
            let _ = self.render();
        }
        self
    }

    // ── Reads ────────────────────────────────────────────────────────

    /// The strip as last confirmed written to the hardware.
    pub fn displayed_strip(&self) -> Arc<[Color]> {
        self.shared.displayed()
    }

    /// The strip as it will look after the next render.
    pub fn pending_strip(&self) -> Vec<Color> {
        self.pending().clone()
    }

    // ── Brightness ───────────────────────────────────────────────────

    /// Set the global brightness: a [`Brightness`], `"auto"`, or 0-100.
    ///
    /// Invalid input is rejected before anything changes. Nothing is
    /// written to the strip until the next render.
    pub fn set_brightness<B>(&self, value: B) -> Result<&Self>
    where
        B: TryInto<Brightness>,
        LedError: From<B::Error>,
    {
        let brightness: Brightness = value.try_into()?;
        *self
            .brightness
            .write()
            .unwrap_or_else(PoisonError::into_inner) = brightness;

        tracing::debug!("Brightness set to {}", brightness);
        self.shared.events.emit_brightness_changed(brightness);
        Ok(self)
    }

    pub fn brightness(&self) -> Brightness {
        *self.brightness.read().unwrap_or_else(PoisonError::into_inner)
    }

    // ── Rendering ────────────────────────────────────────────────────

    /// Snapshot the pending strip and queue it for writing.
    ///
    /// Returns immediately. The handle resolves once this frame is on the
    /// strip, or with the device error that stopped it.
    pub fn render(&self) -> RenderHandle {
        let pending = self.pending();
        let wire = build_wire_buffer(&pending, self.brightness());
        let snapshot: Arc<[Color]> = Arc::from(pending.as_slice());

        // Still holding the pending lock: queue order is snapshot order.
        let handle = self.queue.submit(snapshot, wire);
        drop(pending);
        handle
    }

    pub fn render_state(&self) -> RenderState {
        self.shared.state()
    }

    /// Frames submitted but not yet picked up by the render thread.
    pub fn pending_writes(&self) -> usize {
        self.shared.pending_writes()
    }

    pub fn frames_written(&self) -> u64 {
        self.shared.frames_written()
    }

    // ── Clock speed ──────────────────────────────────────────────────

    pub fn clock_speed(&self) -> ClockSpeed {
        *self.clock_speed.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Takes effect after the frames already queued.
    pub fn set_clock_speed(&self, speed: ClockSpeed) -> &Self {
        let mut current = self.clock_speed.lock().unwrap_or_else(PoisonError::into_inner);
        *current = speed;
        self.queue.reconfigure(speed);
        self
    }

    // ── Events ───────────────────────────────────────────────────────

    /// Called on the render thread after every successful write, with the
    /// new displayed strip.
    ///
    /// The render thread is blocked until the listener returns. A listener
    /// may call `render()`, but must never wait on the handle it gets back:
    /// that frame is queued behind the write that is notifying it, so
    /// `wait()` would never return.
    pub fn on_strip_changed<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&[Color]) + Send + Sync + 'static,
    {
        self.shared.events.on_strip_changed(callback)
    }

    /// Called on the caller's thread after every `set_brightness`.
    pub fn on_brightness_changed<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(Brightness) + Send + Sync + 'static,
    {
        self.shared.events.on_brightness_changed(callback)
    }

    pub fn remove_listener(&self, id: SubscriptionId) -> bool {
        self.shared.events.remove(id)
    }

    pub fn listener_count(&self, kind: EventKind) -> usize {
        self.shared.events.listener_count(kind)
    }

    fn pending(&self) -> MutexGuard<'_, Vec<Color>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn strip_config(led_amount: usize) -> Result<StripConfig> {
    if led_amount == 0 {
        return Err(LedError::EmptyStrip);
    }
    Ok(StripConfig::new(led_amount))
}

#[cfg(feature = "hardware")]
fn open_hardware_bus(options: &ControllerOptions) -> Result<Box<dyn StripBus>, DeviceError> {
    Ok(Box::new(crate::bus::SpiBus::open(&options.device_path)?))
}

#[cfg(not(feature = "hardware"))]
fn open_hardware_bus(options: &ControllerOptions) -> Result<Box<dyn StripBus>, DeviceError> {
    Err(DeviceError::Unavailable {
        path: options.device_path.clone(),
        source: std::io::Error::new(
            std::io::ErrorKind::Unsupported,
            "built without the `hardware` feature",
        ),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::FrameLog;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const LEDS: usize = 10;
    const SAMPLE: Color = Color::new(255, 155, 55);

    fn options() -> ControllerOptions {
        ControllerOptions {
            latch_delay: Duration::ZERO,
            simulated_write_delay: Duration::from_millis(1),
            ..ControllerOptions::default()
        }
    }

    fn simulated_with(options: ControllerOptions, write_delay: Duration) -> (LedController, FrameLog) {
        let bus = SimulatedBus::new(write_delay);
        let log = bus.log();
        (LedController::with_bus(LEDS, options, bus).unwrap(), log)
    }

    fn simulated() -> (LedController, FrameLog) {
        simulated_with(options(), Duration::from_millis(1))
    }

    fn all(color: Color) -> Vec<Color> {
        vec![color; LEDS]
    }

    #[test]
    fn rejects_empty_strip() {
        let result = LedController::with_bus(0, options(), SimulatedBus::new(Duration::ZERO));
        assert!(matches!(result, Err(LedError::EmptyStrip)));
    }

    #[test]
    fn missing_device_is_unavailable() {
        let options = ControllerOptions {
            device_path: PathBuf::from("/nonexistent/spidev9.9"),
            ..options()
        };
        let result = LedController::new(LEDS, options);
        assert!(matches!(
            result,
            Err(LedError::Device(DeviceError::Unavailable { .. }))
        ));
    }

    #[tokio::test]
    async fn debug_mode_simulates_the_bus() {
        let options = ControllerOptions {
            debug: true,
            ..options()
        };
        let controller = LedController::new(LEDS, options).unwrap();
        controller.fill_all(SAMPLE).render().await.unwrap();
        assert_eq!(&*controller.displayed_strip(), all(SAMPLE).as_slice());
    }

    #[tokio::test]
    async fn starts_dark_with_one_black_frame() {
        let (controller, log) = simulated();
        assert_eq!(&*controller.displayed_strip(), all(Color::BLACK).as_slice());

        controller.render().await.unwrap();
        assert_eq!(log.frames(), vec![vec![0; LEDS * 3]; 2]);
    }

    #[tokio::test]
    async fn fill_then_render_shows_the_color() {
        let (controller, _log) = simulated();
        controller.fill_all(SAMPLE).render().await.unwrap();
        assert_eq!(&*controller.displayed_strip(), all(SAMPLE).as_slice());
    }

    #[tokio::test]
    async fn clear_then_render_turns_everything_off() {
        let (controller, _log) = simulated();
        controller.fill_all(SAMPLE).render().await.unwrap();
        controller.clear().render().await.unwrap();
        assert_eq!(&*controller.displayed_strip(), all(Color::BLACK).as_slice());
    }

    #[tokio::test]
    async fn set_pixel_changes_only_that_pixel() {
        let (controller, _log) = simulated();
        controller.set_pixel(4, SAMPLE).unwrap().render().await.unwrap();

        let strip = controller.displayed_strip();
        assert_eq!(strip[4], SAMPLE);
        for (index, pixel) in strip.iter().enumerate().filter(|(i, _)| *i != 4) {
            assert_eq!(*pixel, Color::BLACK, "pixel {index}");
        }
    }

    #[test]
    fn set_pixel_saturates_channels() {
        let (controller, _log) = simulated();
        controller.set_pixel(0, (300, -20, 128)).unwrap();
        controller.fill_all((-1, 256, 1000));

        assert_eq!(controller.pending_strip(), all(Color::new(0, 255, 255)));
        controller.set_pixel(1, (300, -20, 128)).unwrap();
        assert_eq!(controller.pending_strip()[1], Color::new(255, 0, 128));
    }

    #[test]
    fn set_pixel_out_of_range_changes_nothing() {
        let (controller, _log) = simulated();
        let err = controller.set_pixel(LEDS, SAMPLE).err().unwrap();
        assert!(matches!(err, LedError::PixelOutOfRange { index: LEDS, len: LEDS }));
        assert_eq!(controller.pending_strip(), all(Color::BLACK));
    }

    #[tokio::test]
    async fn replace_strip_with_wrong_length_changes_nothing() {
        let (controller, _log) = simulated();
        controller.fill_all(SAMPLE).render().await.unwrap();

        let candidate = vec![json!({"red": 1, "green": 2, "blue": 3}); LEDS - 1];
        let err = controller.replace_strip(&candidate).err().unwrap();

        let message = err.to_string();
        assert!(matches!(err, LedError::Validation(_)));
        assert!(message.contains("10") && message.contains("9"), "{message}");
        assert_eq!(controller.pending_strip(), all(SAMPLE));
        assert_eq!(&*controller.displayed_strip(), all(SAMPLE).as_slice());
    }

    #[test]
    fn replace_strip_lists_every_invalid_pixel() {
        let (controller, _log) = simulated();
        let mut candidate = vec![json!({"red": 1, "green": 2, "blue": 3}); LEDS];
        candidate[2] = json!(null);
        candidate[5] = json!({"red": 1, "green": "2", "blue": 3});
        candidate[9] = json!({"red": 1, "green": 2, "blue": 256});

        let Err(LedError::Validation(err)) = controller.replace_strip(&candidate) else {
            panic!("expected a validation error");
        };
        assert_eq!(err.invalid_indices(), vec![2, 5, 9]);
        assert_eq!(controller.pending_strip(), all(Color::BLACK));
    }

    #[tokio::test]
    async fn replace_strip_then_render() {
        let (controller, _log) = simulated();
        let candidate: Vec<_> = (0..LEDS as u8)
            .map(|i| json!({"red": i, "green": 0, "blue": 255 - i}))
            .collect();

        controller.replace_strip(&candidate).unwrap().render().await.unwrap();

        let expected: Vec<_> = (0..LEDS as u8).map(|i| Color::new(i, 0, 255 - i)).collect();
        assert_eq!(&*controller.displayed_strip(), expected.as_slice());
    }

    #[tokio::test]
    async fn edits_are_invisible_until_rendered() {
        let (controller, _log) = simulated_with(options(), Duration::from_millis(50));
        controller.fill_all(SAMPLE).render().await.unwrap();

        controller.fill_all(Color::new(0, 0, 255));
        assert_eq!(&*controller.displayed_strip(), all(SAMPLE).as_slice());

        let handle = controller.render();
        assert_eq!(&*controller.displayed_strip(), all(SAMPLE).as_slice());

        handle.await.unwrap();
        assert_eq!(&*controller.displayed_strip(), all(Color::new(0, 0, 255)).as_slice());
    }

    #[tokio::test]
    async fn brightness_is_applied_only_on_the_wire() {
        let (controller, log) = simulated();

        controller.fill_all(SAMPLE).render().await.unwrap();
        assert_eq!(log.last_frame().unwrap()[..3], [255, 155, 55]);

        controller.set_brightness(50).unwrap();
        controller.render().await.unwrap();
        assert_eq!(log.last_frame().unwrap()[..3], [128, 78, 28]);
        assert_eq!(&*controller.displayed_strip(), all(SAMPLE).as_slice());

        controller.set_brightness("auto").unwrap();
        controller.render().await.unwrap();
        assert_eq!(log.last_frame().unwrap()[..3], [255, 155, 55]);
    }

    #[test]
    fn brightness_does_not_render_by_itself() {
        let options = ControllerOptions {
            automatic_rendering: true,
            ..options()
        };
        let (controller, log) = simulated_with(options, Duration::ZERO);
        controller.render().wait().unwrap();
        let before = log.frames().len();

        controller.set_brightness(10).unwrap();
        std::thread::sleep(Duration::from_millis(20));

        assert_eq!(log.frames().len(), before);
        assert_eq!(controller.render_state(), RenderState::Idle);
    }

    #[test]
    fn invalid_brightness_is_rejected_without_change() {
        let (controller, _log) = simulated();
        controller.set_brightness(40).unwrap();

        let fired = Arc::new(AtomicUsize::new(0));
        let f = fired.clone();
        controller.on_brightness_changed(move |_| {
            f.fetch_add(1, Ordering::SeqCst);
        });

        assert!(matches!(controller.set_brightness(-1), Err(LedError::Brightness(_))));
        assert!(matches!(controller.set_brightness(101), Err(LedError::Brightness(_))));
        assert!(matches!(controller.set_brightness("aut"), Err(LedError::Brightness(_))));

        assert_eq!(controller.brightness(), Brightness::Level(40));
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn brightness_listener_receives_new_value() {
        let (controller, _log) = simulated();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        controller.on_brightness_changed(move |b| s.lock().unwrap().push(b));

        controller.set_brightness(25).unwrap();
        controller.set_brightness(Brightness::Auto).unwrap();

        assert_eq!(*seen.lock().unwrap(), vec![Brightness::Level(25), Brightness::Auto]);
        assert_eq!(controller.brightness(), Brightness::Auto);
    }

    #[tokio::test]
    async fn strip_listener_fires_once_per_render_until_removed() {
        let (controller, _log) = simulated();
        controller.render().await.unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        let id = controller.on_strip_changed(move |strip| s.lock().unwrap().push(strip.to_vec()));

        controller.fill_all(SAMPLE).render().await.unwrap();
        controller.clear().render().await.unwrap();
        assert_eq!(*seen.lock().unwrap(), vec![all(SAMPLE), all(Color::BLACK)]);

        assert!(controller.remove_listener(id));
        controller.fill_all(SAMPLE).render().await.unwrap();
        assert_eq!(seen.lock().unwrap().len(), 2);
        assert_eq!(controller.listener_count(EventKind::StripChanged), 0);
    }

    #[tokio::test]
    async fn strip_listeners_run_on_the_render_thread() {
        let (controller, _log) = simulated();
        controller.render().await.unwrap();

        let threads = Arc::new(Mutex::new(Vec::new()));
        let t = threads.clone();
        controller.on_strip_changed(move |_| {
            t.lock()
                .unwrap()
                .push(std::thread::current().name().map(str::to_owned));
        });

        controller.fill_all(SAMPLE).render().await.unwrap();
        assert_eq!(*threads.lock().unwrap(), vec![Some("led-render".to_string())]);
    }

    #[tokio::test]
    async fn rapid_renders_all_resolve_in_order() {
        let (controller, log) = simulated();
        controller.render().await.unwrap();
        let before = log.frames().len();

        let handles: Vec<_> = (0..10u8)
            .map(|i| controller.fill_all(Color::new(i * 20, 0, 0)).render())
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }

        let reds: Vec<u8> = log.frames()[before..].iter().map(|f| f[0]).collect();
        assert_eq!(reds, (0..10u8).map(|i| i * 20).collect::<Vec<_>>());
        assert_eq!(&*controller.displayed_strip(), all(Color::new(180, 0, 0)).as_slice());
        assert_eq!(controller.render_state(), RenderState::Idle);
    }

    #[tokio::test]
    async fn concurrent_renders_from_many_tasks() {
        let (controller, _log) = simulated();
        let controller = Arc::new(controller);
        controller.render().await.unwrap();
        let before = controller.frames_written();

        let tasks: Vec<_> = [Color::BLACK, SAMPLE, SAMPLE]
            .into_iter()
            .map(|color| {
                let controller = controller.clone();
                tokio::spawn(async move {
                    for _ in 0..10 {
                        controller.fill_all(color).render().await.unwrap();
                    }
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(controller.frames_written() - before, 30);
        controller.fill_all(SAMPLE).render().await.unwrap();
        assert_eq!(controller.displayed_strip()[5], SAMPLE);
    }

    #[tokio::test]
    async fn device_failure_rejects_render_and_keeps_last_good_strip() {
        let (controller, log) = simulated();
        controller.fill_all(SAMPLE).render().await.unwrap();

        log.set_fail_writes(true);
        let result = controller.clear().render().await;
        assert!(matches!(result, Err(DeviceError::Simulated(_))));
        assert_eq!(&*controller.displayed_strip(), all(SAMPLE).as_slice());

        log.set_fail_writes(false);
        controller.render().await.unwrap();
        assert_eq!(&*controller.displayed_strip(), all(Color::BLACK).as_slice());
    }

    #[tokio::test]
    async fn automatic_rendering_renders_each_edit() {
        let options = ControllerOptions {
            automatic_rendering: true,
            ..options()
        };
        let (controller, log) = simulated_with(options, Duration::from_millis(1));

        controller.fill_all(SAMPLE);
        controller.set_pixel(0, Color::BLACK).unwrap();
        // FIFO: once this explicit frame is out, both automatic ones are too.
        controller.render().await.unwrap();

        let frames = log.frames();
        assert_eq!(frames.len(), 4);
        assert_eq!(frames[1][..3], [255, 155, 55]);
        assert_eq!(frames[2][..3], [0, 0, 0]);
        assert_eq!(controller.displayed_strip()[0], Color::BLACK);
        assert_eq!(controller.displayed_strip()[1], SAMPLE);
    }

    #[tokio::test]
    async fn clock_speed_is_persisted_and_applied_in_order() {
        let (controller, log) = simulated();
        assert_eq!(controller.clock_speed(), ClockSpeed::Mhz2);

        controller.set_clock_speed(ClockSpeed::Mhz8);
        assert_eq!(controller.clock_speed(), ClockSpeed::Mhz8);

        controller.render().await.unwrap();
        assert_eq!(log.clock_speeds(), vec![ClockSpeed::Mhz2, ClockSpeed::Mhz8]);
    }
}
