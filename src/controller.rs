//! Periodic scheduling, NG/OK classification, single-shot retries, error recovery.

use async_trait::async_trait;
use log::error;

use crate::error::OscilokError;
use crate::ng_state::NgState;
use crate::scope::DualChannelSource;
use crate::waveform::{Wave, WaveType};

pub const POLLING_TIME_MS: u64 = 500;
pub const MIN_VOLT_P2P: f64 = 2.5;
pub const SINGLE_READ_TRY_COUNT: u32 = 6;

/// The host-provided re-arm surface; the core never sleeps or spawns timers
/// itself, it asks the host to call it back.
#[async_trait]
pub trait Scheduler: Send {
    async fn schedule_after(&mut self, ms: u64);
}

/// UI callback surface: per-channel text, device status, NG token, button state.
pub trait UiCallbacks: Send {
    fn channels(&mut self, ch1: &str, ch2: &str);
    fn device(&mut self, text: &str);
    fn ng(&mut self, state: NgState);
    fn reading(&mut self, label: &str);
    fn disable_buttons(&mut self, disabled: bool);
    fn beep_short(&mut self) {}
    fn beep_long(&mut self) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Idle,
    Polling,
}

/// The tick's outcome: how long until the next tick should run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextSchedule {
    Normal,
    Delayed,
    Stopped,
}

impl NextSchedule {
    /// Milliseconds until the next tick, or `None` if polling has stopped.
    pub fn delay_ms(&self) -> Option<u64> {
        match self {
            NextSchedule::Normal => Some(POLLING_TIME_MS),
            NextSchedule::Delayed => Some(POLLING_TIME_MS + 2000),
            NextSchedule::Stopped => None,
        }
    }
}

pub struct Controller<S: DualChannelSource> {
    mode: Mode,
    single_shot: bool,
    scope: Option<S>,
    ok_count: u32,
    ng_count: u32,
    single_read_try_count: u32,
}

impl<S: DualChannelSource> Default for Controller<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: DualChannelSource> Controller<S> {
    pub fn new() -> Self {
        Controller {
            mode: Mode::Idle,
            single_shot: false,
            scope: None,
            ok_count: 0,
            ng_count: 0,
            single_read_try_count: 0,
        }
    }

    pub fn is_polling(&self) -> bool {
        self.mode == Mode::Polling
    }

    /// Start/stop continuous polling.
    pub fn toggle(&mut self, ui: &mut dyn UiCallbacks) -> NextSchedule {
        match self.mode {
            Mode::Idle => {
                self.mode = Mode::Polling;
                self.single_shot = false;
                self.clear_single_count();
                ui.reading("Stop");
                NextSchedule::Normal
            }
            Mode::Polling => {
                self.mode = Mode::Idle;
                self.scope = None;
                ui.ng(NgState::Stop);
                ui.reading("Start");
                NextSchedule::Stopped
            }
        }
    }

    /// Start a bounded single-shot run.
    pub fn single(&mut self, ui: &mut dyn UiCallbacks) -> NextSchedule {
        self.mode = Mode::Polling;
        self.single_shot = true;
        self.ok_count = 0;
        self.ng_count = 0;
        self.single_read_try_count = SINGLE_READ_TRY_COUNT;
        ui.disable_buttons(true);
        NextSchedule::Normal
    }

    fn clear_single_count(&mut self) {
        self.single_read_try_count = 0;
    }

    /// Decrements the single-shot retry budget; returns `true` if a retry is
    /// still allowed, `false` once the budget is exhausted.
    fn consume_single_retry(&mut self, ui: &mut dyn UiCallbacks) -> bool {
        if !self.single_shot {
            return true;
        }
        if self.single_read_try_count == 0 {
            return true;
        }
        self.single_read_try_count -= 1;
        if self.single_read_try_count == 1 {
            self.ng(ui, Some("Cannot get sine wave"));
            self.stop_single();
            return false;
        }
        true
    }

    fn stop_single(&mut self) {
        self.mode = Mode::Idle;
        self.scope = None;
    }

    async fn ensure_scope(&mut self, open: impl std::future::Future<Output = crate::error::Result<S>>) -> crate::error::Result<()> {
        if self.scope.is_none() {
            self.scope = Some(open.await?);
        }
        Ok(())
    }

    /// Run one tick. `open_scope` is invoked only when the controller does
    /// not already hold an open scope (e.g. after a previous tick closed it).
    pub async fn tick<F, Fut>(&mut self, ui: &mut dyn UiCallbacks, open_scope: F) -> NextSchedule
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = crate::error::Result<S>>,
    {
        if self.mode != Mode::Polling {
            return NextSchedule::Stopped;
        }

        if let Err(err) = self.ensure_scope(open_scope()).await {
            return self.handle_error(ui, err);
        }

        let scope = self.scope.as_mut().expect("scope ensured above");
        let dual = scope.dual().await;

        match dual {
            Ok((wave1, wave2)) => {
                if wave1.dots.is_empty() {
                    ui.channels("-", "-");
                    ui.device("No CH1");
                    ui.ng(NgState::Progress);
                    return NextSchedule::Normal;
                }
                if wave2.dots.is_empty() {
                    ui.channels("-", "-");
                    ui.device("No CH2");
                    ui.ng(NgState::Progress);
                    return NextSchedule::Normal;
                }
                self.check_wave(ui, wave1, wave2)
            }
            Err(err) => self.handle_error(ui, err),
        }
    }

    fn handle_error(&mut self, ui: &mut dyn UiCallbacks, err: OscilokError) -> NextSchedule {
        match err {
            OscilokError::DeviceNotFound => {
                ui.device("Device not found");
                ui.ng(NgState::Stop);
                ui.disable_buttons(false);
                self.clear_single_count();
                NextSchedule::Delayed
            }
            OscilokError::SampleLost => {
                ui.device("Sample lost");
                ui.ng(NgState::Stop);
                NextSchedule::Delayed
            }
            OscilokError::Oscilloscope(msg) => {
                ui.device(&msg);
                ui.ng(NgState::Stop);
                self.clear_single_count();
                self.scope = None;
                NextSchedule::Normal
            }
            OscilokError::Timeout => {
                ui.device("USB timeout");
                ui.ng(NgState::Stop);
                self.clear_single_count();
                self.scope = None;
                ui.disable_buttons(false);
                NextSchedule::Normal
            }
            OscilokError::NoBackend | OscilokError::Usb(_) => {
                error!("fatal USB error: {err}");
                ui.device("Fatal USB error");
                self.mode = Mode::Idle;
                NextSchedule::Stopped
            }
        }
    }

    fn check_wave(&mut self, ui: &mut dyn UiCallbacks, wave1: Wave, wave2: Wave) -> NextSchedule {
        let ch1_text = format_channel(1, &wave1);
        let ch2_text = format_channel(2, &wave2);
        ui.channels(&ch1_text, &ch2_text);

        if wave1.typ == WaveType::Unknown || wave2.typ == WaveType::Unknown {
            self.ok_count = 0;
            self.ng_count = 0;
            if !self.consume_single_retry(ui) {
                return NextSchedule::Stopped;
            }
            ui.ng(NgState::Progress);
            return NextSchedule::Normal;
        }

        let (sine, square) = match classify_pair(&wave1, &wave2) {
            Some(pair) => pair,
            None => {
                if !self.consume_single_retry(ui) {
                    return NextSchedule::Stopped;
                }
                ui.ng(NgState::Progress);
                return NextSchedule::Normal;
            }
        };

        if let Some(vpp) = sine.vpp
            && vpp < MIN_VOLT_P2P
        {
            return self.ng(ui, Some("Low voltage"));
        }

        if !crate::waveform::is_top_sine_inside_top_square(&sine.dots, &square.dots) {
            return self.ng(ui, Some("Not Sync"));
        }

        self.ok(ui)
    }

    fn ok(&mut self, ui: &mut dyn UiCallbacks) -> NextSchedule {
        self.ng_count = 0;
        self.ok_count += 1;
        if self.ok_count == 1 {
            ui.beep_short();
        }
        let seconds = self.ok_count / (1000 / POLLING_TIME_MS as u32);
        ui.device(&format!("OK time: {seconds} seconds"));
        ui.ng(NgState::Ok);
        if self.single_shot {
            self.stop_single();
            return NextSchedule::Stopped;
        }
        NextSchedule::Normal
    }

    fn ng(&mut self, ui: &mut dyn UiCallbacks, reason: Option<&str>) -> NextSchedule {
        self.ok_count = 0;
        self.ng_count += 1;
        if self.ng_count == 1 {
            ui.beep_long();
        }
        match reason {
            Some(text) => ui.device(text),
            None => {
                let seconds = self.ng_count / (1000 / POLLING_TIME_MS as u32);
                ui.device(&format!("NG time: {seconds} seconds"));
            }
        }
        ui.ng(NgState::Ng);
        if self.single_shot {
            self.stop_single();
            return NextSchedule::Stopped;
        }
        NextSchedule::Normal
    }
}

fn format_channel(n: u8, wave: &Wave) -> String {
    let typ = match wave.typ {
        WaveType::Unknown => "UNKNOWN",
        WaveType::Sine => "SINE",
        WaveType::Square => "SQUARE",
    };
    match wave.vpp {
        Some(vpp) => format!("ch{n}:{typ}({}) Vp-p: {vpp} V", wave.dots.len()),
        None => format!("ch{n}:{typ}({})", wave.dots.len()),
    }
}

/// Identify which wave is the sine candidate and which is the square
/// candidate. Returns `None` if neither wave classified as SINE.
fn classify_pair<'a>(wave1: &'a Wave, wave2: &'a Wave) -> Option<(&'a Wave, &'a Wave)> {
    if wave1.typ == WaveType::Sine {
        Some((wave1, wave2))
    } else if wave2.typ == WaveType::Sine {
        Some((wave2, wave1))
    } else {
        None
    }
}
