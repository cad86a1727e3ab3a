//! Serial control-panel reader: three joysticks (x, y, button), each line sanitized, parsed,
//! baseline-calibrated, smoothed and debounced on a dedicated reader thread; the result is
//! published as a snapshot any thread can poll.
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::Mutex;

use crate::comm::serial::{self, SerialConfig};
use crate::comm::Client;
use crate::component::{Component, ComponentState};
use crate::config::ControlPanelConfig;
use crate::types::{JoystickStatus, RobotComponent};
use crate::{Error, Result};

/// Normalized x/y/button reading for all three joysticks, in declaration order.
#[derive(Debug, Clone, Copy, Default)]
pub struct Snapshot {
    /// one entry per joystick (gantry, left arm, right arm — see [`crate::types::Arm`])
    pub joysticks: [JoystickStatus; 3],
}

struct ProcessingState {
    x_window: [Vec<f64>; 3],
    y_window: [Vec<f64>; 3],
    x_window_sum: [f64; 3],
    y_window_sum: [f64; 3],
    baseline_x: [f64; 3],
    baseline_y: [f64; 3],
    baseline_x_acc: [f64; 3],
    baseline_y_acc: [f64; 3],
    baseline_count: usize,
    baseline_ready: bool,
    b_stable: [bool; 3],
    b_pending: [bool; 3],
    b_pending_count: [usize; 3],
}

impl Default for ProcessingState {
    fn default() -> Self {
        Self {
            x_window: Default::default(),
            y_window: Default::default(),
            x_window_sum: [0.0; 3],
            y_window_sum: [0.0; 3],
            baseline_x: [512.0; 3],
            baseline_y: [512.0; 3],
            baseline_x_acc: [0.0; 3],
            baseline_y_acc: [0.0; 3],
            baseline_count: 0,
            baseline_ready: false,
            b_stable: [false; 3],
            b_pending: [false; 3],
            b_pending_count: [0; 3],
        }
    }
}

fn clip_to_unit_range(value: f64) -> f64 {
    value.clamp(-1.0, 1.0)
}

fn sanitize_line(line: &str) -> &str {
    line.trim_matches(|c| c == '\r' || c == '\n' || c == '\0')
}

/// Parse `x0 y0 b0 x1 y1 b1 x2 y2 b2`. Returns `None` (logged) on any malformed or out-of-range
/// token.
fn parse_line(line: &str) -> Option<([f64; 3], [f64; 3], [bool; 3])> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    if tokens.len() != 9 {
        log::warn!("ControlPanel malformed line (expected 9 fields): '{}'", line);
        return None;
    }
    let mut x_raw = [0.0; 3];
    let mut y_raw = [0.0; 3];
    let mut b = [false; 3];
    for i in 0..3 {
        let parse = |s: &str| s.parse::<i32>();
        let (xv, yv, bv) = match (parse(tokens[3 * i]), parse(tokens[3 * i + 1]), parse(tokens[3 * i + 2])) {
            (Ok(x), Ok(y), Ok(b)) => (x, y, b),
            _ => {
                log::warn!("ControlPanel invalid numeric format in line: '{}'", line);
                return None;
            }
        };
        if !(0..=1023).contains(&xv) || !(0..=1023).contains(&yv) || (bv != 0 && bv != 1) {
            log::warn!("ControlPanel invalid values in line: '{}'", line);
            return None;
        }
        x_raw[i] = f64::from(xv);
        y_raw[i] = f64::from(yv);
        b[i] = bv == 1;
    }
    Some((x_raw, y_raw, b))
}

fn process_line(
    line: &str,
    state: &mut ProcessingState,
    moving_average_depth: usize,
    baseline_samples: usize,
    button_debounce_samples: usize,
    snapshot: &Mutex<Snapshot>,
) {
    let Some((x_raw, y_raw, b)) = parse_line(line) else { return };

    if !state.baseline_ready {
        for i in 0..3 {
            state.baseline_x_acc[i] += x_raw[i];
            state.baseline_y_acc[i] += y_raw[i];
        }
        state.baseline_count += 1;
        if state.baseline_count >= baseline_samples {
            for i in 0..3 {
                state.baseline_x[i] = state.baseline_x_acc[i] / state.baseline_count as f64;
                state.baseline_y[i] = state.baseline_y_acc[i] / state.baseline_count as f64;
            }
            state.baseline_ready = true;
            log::info!(
                "ControlPanel baseline ready after {} samples. X:{:?} Y:{:?}",
                state.baseline_count, state.baseline_x, state.baseline_y
            );
        }
    }

    let mut out = *snapshot.lock();
    for i in 0..3 {
        state.x_window[i].push(x_raw[i]);
        state.x_window_sum[i] += x_raw[i];
        if state.x_window[i].len() > moving_average_depth {
            state.x_window_sum[i] -= state.x_window[i].remove(0);
        }
        state.y_window[i].push(y_raw[i]);
        state.y_window_sum[i] += y_raw[i];
        if state.y_window[i].len() > moving_average_depth {
            state.y_window_sum[i] -= state.y_window[i].remove(0);
        }

        let x_filtered = state.x_window_sum[i] / state.x_window[i].len() as f64;
        let y_filtered = state.y_window_sum[i] / state.y_window[i].len() as f64;

        let (mut x_out, mut y_out) = (0.0, 0.0);
        if state.baseline_ready {
            x_out = clip_to_unit_range((x_filtered - state.baseline_x[i]) / 512.0);
            y_out = clip_to_unit_range((y_filtered - state.baseline_y[i]) / 512.0);
        }

        if b[i] == state.b_stable[i] {
            state.b_pending[i] = state.b_stable[i];
            state.b_pending_count[i] = 0;
        } else {
            if b[i] == state.b_pending[i] {
                state.b_pending_count[i] += 1;
            } else {
                state.b_pending[i] = b[i];
                state.b_pending_count[i] = 1;
            }
            if state.b_pending_count[i] >= button_debounce_samples {
                state.b_stable[i] = state.b_pending[i];
                state.b_pending_count[i] = 0;
            }
        }

        out.joysticks[i] = JoystickStatus { x: x_out, y: y_out, btn: state.b_stable[i] };
    }
    *snapshot.lock() = out;
}

/// Serial control-panel reader.
pub struct ControlPanel {
    serial: SerialConfig,
    terminator: u8,
    moving_average_depth: usize,
    baseline_samples: usize,
    button_debounce_samples: usize,
    snapshot: Arc<Mutex<Snapshot>>,
    running: Arc<AtomicBool>,
    reader: Mutex<Option<JoinHandle<()>>>,
    client: Mutex<Option<Client>>,
    state: Mutex<ComponentState>,
}

impl ControlPanel {
    /// Build a ControlPanel instance from its configuration section. Does not connect.
    pub fn new(cfg: &ControlPanelConfig) -> Result<Self> {
        let terminator = cfg.comm.serial.terminator_byte()?;
        if cfg.comm.kind != "serial" {
            return Err(Error::config(format!("unsupported ControlPanel.comm.type '{}': only serial is supported", cfg.comm.kind)));
        }
        Ok(Self {
            serial: SerialConfig {
                device: cfg.comm.serial.port.clone(),
                baud: cfg.comm.serial.baud_rate,
                data_bits: cfg.comm.serial.character_size,
                parity: cfg.comm.serial.parity,
                stop_bits: cfg.comm.serial.stop_bits,
                read_timeout: std::time::Duration::from_millis(cfg.comm.serial.read_timeout_ms),
                frame_delay: std::time::Duration::ZERO,
            },
            terminator,
            moving_average_depth: cfg.processing.moving_average_depth,
            baseline_samples: cfg.processing.baseline_samples,
            button_debounce_samples: cfg.processing.button_debounce_samples,
            snapshot: Arc::new(Mutex::new(Snapshot::default())),
            running: Arc::new(AtomicBool::new(false)),
            reader: Mutex::new(None),
            client: Mutex::new(None),
            state: Mutex::new(ComponentState::Error),
        })
    }

    /// The most recently published joystick snapshot.
    pub fn snapshot(&self) -> Snapshot {
        *self.snapshot.lock()
    }

    fn join_reader(&self) {
        self.running.store(false, Ordering::Relaxed);
        if let Some(handle) = self.reader.lock().take() {
            let _ = handle.join();
        }
    }
}

impl Component for ControlPanel {
    fn component_type(&self) -> RobotComponent {
        RobotComponent::ControlPanel
    }

    fn initialize(&self) -> Result<()> {
        self.reset();
        let client = serial::connect(self.serial.clone())?;
        // probe the connection eagerly so initialize() fails fast, matching open()-on-init
        if let Err(e) = client.write(&[]) {
            *self.state.lock() = ComponentState::Error;
            return Err(e);
        }

        *self.snapshot.lock() = Snapshot::default();
        self.running.store(true, Ordering::Relaxed);

        let running = Arc::clone(&self.running);
        let snapshot = Arc::clone(&self.snapshot);
        let terminator = self.terminator;
        let moving_average_depth = self.moving_average_depth;
        let baseline_samples = self.baseline_samples;
        let button_debounce_samples = self.button_debounce_samples;
        let reader_client = client.clone();

        let handle = std::thread::Builder::new()
            .name("control-panel-reader".to_owned())
            .spawn(move || {
                let mut processing = ProcessingState::default();
                while running.load(Ordering::Relaxed) {
                    match reader_client.read_line(terminator) {
                        Ok(None) => continue,
                        Ok(Some(line)) => {
                            if !running.load(Ordering::Relaxed) {
                                break;
                            }
                            let line = sanitize_line(&line);
                            if line.is_empty() {
                                continue;
                            }
                            process_line(line, &mut processing, moving_average_depth, baseline_samples, button_debounce_samples, &snapshot);
                        }
                        Err(e) => {
                            log::error!("ControlPanel communication read failed: {}", e);
                            running.store(false, Ordering::Relaxed);
                            reader_client.reset();
                            break;
                        }
                    }
                }
            })
            .expect("failed to spawn control-panel-reader thread");

        *self.client.lock() = Some(client);
        *self.reader.lock() = Some(handle);
        *self.state.lock() = ComponentState::Normal;
        Ok(())
    }

    fn reset(&self) {
        *self.state.lock() = ComponentState::Error;
        self.join_reader();
        if let Some(client) = self.client.lock().take() {
            client.reset();
        }
    }

    fn state(&self) -> ComponentState {
        // the reader thread demotes to Error on its own on a read failure; reflect that here
        // without requiring a poll from the caller.
        if !self.running.load(Ordering::Relaxed) && *self.state.lock() == ComponentState::Normal {
            *self.state.lock() = ComponentState::Error;
        }
        *self.state.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn baseline_then_center_reading_is_zero() {
        let snapshot = Mutex::new(Snapshot::default());
        let mut processing = ProcessingState::default();
        for _ in 0..5 {
            process_line("512 512 0 512 512 0 512 512 0", &mut processing, 5, 5, 3, &snapshot);
        }
        let s = snapshot.lock();
        assert!((s.joysticks[0].x).abs() < 1e-9);
        assert!((s.joysticks[0].y).abs() < 1e-9);
    }

    #[test]
    fn pushed_stick_normalizes_toward_positive_one() {
        let snapshot = Mutex::new(Snapshot::default());
        let mut processing = ProcessingState::default();
        for _ in 0..5 {
            process_line("512 512 0 512 512 0 512 512 0", &mut processing, 5, 5, 3, &snapshot);
        }
        for _ in 0..5 {
            process_line("1023 1023 0 512 512 0 512 512 0", &mut processing, 5, 5, 3, &snapshot);
        }
        assert!(snapshot.lock().joysticks[0].x > 0.9);
    }

    #[test]
    fn button_requires_consecutive_samples_to_flip() {
        let snapshot = Mutex::new(Snapshot::default());
        let mut processing = ProcessingState::default();
        process_line("0 0 1 0 0 0 0 0 0", &mut processing, 5, 1, 3, &snapshot);
        assert!(!snapshot.lock().joysticks[0].btn);
        process_line("0 0 1 0 0 0 0 0 0", &mut processing, 5, 1, 3, &snapshot);
        process_line("0 0 1 0 0 0 0 0 0", &mut processing, 5, 1, 3, &snapshot);
        assert!(snapshot.lock().joysticks[0].btn);
    }

    #[test]
    fn malformed_line_is_ignored() {
        let snapshot = Mutex::new(Snapshot::default());
        let mut processing = ProcessingState::default();
        process_line("not enough fields", &mut processing, 5, 5, 3, &snapshot);
        assert_eq!(processing.baseline_count, 0);
    }
}
