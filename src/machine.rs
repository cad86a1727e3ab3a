//! The Machine orchestrator: owns every hardware component, runs the fixed-cadence control
//! loop, the command server, status publication and the control-panel reader thread (the last
//! one spawned internally by [`ControlPanel`]), and coordinates startup and graceful shutdown.
use std::cell::Cell;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde_json::json;
use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook::iterator::Signals;

use crate::clock::SystemClock;
use crate::command::Command;
use crate::command_queue::CommandQueue;
use crate::command_server::CommandServer;
use crate::component::Component;
use crate::config::{Config, RimoServerConfig};
use crate::contec::Contec;
use crate::control_loop::ControlLoopRunner;
use crate::control_panel::ControlPanel;
use crate::motor_control::MotorControl;
use crate::policy::RobotControlPolicy;
use crate::status::StatusBuilder;
use crate::transport::{self, CommandEndpoint, StatusPublisher};
use crate::types::{Arm, RobotComponent, ToolChangerAction};
use crate::{Error, Result};

/// How long the command REP socket blocks per poll; bounds command-server shutdown latency.
const COMMAND_RECEIVE_TIMEOUT: Duration = Duration::from_millis(200);
/// Upper bound on joining every thread during shutdown.
const SHUTDOWN_JOIN_TIMEOUT: Duration = Duration::from_secs(2);

struct PendingCommand {
    command: Command,
    reply: oneshot::Sender<Result<String>>,
}

/// Owns every hardware subsystem and drives the long-lived threads.
pub struct Machine {
    contec: Arc<Contec>,
    control_panel: Arc<ControlPanel>,
    motor_control: Arc<MotorControl>,
    policy: Arc<dyn RobotControlPolicy + Send + Sync>,
    status_builder: Arc<StatusBuilder>,
    rimo_server: RimoServerConfig,
    loop_interval: Duration,
    update_interval: Duration,
    input_mapping: Arc<BTreeMap<String, usize>>,
    output_mapping: Arc<BTreeMap<String, usize>>,
    command_queue: Arc<CommandQueue<PendingCommand>>,
    running: Arc<AtomicBool>,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl Machine {
    /// Build every component from the loaded configuration. Does not connect to hardware or
    /// bind any sockets; call [`Machine::run`] to do both.
    pub fn new(config: &Config) -> Result<Self> {
        let motor_ids = config.motor_control.motors.keys().copied().collect();
        Ok(Self {
            contec: Arc::new(Contec::new(&config.contec)),
            control_panel: Arc::new(ControlPanel::new(&config.control_panel)?),
            motor_control: Arc::new(MotorControl::new(&config.motor_control)),
            policy: Arc::new(crate::policy::RimoKunPolicy),
            status_builder: Arc::new(StatusBuilder::new(&config.machine, motor_ids)),
            rimo_server: config.rimo_server.clone(),
            loop_interval: Duration::from_millis(config.machine.loop_interval_ms),
            update_interval: Duration::from_millis(config.machine.update_interval_ms),
            input_mapping: Arc::new(config.machine.input_mapping.clone()),
            output_mapping: Arc::new(config.machine.output_mapping.clone()),
            command_queue: Arc::new(CommandQueue::new()),
            running: Arc::new(AtomicBool::new(false)),
            threads: Mutex::new(Vec::new()),
        })
    }

    fn initialize_component(component: &dyn Component, label: &str) {
        if let Err(e) = component.initialize() {
            log::error!("{} failed to initialize: {}", label, e);
        }
    }

    /// Bind the network transport, initialize every hardware component, install SIGINT/SIGTERM
    /// handling, and run until a termination signal arrives. Blocks until every spawned thread
    /// has joined.
    pub fn run(&self) -> Result<()> {
        self.running.store(true, Ordering::Relaxed);

        Self::initialize_component(&*self.contec, "Contec");
        Self::initialize_component(&*self.control_panel, "ControlPanel");
        Self::initialize_component(&*self.motor_control, "MotorControl");

        let (status_publisher, command_endpoint) = transport::bind(&self.rimo_server, COMMAND_RECEIVE_TIMEOUT)?;

        let mut signals = Signals::new([SIGTERM, SIGINT]).map_err(|e| Error::transport(e.to_string()))?;
        let signal_running = Arc::clone(&self.running);
        // detached: it only needs to run once and flip `running`, nothing left to join
        std::thread::Builder::new()
            .name("signal-handler".to_owned())
            .spawn(move || {
                if signals.forever().next().is_some() {
                    log::info!("Machine received a shutdown signal, stopping gracefully");
                    signal_running.store(false, Ordering::Relaxed);
                }
            })
            .expect("failed to spawn signal-handler thread");

        let command_thread = self.spawn_command_thread(command_endpoint);
        let control_thread = self.spawn_control_thread(status_publisher);

        self.threads.lock().push(command_thread);
        self.threads.lock().push(control_thread);

        while self.running.load(Ordering::Relaxed) {
            std::thread::sleep(Duration::from_millis(100));
        }

        self.shutdown();
        Ok(())
    }

    /// Signal every thread to stop, close the command queue (failing any command still queued
    /// with [`Error::ShuttingDown`] once its reply is awaited), and join with a bounded timeout.
    fn shutdown(&self) {
        self.running.store(false, Ordering::Relaxed);
        self.command_queue.shutdown();
        self.control_panel.reset();
        let deadline = Instant::now() + SHUTDOWN_JOIN_TIMEOUT;
        for handle in self.threads.lock().drain(..) {
            if Instant::now() >= deadline {
                log::warn!("Machine shutdown: a thread did not join within the timeout");
                continue;
            }
            let _ = handle.join();
        }
    }

    fn spawn_command_thread(&self, endpoint: CommandEndpoint) -> JoinHandle<()> {
        let queue = Arc::clone(&self.command_queue);
        let running = Arc::clone(&self.running);
        std::thread::Builder::new()
            .name("command-server".to_owned())
            .spawn(move || {
                let dispatch = move |command: Command, deadline: Duration| -> Result<String> {
                    let (tx, rx) = oneshot::channel();
                    if !queue.push(PendingCommand { command, reply: tx }) {
                        return Err(Error::ShuttingDown);
                    }
                    match rx.recv_timeout(deadline) {
                        Ok(result) => result,
                        Err(oneshot::RecvTimeoutError::Timeout) => Err(Error::Timeout),
                        Err(oneshot::RecvTimeoutError::Disconnected) => Err(Error::ShuttingDown),
                    }
                };
                let server = CommandServer::new(endpoint, dispatch);
                server.run_loop(&running);
            })
            .expect("failed to spawn command-server thread")
    }

    fn spawn_control_thread(&self, status_publisher: StatusPublisher) -> JoinHandle<()> {
        let contec = Arc::clone(&self.contec);
        let control_panel = Arc::clone(&self.control_panel);
        let motor_control = Arc::clone(&self.motor_control);
        let policy = Arc::clone(&self.policy);
        let status_builder = Arc::clone(&self.status_builder);
        let queue = Arc::clone(&self.command_queue);
        let input_mapping = Arc::clone(&self.input_mapping);
        let output_mapping = Arc::clone(&self.output_mapping);
        let loop_interval = self.loop_interval;
        let update_interval = self.update_interval;
        let running = Arc::clone(&self.running);

        std::thread::Builder::new()
            .name("control-loop".to_owned())
            .spawn(move || {
                let mut runner = ControlLoopRunner::new(loop_interval, update_interval, Box::new(SystemClock));
                let blink_tool_changers = Cell::new(false);
                while running.load(Ordering::Relaxed) {
                    runner.run_cycle(
                        || {
                            blink_tool_changers.set(control_step(
                                &contec,
                                &control_panel,
                                &motor_control,
                                &*policy,
                                &status_builder,
                                &input_mapping,
                                &output_mapping,
                            ))
                        },
                        || process_one_pending_command(&queue, &contec, &control_panel, &motor_control, &output_mapping),
                        || {
                            let status = status_builder.build(&contec, &control_panel, &motor_control, blink_tool_changers.get());
                            if let Err(e) = status_publisher.publish(&status) {
                                log::error!("control loop: status publish failed: {}", e);
                            }
                        },
                    );
                }
            })
            .expect("failed to spawn control-loop thread")
    }
}

/// Runs one control-step evaluation: reads Contec inputs, evaluates the policy against the
/// current joystick snapshot, applies any requested outputs and motor intents, and returns
/// whether tool-changer status should report error-blinking this cycle.
fn control_step(
    contec: &Contec,
    control_panel: &ControlPanel,
    motor_control: &MotorControl,
    policy: &(dyn RobotControlPolicy + Send + Sync),
    status_builder: &StatusBuilder,
    input_mapping: &BTreeMap<String, usize>,
    output_mapping: &BTreeMap<String, usize>,
) -> bool {
    let inputs = contec.read_inputs().ok().map(|raw| named_bits(input_mapping, &raw));
    let contec_state = contec.state();
    let status = status_builder.joystick_status(control_panel);
    match policy.evaluate(inputs.as_ref(), contec_state, &status) {
        Ok(output) => {
            if let Some(named) = &output.outputs {
                if let Err(e) = write_named_outputs(contec, output_mapping, named) {
                    log::error!("control loop: failed to write outputs: {}", e);
                }
            }
            for intent in output.motor_intents {
                apply_motor_intent(motor_control, intent);
            }
            output.set_tool_changer_error_blinking
        }
        Err(e) => {
            log::error!("control loop: policy evaluation failed: {}", e);
            true
        }
    }
}

fn named_bits(mapping: &BTreeMap<String, usize>, raw: &[bool]) -> BTreeMap<String, bool> {
    mapping.iter().filter_map(|(name, &index)| raw.get(index).map(|&v| (name.clone(), v))).collect()
}

fn write_named_outputs(contec: &Contec, mapping: &BTreeMap<String, usize>, named: &BTreeMap<String, bool>) -> Result<()> {
    let mut outputs = contec.read_outputs()?;
    for (name, &value) in named {
        if let Some(&index) = mapping.get(name) {
            if let Some(slot) = outputs.get_mut(index) {
                *slot = value;
            }
        }
    }
    contec.set_outputs(&outputs)
}

fn apply_motor_intent(motor_control: &MotorControl, intent: crate::policy::MotorIntent) {
    let id = intent.motor;
    if let Some(mode) = intent.mode {
        if let Err(e) = motor_control.set_mode(id, mode) {
            log::error!("control loop: set_mode({}) failed: {}", id, e);
        }
    }
    if let Some(direction) = intent.direction {
        if let Err(e) = motor_control.set_direction(id, direction) {
            log::error!("control loop: set_direction({}) failed: {}", id, e);
        }
    }
    if let Some(speed) = intent.speed {
        if let Err(e) = motor_control.set_speed(id, speed) {
            log::error!("control loop: set_speed({}) failed: {}", id, e);
        }
    }
    if let Some(position) = intent.position {
        if let Err(e) = motor_control.set_position(id, position) {
            log::error!("control loop: set_position({}) failed: {}", id, e);
        }
    }
    if intent.start_movement == Some(true) {
        if let Err(e) = motor_control.start_movement(id) {
            log::error!("control loop: start_movement({}) failed: {}", id, e);
        }
    }
}

fn process_one_pending_command(
    queue: &CommandQueue<PendingCommand>,
    contec: &Contec,
    control_panel: &ControlPanel,
    motor_control: &MotorControl,
    output_mapping: &BTreeMap<String, usize>,
) {
    let Some(pending) = queue.try_pop() else { return };
    let result = execute_command(pending.command, contec, control_panel, motor_control, output_mapping);
    let _ = pending.reply.send(result);
}

fn execute_command(
    command: Command,
    contec: &Contec,
    control_panel: &ControlPanel,
    motor_control: &MotorControl,
    output_mapping: &BTreeMap<String, usize>,
) -> Result<String> {
    match command {
        Command::ToolChanger { position, action } => {
            let name = tool_changer_output_name(position)?;
            let mut outputs = contec.read_outputs()?;
            let index = output_mapping
                .get(name)
                .ok_or_else(|| Error::config(format!("Machine.outputMapping is missing '{}'", name)))?;
            let slot = outputs
                .get_mut(*index)
                .ok_or_else(|| Error::config(format!("Machine.outputMapping.{} index {} out of bounds", name, index)))?;
            *slot = action == ToolChangerAction::Open;
            contec.set_outputs(&outputs)?;
            Ok(String::new())
        }
        Command::Reset { system } => {
            match system {
                RobotComponent::Contec => {
                    contec.reset();
                    contec.initialize()?;
                }
                RobotComponent::ControlPanel => {
                    control_panel.reset();
                    control_panel.initialize()?;
                }
                RobotComponent::MotorControl => {
                    motor_control.reset();
                    motor_control.initialize()?;
                }
            }
            Ok(String::new())
        }
        Command::MotorDiagnostics { motor } => {
            let alarm = motor_control.diagnose_current_alarm(motor)?;
            let warning = motor_control.diagnose_current_warning(motor)?;
            let communication_error = motor_control.diagnose_current_communication_error(motor)?;
            Ok(json!({
                "alarm": diagnostic_json(&alarm),
                "warning": diagnostic_json(&warning),
                "communicationError": diagnostic_json(&communication_error),
            })
            .to_string())
        }
        Command::ResetMotorAlarm { motor } => {
            motor_control.reset_alarm(motor)?;
            Ok(String::new())
        }
        Command::ContecDiagnostics => {
            let inputs = contec.read_inputs()?;
            let outputs = contec.read_outputs()?;
            Ok(json!({"inputs": inputs, "outputs": outputs}).to_string())
        }
    }
}

fn tool_changer_output_name(position: Arm) -> Result<&'static str> {
    match position {
        Arm::Left => Ok("toolChangerLeft"),
        Arm::Right => Ok("toolChangerRight"),
        Arm::Gantry => Err(Error::rejected("the Gantry arm has no tool changer")),
    }
}

fn diagnostic_json(diagnostic: &crate::motor::CodeDiagnostic) -> serde_json::Value {
    json!({
        "domain": diagnostic.domain.name(),
        "code": diagnostic.code,
        "known": diagnostic.known,
        "kind": diagnostic.kind,
        "cause": diagnostic.cause,
        "remedialAction": diagnostic.remedial_action,
    })
}
