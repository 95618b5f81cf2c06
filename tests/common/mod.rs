//! Scripted stand-in for a booted image
//!
//! Answers shell commands over a loopback console the way the Monolinux
//! shell does: echo the command, print its output, print a new prompt.
//! Ctrl-A `x` makes it exit like the emulator.

#![allow(dead_code)]

use monolinux_harness::core::transport::{loopback, LoopbackDevice, Transport};
use std::collections::HashMap;
use std::thread::{self, JoinHandle};
use std::time::Duration;

pub const PROMPT: &str = "$ ";

type Handler = Box<dyn FnMut(&LoopbackDevice) + Send>;

pub struct ScriptedDevice {
    boot: String,
    handlers: HashMap<String, Handler>,
}

impl ScriptedDevice {
    pub fn new() -> Self {
        Self {
            boot: String::new(),
            handlers: HashMap::new(),
        }
    }

    /// Output printed before the first prompt
    pub fn boot(mut self, text: &str) -> Self {
        self.boot = text.to_string();
        self
    }

    /// Print `output` when `command` is entered
    pub fn on(self, command: &str, output: &str) -> Self {
        let output = output.to_string();
        self.on_with(command, move |device| {
            device.emit(&output);
        })
    }

    /// Run `handler` when `command` is entered
    pub fn on_with<F>(mut self, command: &str, handler: F) -> Self
    where
        F: FnMut(&LoopbackDevice) + Send + 'static,
    {
        self.handlers.insert(command.to_string(), Box::new(handler));
        self
    }

    /// Start the device. The thread returns every command it received.
    pub fn start(mut self) -> (Transport, JoinHandle<Vec<String>>) {
        let (transport, device) = loopback();

        let handle = thread::spawn(move || {
            let mut commands = Vec::new();
            let mut pending: Vec<u8> = Vec::new();

            device.emit(&self.boot);
            device.emit(PROMPT);

            while let Some(chunk) = device.next_input(Duration::from_secs(30)) {
                pending.extend_from_slice(&chunk);

                if pending.windows(2).any(|w| w == b"\x01x") {
                    device.exit();
                    break;
                }

                while let Some(pos) = pending.iter().position(|&b| b == b'\n') {
                    let line: Vec<u8> = pending.drain(..=pos).collect();
                    let command: String = line.iter().map(|&b| char::from(b)).collect();
                    let command = command.trim_end_matches(&['\r', '\n'][..]).to_string();

                    device.emit(&format!("{command}\r\n"));
                    match self.handlers.get_mut(&command) {
                        Some(handler) => handler(&device),
                        None if command.is_empty() => {}
                        None => {
                            device.emit(&format!("{command}: command not found\n"));
                        }
                    }
                    device.emit(PROMPT);
                    commands.push(command);
                }

                if !device.is_alive() {
                    break;
                }
            }

            commands
        });

        (Transport::Loopback(transport), handle)
    }
}
