//! Emulated device peripherals.
//!
//! A [`Board`] owns the serial ports, the digital pin bank and the device
//! clock. It outlives individual program runs: the manager shares one
//! `Arc<Board>` with every execution loop it creates, and observers (a UI, the
//! CLI monitor) read it from their own threads.

use std::sync::Mutex;
use std::thread;
use std::time::Duration;

use crate::clock::BootClock;
use crate::config::HostConfig;
use crate::serial::SerialPort;
use crate::sync::lock;

/// Pin wired to the on-board LED.
pub const LED_BUILTIN: u8 = 13;

/// Digital pin direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PinMode {
    Output,
    OutputOpenDrain,
    #[default]
    Input,
    InputAnalog,
    InputPullup,
    InputPulldown,
}

impl PinMode {
    fn is_input(self) -> bool {
        !matches!(self, PinMode::Output | PinMode::OutputOpenDrain)
    }
}

/// Digital pin level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Level {
    #[default]
    Low,
    High,
}

impl Level {
    pub fn is_high(self) -> bool {
        self == Level::High
    }
}

impl From<bool> for Level {
    fn from(high: bool) -> Self {
        if high { Level::High } else { Level::Low }
    }
}

/// Snapshot of one pin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PinState {
    pub mode: PinMode,
    pub level: Level,
}

/// Serial ports, pins and clock of one emulated device.
#[derive(Debug)]
pub struct Board {
    ports: Vec<SerialPort>,
    pins: Mutex<Vec<PinState>>,
    clock: BootClock,
}

impl Board {
    pub fn new(config: &HostConfig) -> Self {
        let ports = (0..config.serial_ports)
            .map(|id| SerialPort::with_capacity(id as u8, config.line_capacity, config.rx_capacity))
            .collect();

        Self {
            ports,
            pins: Mutex::new(vec![PinState::default(); config.pin_count]),
            clock: BootClock::new(),
        }
    }

    // --- Serial ---

    /// The primary serial port (port 0).
    ///
    /// # Panics
    ///
    /// Panics if the board was built with zero serial ports, which
    /// [`HostConfig::validate`] rejects.
    pub fn serial(&self) -> &SerialPort {
        &self.ports[0]
    }

    pub fn serial_port(&self, index: usize) -> Option<&SerialPort> {
        self.ports.get(index)
    }

    pub fn ports(&self) -> &[SerialPort] {
        &self.ports
    }

    // --- Pins ---

    pub fn pin_count(&self) -> usize {
        lock(&self.pins).len()
    }

    /// Configure a pin. Switching direction drives the pin low.
    pub fn pin_mode(&self, pin: u8, mode: PinMode) {
        if let Some(state) = lock(&self.pins).get_mut(pin as usize) {
            *state = PinState {
                mode,
                level: Level::Low,
            };
        }
    }

    /// Drive an output pin. Ignored for input or out-of-range pins.
    pub fn digital_write(&self, pin: u8, level: Level) {
        if let Some(state) = lock(&self.pins).get_mut(pin as usize)
            && !state.mode.is_input()
        {
            state.level = level;
        }
    }

    /// Read an input pin. Output and out-of-range pins read low.
    pub fn digital_read(&self, pin: u8) -> Level {
        match lock(&self.pins).get(pin as usize) {
            Some(state) if state.mode.is_input() => state.level,
            _ => Level::Low,
        }
    }

    /// Drive an input pin from outside the program (button, test harness).
    pub fn set_input(&self, pin: u8, level: Level) {
        if let Some(state) = lock(&self.pins).get_mut(pin as usize)
            && state.mode.is_input()
        {
            state.level = level;
        }
    }

    /// Snapshot of a pin for observers.
    pub fn pin(&self, pin: u8) -> Option<PinState> {
        lock(&self.pins).get(pin as usize).copied()
    }

    // --- Clock ---

    /// Milliseconds since the last reset.
    pub fn millis(&self) -> u32 {
        self.clock.millis()
    }

    /// Microseconds since the last reset.
    pub fn micros(&self) -> u32 {
        self.clock.micros()
    }

    pub fn delay(&self, ms: u32) {
        thread::sleep(Duration::from_millis(u64::from(ms)));
    }

    pub fn delay_micros(&self, us: u32) {
        thread::sleep(Duration::from_micros(u64::from(us)));
    }

    /// Power-on reset: restart the clock, release every pin, clear and close
    /// every serial port.
    pub fn reset(&self) {
        self.clock.reset();
        lock(&self.pins).fill(PinState::default());
        for port in &self.ports {
            port.end();
            port.flush_rx();
            port.flush_tx();
        }
    }
}

impl Default for Board {
    fn default() -> Self {
        Self::new(&HostConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn board() -> Board {
        Board::new(&HostConfig::default())
    }

    #[test]
    fn test_ports_from_config() {
        let config = HostConfig::default().with_serial_ports(2).with_line_capacity(8);
        let board = Board::new(&config);
        assert_eq!(board.ports().len(), 2);
        assert_eq!(board.serial_port(1).unwrap().port_id(), 1);
        assert_eq!(board.serial().line_capacity(), 8);
        assert!(board.serial_port(2).is_none());
    }

    #[test]
    fn test_output_pin_write() {
        let board = board();
        board.pin_mode(LED_BUILTIN, PinMode::Output);
        board.digital_write(LED_BUILTIN, Level::High);
        assert_eq!(board.pin(LED_BUILTIN).unwrap().level, Level::High);

        // Output pins do not report through digital_read.
        assert_eq!(board.digital_read(LED_BUILTIN), Level::Low);
    }

    #[test]
    fn test_input_pin_ignores_writes() {
        let board = board();
        board.digital_write(2, Level::High);
        assert_eq!(board.pin(2).unwrap().level, Level::Low);

        board.set_input(2, Level::High);
        assert_eq!(board.digital_read(2), Level::High);
    }

    #[test]
    fn test_out_of_range_pins() {
        let board = board();
        board.pin_mode(200, PinMode::Output);
        board.digital_write(200, Level::High);
        assert_eq!(board.digital_read(200), Level::Low);
        assert!(board.pin(200).is_none());
    }

    #[test]
    fn test_reset_clears_everything() {
        let board = board();
        board.pin_mode(LED_BUILTIN, PinMode::Output);
        board.digital_write(LED_BUILTIN, Level::High);
        board.serial().begin(9600);
        board.serial().println("boot");
        board.serial().rx_str("pending");

        board.reset();

        assert_eq!(board.pin(LED_BUILTIN).unwrap(), PinState::default());
        assert!(!board.serial().is_ready());
        assert!(board.serial().buffered_lines().is_empty());
        assert_eq!(board.serial().available(), 0);
    }

    #[test]
    fn test_level_from_bool() {
        assert_eq!(Level::from(true), Level::High);
        assert!(!Level::from(false).is_high());
    }
}
