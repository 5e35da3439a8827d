//! Built-in demo programs.

use clap::ValueEnum;
use hostloop_core::{Context, LED_BUILTIN, Level, PinMode, Program};

/// Demo programs selectable from the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Demo {
    /// Toggle the built-in LED and print Tick/Tock every 500 ms
    Blink,
    /// Echo every received line back
    Echo,
}

impl Demo {
    pub fn all() -> &'static [Demo] {
        &[Demo::Blink, Demo::Echo]
    }

    pub fn name(self) -> &'static str {
        match self {
            Demo::Blink => "blink",
            Demo::Echo => "echo",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Demo::Blink => "toggles LED_BUILTIN, prints Tick/Tock every 500 ms, counts serial input",
            Demo::Echo => "echoes each received line as `echo: <line>`",
        }
    }
}

const BLINK_PERIOD_MS: u32 = 500;

#[derive(Debug, Default)]
pub struct Blink {
    last_toggle: u32,
    led_on: bool,
}

impl Program for Blink {
    fn setup(&mut self, ctx: &Context<'_, Self>) -> anyhow::Result<()> {
        ctx.board().pin_mode(LED_BUILTIN, PinMode::Output);
        ctx.serial().begin(9600);
        ctx.serial().println("blink ready");
        Ok(())
    }

    fn loop_once(&mut self, ctx: &Context<'_, Self>) -> anyhow::Result<()> {
        let now = ctx.board().millis();
        if now.wrapping_sub(self.last_toggle) >= BLINK_PERIOD_MS {
            self.last_toggle = now;
            self.led_on = !self.led_on;
            ctx.board().digital_write(LED_BUILTIN, Level::from(self.led_on));
            ctx.serial().println(if self.led_on { "Tick" } else { "Tock" });
        }
        ctx.board().delay(1);
        Ok(())
    }

    fn serial_event(&mut self, ctx: &Context<'_, Self>) -> anyhow::Result<()> {
        let mut count = 0usize;
        while ctx.serial().read().is_some() {
            count += 1;
        }
        ctx.serial().println(format_args!("serial event: {} chars", count));
        Ok(())
    }

    fn teardown(&mut self, ctx: &Context<'_, Self>) -> anyhow::Result<()> {
        ctx.board().digital_write(LED_BUILTIN, Level::Low);
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct Echo {
    pending: Vec<u8>,
}

impl Program for Echo {
    fn setup(&mut self, ctx: &Context<'_, Self>) -> anyhow::Result<()> {
        ctx.serial().begin(9600);
        ctx.serial().println("echo ready");
        Ok(())
    }

    fn loop_once(&mut self, ctx: &Context<'_, Self>) -> anyhow::Result<()> {
        ctx.board().delay(1);
        Ok(())
    }

    fn serial_event(&mut self, ctx: &Context<'_, Self>) -> anyhow::Result<()> {
        while let Some(byte) = ctx.serial().read() {
            match byte {
                b'\n' => {
                    if self.pending.last() == Some(&b'\r') {
                        self.pending.pop();
                    }
                    ctx.serial().print("echo: ");
                    ctx.serial().println_bytes(&self.pending);
                    self.pending.clear();
                }
                _ => self.pending.push(byte),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hostloop_core::{HostConfig, HostManager};
    use std::thread;
    use std::time::{Duration, Instant};

    fn wait_for_line(manager: &HostManager<impl Program>, line: &str) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if manager.board().serial().buffered_lines().iter().any(|l| l == line) {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        false
    }

    #[test]
    fn test_echo_replies_per_line() {
        let manager = HostManager::<Echo>::new();
        manager.start().unwrap();
        assert!(wait_for_line(&manager, "echo ready"));

        manager.board().serial().rx_str("hel");
        manager.board().serial().rx_str("lo\r\n");
        assert!(wait_for_line(&manager, "echo: hello"));
    }

    #[test]
    fn test_blink_toggles_led() {
        let manager = HostManager::<Blink>::with_config(HostConfig::default()).unwrap();
        manager.start().unwrap();
        assert!(wait_for_line(&manager, "Tick"));
        assert_eq!(manager.board().pin(LED_BUILTIN).map(|pin| pin.mode), Some(PinMode::Output));

        assert!(wait_for_line(&manager, "blink ready"));
        manager.board().serial().rx_line("abc");
        assert!(wait_for_line(&manager, "serial event: 4 chars"));
        manager.stop();
        assert_eq!(manager.board().pin(LED_BUILTIN).map(|pin| pin.level), Some(Level::Low));
    }

    #[test]
    fn test_demo_names() {
        let names: Vec<_> = Demo::all().iter().map(|demo| demo.name()).collect();
        assert_eq!(names, vec!["blink", "echo"]);
    }
}
