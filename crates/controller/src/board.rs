//! Pump and canopy relays. The `gpio` feature gates the real rppal driver;
//! without it, a mock board records state and logs changes.

use anyhow::Result;
use irrigation_core::link::Actuators;
use irrigation_core::state::{on_off, Actuator};
use tracing::info;

#[cfg(feature = "gpio")]
use anyhow::Context;
#[cfg(feature = "gpio")]
use rppal::gpio::{Gpio, OutputPin};

/// Pin numbers for each relay.
#[derive(Debug, Clone, Copy)]
pub struct Wiring {
    pub pump: u8,
    pub canopy: u8,
    /// Many relay boards switch on a low output.
    pub active_low: bool,
}

// ---------------------------------------------------------------------------
// Real GPIO board (production, requires rppal + Raspberry Pi hardware)
// ---------------------------------------------------------------------------
#[cfg(feature = "gpio")]
pub struct RelayBoard {
    pump: OutputPin,
    canopy: OutputPin,
    active_low: bool,
}

#[cfg(feature = "gpio")]
impl RelayBoard {
    pub fn new(wiring: Wiring) -> Result<Self> {
        let gpio = Gpio::new().context("failed to open GPIO")?;
        let open = |pin: u8| -> Result<OutputPin> {
            let mut out = gpio
                .get(pin)
                .with_context(|| format!("failed to claim gpio {pin}"))?
                .into_output();
            // Fail-safe: relay OFF until the controller decides otherwise.
            if wiring.active_low {
                out.set_high();
            } else {
                out.set_low();
            }
            Ok(out)
        };
        let pump = open(wiring.pump)?;
        let canopy = open(wiring.canopy)?;
        info!(pump = wiring.pump, canopy = wiring.canopy, "relay board ready");
        Ok(Self {
            pump,
            canopy,
            active_low: wiring.active_low,
        })
    }
}

#[cfg(feature = "gpio")]
impl Actuators for RelayBoard {
    fn write(&mut self, actuator: Actuator, on: bool) {
        let pin = match actuator {
            Actuator::Pump => &mut self.pump,
            Actuator::Canopy => &mut self.canopy,
        };
        // active-low: LOW = ON, HIGH = OFF
        if on != self.active_low {
            pin.set_high();
        } else {
            pin.set_low();
        }
        info!(%actuator, state = on_off(on), "relay set");
    }
}

// ---------------------------------------------------------------------------
// Mock board (development, no hardware)
// ---------------------------------------------------------------------------
#[cfg(not(feature = "gpio"))]
pub struct RelayBoard {
    pub(super) pump: bool,
    pub(super) canopy: bool,
}

#[cfg(not(feature = "gpio"))]
impl RelayBoard {
    pub fn new(wiring: Wiring) -> Result<Self> {
        info!(
            pump = wiring.pump,
            canopy = wiring.canopy,
            active_low = wiring.active_low,
            "[mock-gpio] relay board initialised (no hardware)"
        );
        Ok(Self {
            pump: false,
            canopy: false,
        })
    }
}

#[cfg(not(feature = "gpio"))]
impl Actuators for RelayBoard {
    fn write(&mut self, actuator: Actuator, on: bool) {
        let state = match actuator {
            Actuator::Pump => &mut self.pump,
            Actuator::Canopy => &mut self.canopy,
        };
        *state = on;
        info!(%actuator, state = on_off(on), "[mock-gpio] relay set");
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(all(test, not(feature = "gpio")))]
mod tests {
    use super::*;

    fn board() -> RelayBoard {
        RelayBoard::new(Wiring {
            pump: 17,
            canopy: 27,
            active_low: true,
        })
        .unwrap()
    }

    // -- RelayBoard (mock) --------------------------------------------------

    #[test]
    fn board_starts_all_off() {
        let b = board();
        assert!(!b.pump);
        assert!(!b.canopy);
    }

    #[test]
    fn write_switches_only_the_named_relay() {
        let mut b = board();
        b.write(Actuator::Canopy, true);
        assert!(b.canopy);
        assert!(!b.pump);
    }

    #[test]
    fn write_off_after_on() {
        let mut b = board();
        b.write(Actuator::Pump, true);
        b.write(Actuator::Pump, false);
        assert!(!b.pump);
    }
}
