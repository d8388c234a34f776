//! Barometer (BMP280) configuration and signals

use serde::{Deserialize, Serialize};

use crate::protocol::command::Command;
use crate::protocol::constants::MODULE_BAROMETER;
use crate::protocol::signal::{DataAttributes, Signal, SignalTag, ValueKind};

pub const REG_PRESSURE: u8 = 0x01;
pub const REG_ALTITUDE: u8 = 0x02;
pub const REG_CONFIG: u8 = 0x03;
pub const REG_CYCLIC: u8 = 0x04;

/// Pressure oversampling preset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Oversampling {
    Skip = 0,
    UltraLow = 1,
    Low = 2,
    #[default]
    Standard = 3,
    High = 4,
    UltraHigh = 5,
}

impl Oversampling {
    pub const ALL: [Oversampling; 6] = [
        Oversampling::Skip,
        Oversampling::UltraLow,
        Oversampling::Low,
        Oversampling::Standard,
        Oversampling::High,
        Oversampling::UltraHigh,
    ];

    /// Temperature oversampling paired with this pressure setting
    fn temperature_bits(self) -> u8 {
        if self == Oversampling::UltraHigh {
            2
        } else {
            1
        }
    }
}

/// IIR filter coefficient
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum IirFilter {
    #[default]
    Off = 0,
    Avg2 = 1,
    Avg4 = 2,
    Avg8 = 3,
    Avg16 = 4,
}

impl IirFilter {
    pub const ALL: [IirFilter; 5] = [
        IirFilter::Off,
        IirFilter::Avg2,
        IirFilter::Avg4,
        IirFilter::Avg8,
        IirFilter::Avg16,
    ];
}

/// Time spent idle between measurements in cyclic mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Standby {
    #[default]
    Ms0_5 = 0,
    Ms62_5 = 1,
    Ms125 = 2,
    Ms250 = 3,
    Ms500 = 4,
    Ms1000 = 5,
    Ms2000 = 6,
    Ms4000 = 7,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BarometerConfig {
    pub oversampling: Oversampling,
    pub filter: IirFilter,
    pub standby: Standby,
}

impl BarometerConfig {
    pub fn new(oversampling: Oversampling, filter: IirFilter) -> Self {
        Self {
            oversampling,
            filter,
            standby: Standby::default(),
        }
    }

    /// `[0x12, 0x03, temp_os<<5 | press_os<<2, standby<<5 | filter<<2]`
    pub fn command(&self) -> Command {
        let os = (self.oversampling.temperature_bits() << 5) | ((self.oversampling as u8) << 2);
        let filter = ((self.standby as u8) << 5) | ((self.filter as u8) << 2);
        Command::new(MODULE_BAROMETER, REG_CONFIG, vec![os, filter])
    }
}

pub fn start() -> Command {
    Command::new(MODULE_BAROMETER, REG_CYCLIC, vec![1, 1])
}

pub fn stop() -> Command {
    Command::new(MODULE_BAROMETER, REG_CYCLIC, vec![0, 0])
}

/// Pressure in pascals
pub fn pressure() -> Signal {
    Signal::new(
        "pressure",
        SignalTag::new(MODULE_BAROMETER, REG_PRESSURE),
        DataAttributes::new(4, false),
        ValueKind::Unsigned,
        256.0,
    )
}

/// Altitude in meters
pub fn altitude() -> Signal {
    Signal::new(
        "altitude",
        SignalTag::new(MODULE_BAROMETER, REG_ALTITUDE),
        DataAttributes::new(4, true),
        ValueKind::Signed,
        256.0,
    )
}
