//! Physical parameters tracked by ocean sensor devices.
//!
//! Each parameter carries two ranges. The *alert range* is what ingestion
//! accepts as normal; a value outside it marks the reading abnormal and
//! raises an alert. The *simulation range* is where synthetic readings are
//! clamped so generated series stay visually plausible. Parameters without
//! an alert range (flow rate, turbidity) are never threshold-checked.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

// ---

/// Closed set of sensor parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Parameter {
    #[serde(rename = "temperature")]
    Temperature,
    #[serde(rename = "salinity")]
    Salinity,
    #[serde(rename = "dissolvedOxygen")]
    DissolvedOxygen,
    #[serde(rename = "pH")]
    Ph,
    #[serde(rename = "flowRate")]
    FlowRate,
    #[serde(rename = "turbidity")]
    Turbidity,
}

/// Inclusive `[min, max]` interval.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ValueRange {
    pub min: f64,
    pub max: f64,
}

impl ValueRange {
    const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }

    pub fn clamp(&self, value: f64) -> f64 {
        value.clamp(self.min, self.max)
    }
}

/// A value that fell outside a parameter's alert range.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Breach {
    pub parameter: Parameter,
    pub value: f64,
    /// The bound that was crossed.
    pub threshold: f64,
    pub above: bool,
}

struct ParameterSpec {
    unit: &'static str,
    alert: Option<ValueRange>,
    simulation: ValueRange,
}

const fn spec_for(parameter: Parameter) -> ParameterSpec {
    match parameter {
        Parameter::Temperature => ParameterSpec {
            unit: "°C",
            alert: Some(ValueRange::new(5.0, 30.0)),
            simulation: ValueRange::new(6.0, 29.0),
        },
        Parameter::Salinity => ParameterSpec {
            unit: "PSU",
            alert: Some(ValueRange::new(30.0, 40.0)),
            simulation: ValueRange::new(31.0, 38.0),
        },
        Parameter::DissolvedOxygen => ParameterSpec {
            unit: "mg/L",
            alert: Some(ValueRange::new(4.0, 10.0)),
            simulation: ValueRange::new(4.5, 9.5),
        },
        Parameter::Ph => ParameterSpec {
            unit: "pH",
            alert: Some(ValueRange::new(7.0, 8.5)),
            simulation: ValueRange::new(7.8, 8.3),
        },
        Parameter::FlowRate => ParameterSpec {
            unit: "m/s",
            alert: None,
            simulation: ValueRange::new(0.0, 1.5),
        },
        Parameter::Turbidity => ParameterSpec {
            unit: "NTU",
            alert: None,
            simulation: ValueRange::new(0.5, 10.0),
        },
    }
}

impl Parameter {
    pub const ALL: [Parameter; 6] = [
        Parameter::Temperature,
        Parameter::Salinity,
        Parameter::DissolvedOxygen,
        Parameter::Ph,
        Parameter::FlowRate,
        Parameter::Turbidity,
    ];

    /// Wire name, as used in JSON payloads and stored alert records.
    pub const fn as_str(self) -> &'static str {
        match self {
            Parameter::Temperature => "temperature",
            Parameter::Salinity => "salinity",
            Parameter::DissolvedOxygen => "dissolvedOxygen",
            Parameter::Ph => "pH",
            Parameter::FlowRate => "flowRate",
            Parameter::Turbidity => "turbidity",
        }
    }

    pub const fn unit(self) -> &'static str {
        spec_for(self).unit
    }

    pub const fn alert_range(self) -> Option<ValueRange> {
        spec_for(self).alert
    }

    pub const fn simulation_range(self) -> ValueRange {
        spec_for(self).simulation
    }

    /// Compare `value` against the alert range; `None` when acceptable.
    pub fn check(self, value: f64) -> Option<Breach> {
        let range = self.alert_range()?;
        if value < range.min {
            Some(Breach {
                parameter: self,
                value,
                threshold: range.min,
                above: false,
            })
        } else if value > range.max {
            Some(Breach {
                parameter: self,
                value,
                threshold: range.max,
                above: true,
            })
        } else {
            None
        }
    }
}

impl fmt::Display for Parameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Parameter {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Parameter::ALL
            .into_iter()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| format!("unknown parameter '{s}'"))
    }
}

/// Optional value per parameter; serialised flat with the wire names.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParameterValues {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub salinity: Option<f64>,
    #[serde(
        default,
        rename = "dissolvedOxygen",
        skip_serializing_if = "Option::is_none"
    )]
    pub dissolved_oxygen: Option<f64>,
    #[serde(default, rename = "pH", skip_serializing_if = "Option::is_none")]
    pub ph: Option<f64>,
    #[serde(default, rename = "flowRate", skip_serializing_if = "Option::is_none")]
    pub flow_rate: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub turbidity: Option<f64>,
}

impl ParameterValues {
    pub fn get(&self, parameter: Parameter) -> Option<f64> {
        match parameter {
            Parameter::Temperature => self.temperature,
            Parameter::Salinity => self.salinity,
            Parameter::DissolvedOxygen => self.dissolved_oxygen,
            Parameter::Ph => self.ph,
            Parameter::FlowRate => self.flow_rate,
            Parameter::Turbidity => self.turbidity,
        }
    }

    pub fn set(&mut self, parameter: Parameter, value: f64) {
        let slot = match parameter {
            Parameter::Temperature => &mut self.temperature,
            Parameter::Salinity => &mut self.salinity,
            Parameter::DissolvedOxygen => &mut self.dissolved_oxygen,
            Parameter::Ph => &mut self.ph,
            Parameter::FlowRate => &mut self.flow_rate,
            Parameter::Turbidity => &mut self.turbidity,
        };
        *slot = Some(value);
    }

    /// Present values in `Parameter::ALL` order.
    pub fn iter(&self) -> impl Iterator<Item = (Parameter, f64)> + '_ {
        Parameter::ALL
            .into_iter()
            .filter_map(move |p| self.get(p).map(|v| (p, v)))
    }

    pub fn is_empty(&self) -> bool {
        self.iter().next().is_none()
    }

    /// Every alert-range breach among the present values.
    pub fn breaches(&self) -> Vec<Breach> {
        self.iter().filter_map(|(p, v)| p.check(v)).collect()
    }
}
