//! Synthetic reading generator.
//!
//! Produces the next plausible reading for a device from a physical model
//! rather than free noise. Per parameter the value is
//!
//! ```text
//! base(latitude) + seasonal(day of year) + cycle(hour) [+ continuity] + noise
//! ```
//!
//! clamped to the parameter's simulation range. The cycle is diurnal (24 h)
//! for heat-driven parameters and tidal (12 h) for flow-driven ones. Hours are
//! local solar time derived from longitude so a device's day/night follows
//! its own position. With at least [`MIN_HISTORY_FOR_CONTINUITY`] prior
//! readings, the projection is pulled toward the most recent value so
//! consecutive readings drift instead of jumping.
//!
//! The generator never looks at alert thresholds; callers run the threshold
//! check on what it produces.

use std::f64::consts::{PI, TAU};

use chrono::{DateTime, Datelike, Timelike, Utc};
use rand::Rng;
use uuid::Uuid;

use crate::models::{Device, Location, Reading, ReadingStatus};
use crate::parameters::{Parameter, ParameterValues};

// ---

/// History shorter than this disables the continuity correction.
pub const MIN_HISTORY_FOR_CONTINUITY: usize = 5;

/// Share of the gap between projection and last reading that is kept.
pub const CONTINUITY_DAMPING: f64 = 0.75;

/// Max location offset (degrees) applied per reading.
const LOCATION_JITTER_DEG: f64 = 0.005;

const DEFAULT_DEPTH_M: f64 = 5.0;
const DAYS_PER_YEAR: f64 = 365.25;

#[derive(Debug, Clone, Copy, PartialEq)]
enum Cycle {
    Diurnal,
    Tidal,
}

impl Cycle {
    fn period_hours(self) -> f64 {
        match self {
            Cycle::Diurnal => 24.0,
            Cycle::Tidal => 12.0,
        }
    }
}

/// Time and place inputs shared by every parameter of one reading.
#[derive(Debug, Clone, Copy)]
struct Frame {
    latitude: f64,
    day_of_year: f64,
    local_hour: f64,
}

impl Frame {
    fn new(location: &Location, at: DateTime<Utc>) -> Self {
        let utc_hour = at.hour() as f64 + at.minute() as f64 / 60.0;
        Self {
            latitude: location.latitude,
            day_of_year: at.ordinal() as f64,
            local_hour: (utc_hour + location.longitude / 15.0).rem_euclid(24.0),
        }
    }

    fn cycle(&self, cycle: Cycle, peak_hour: f64) -> f64 {
        (TAU * (self.local_hour - peak_hour) / cycle.period_hours()).cos()
    }
}

/// Seasonal phase in `[-1, 1]`: +1 at local mid-summer, -1 at mid-winter.
///
/// Northern summer peaks late July, southern summer six months later.
/// Amplitude fades toward the equator but never fully vanishes.
pub fn seasonal_factor(latitude: f64, day_of_year: f64) -> f64 {
    let phase = (TAU * (day_of_year - 15.0) / DAYS_PER_YEAR - PI / 2.0).sin();
    let hemisphere = if latitude < 0.0 { -1.0 } else { 1.0 };
    let weight = (latitude.abs() / 45.0).clamp(0.15, 1.0);
    hemisphere * weight * phase
}

/// Water temperature base: warm at the equator, cooling poleward.
fn temperature_base(latitude: f64) -> f64 {
    28.0 - 0.35 * latitude.abs()
}

/// Surface salinity by latitude band.
fn salinity_base(latitude: f64) -> f64 {
    match latitude.abs() {
        // Equatorial rain dilutes the surface layer
        l if l < 10.0 => 34.5,
        // Subtropical evaporation maximum
        l if l < 40.0 => 35.5,
        _ => 34.0,
    }
}

/// Naive model value before continuity and noise.
fn projected(parameter: Parameter, frame: &Frame) -> f64 {
    let season = seasonal_factor(frame.latitude, frame.day_of_year);
    let temperature =
        temperature_base(frame.latitude) + 6.0 * season + 1.5 * frame.cycle(Cycle::Diurnal, 15.0);

    match parameter {
        Parameter::Temperature => temperature,
        Parameter::Salinity => {
            salinity_base(frame.latitude) + 0.4 * season + 0.1 * frame.cycle(Cycle::Tidal, 0.0)
        }
        // Colder water holds more oxygen; photosynthesis peaks mid-afternoon
        Parameter::DissolvedOxygen => {
            8.0 - 0.1 * (temperature - 15.0) + 0.4 * frame.cycle(Cycle::Diurnal, 14.0)
        }
        Parameter::Ph => 8.05 + 0.03 * season + 0.05 * frame.cycle(Cycle::Diurnal, 16.0),
        Parameter::FlowRate => 0.4 + 0.25 * frame.cycle(Cycle::Tidal, 3.0),
        Parameter::Turbidity => {
            let flow = 0.4 + 0.25 * frame.cycle(Cycle::Tidal, 3.0);
            2.5 + 2.0 * flow + 0.5 * frame.cycle(Cycle::Tidal, 4.0)
        }
    }
}

/// Half-width of the uniform noise band.
fn noise_amplitude(parameter: Parameter) -> f64 {
    match parameter {
        Parameter::Temperature => 0.4,
        Parameter::Salinity => 0.3,
        Parameter::DissolvedOxygen => 0.3,
        Parameter::Ph => 0.05,
        Parameter::FlowRate => 0.1,
        Parameter::Turbidity => 0.75,
    }
}

/// Most recent value of `parameter` when history is long enough.
fn continuity_anchor(parameter: Parameter, history: &[Reading]) -> Option<f64> {
    if history.len() < MIN_HISTORY_FOR_CONTINUITY {
        return None;
    }
    history.iter().rev().find_map(|r| r.values.get(parameter))
}

/// Generate one value for `parameter`.
pub fn generate_value<R: Rng + ?Sized>(
    parameter: Parameter,
    location: &Location,
    at: DateTime<Utc>,
    history: &[Reading],
    rng: &mut R,
) -> f64 {
    let frame = Frame::new(location, at);
    let mut value = projected(parameter, &frame);

    if let Some(last) = continuity_anchor(parameter, history) {
        value += (last - value) * CONTINUITY_DAMPING;
    }

    let amplitude = noise_amplitude(parameter);
    value += rng.gen_range(-amplitude..=amplitude);

    parameter.simulation_range().clamp(value)
}

/// Build a full reading for `device` at `at`.
///
/// `history` must be ordered oldest to newest. Only the parameters in the
/// device's config are filled in.
pub fn generate_reading<R: Rng + ?Sized>(
    device: &Device,
    at: DateTime<Utc>,
    history: &[Reading],
    rng: &mut R,
) -> Reading {
    // ---
    let location = jitter_location(&device.location, rng);

    let mut values = ParameterValues::default();
    for &parameter in &device.config.parameters {
        values.set(
            parameter,
            generate_value(parameter, &device.location, at, history, rng),
        );
    }

    Reading {
        id: Uuid::new_v4(),
        device_id: device.id,
        timestamp: at,
        location,
        values,
        status: ReadingStatus::Normal,
    }
}

fn jitter_location<R: Rng + ?Sized>(base: &Location, rng: &mut R) -> Location {
    let depth = base
        .depth
        .unwrap_or_else(|| DEFAULT_DEPTH_M + rng.gen_range(-1.0..=1.0));
    Location {
        latitude: base.latitude + rng.gen_range(-LOCATION_JITTER_DEG..=LOCATION_JITTER_DEG),
        longitude: base.longitude + rng.gen_range(-LOCATION_JITTER_DEG..=LOCATION_JITTER_DEG),
        depth: Some(depth),
        description: None,
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::test_support::device_at;
    use chrono::{Duration, TimeZone};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn all_parameters_device(latitude: f64, longitude: f64) -> Device {
        let mut device = device_at(latitude, longitude);
        device.config.parameters = Parameter::ALL.to_vec();
        device
    }

    #[test]
    fn ten_thousand_readings_stay_in_simulation_ranges() {
        // ---
        let mut rng = StdRng::seed_from_u64(7);
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let mut history: Vec<Reading> = Vec::new();

        for i in 0..10_000 {
            let latitude = rng.gen_range(-80.0..=80.0);
            let longitude = rng.gen_range(-180.0..=180.0);
            let device = all_parameters_device(latitude, longitude);
            let at = start + Duration::minutes(i * 53);

            let reading = generate_reading(&device, at, &history, &mut rng);
            for (parameter, value) in reading.values.iter() {
                assert!(
                    parameter.simulation_range().contains(value),
                    "{parameter}={value} out of range at lat {latitude}"
                );
            }
            assert_eq!(reading.values.iter().count(), Parameter::ALL.len());
            assert_eq!(reading.status, ReadingStatus::Normal);

            history.push(reading);
            if history.len() > 10 {
                history.remove(0);
            }
        }
    }

    #[test]
    fn short_history_is_ignored() {
        // ---
        let device = all_parameters_device(31.23, 121.47);
        let at = Utc.with_ymd_and_hms(2024, 7, 20, 9, 30, 0).unwrap();

        let mut seed_rng = StdRng::seed_from_u64(1);
        let history: Vec<Reading> = (0..MIN_HISTORY_FOR_CONTINUITY - 1)
            .map(|i| generate_reading(&device, at - Duration::minutes(i as i64), &[], &mut seed_rng))
            .collect();

        let without = generate_reading(&device, at, &[], &mut StdRng::seed_from_u64(42));
        let with_short = generate_reading(&device, at, &history, &mut StdRng::seed_from_u64(42));
        assert_eq!(without.values, with_short.values);
    }

    #[test]
    fn continuity_pulls_toward_last_reading() {
        // ---
        let device = all_parameters_device(31.23, 121.47);
        let at = Utc.with_ymd_and_hms(2024, 1, 20, 3, 0, 0).unwrap();

        // History parked at the top of each range
        let mut rng = StdRng::seed_from_u64(3);
        let history: Vec<Reading> = (0..6)
            .map(|_| {
                let mut r = generate_reading(&device, at, &[], &mut rng);
                for p in Parameter::ALL {
                    r.values.set(p, p.simulation_range().max);
                }
                r
            })
            .collect();

        let free = generate_reading(&device, at, &[], &mut StdRng::seed_from_u64(9));
        let anchored = generate_reading(&device, at, &history, &mut StdRng::seed_from_u64(9));

        for p in Parameter::ALL {
            let top = p.simulation_range().max;
            let free_gap = top - free.values.get(p).unwrap();
            let anchored_gap = top - anchored.values.get(p).unwrap();
            assert!(
                anchored_gap <= free_gap,
                "{p}: anchored gap {anchored_gap} > free gap {free_gap}"
            );
        }
    }

    #[test]
    fn southern_hemisphere_season_is_inverted() {
        // ---
        let july = 200.0;
        assert!(seasonal_factor(40.0, july) > 0.5);
        assert!(seasonal_factor(-40.0, july) < -0.5);
        // Equatorial amplitude is damped
        assert!(seasonal_factor(2.0, july).abs() < 0.2);
    }

    #[test]
    fn only_configured_parameters_and_jittered_location() {
        // ---
        let device = device_at(22.54, 114.06);
        let mut rng = StdRng::seed_from_u64(11);
        let reading = generate_reading(&device, Utc::now(), &[], &mut rng);

        let present: Vec<Parameter> = reading.values.iter().map(|(p, _)| p).collect();
        assert_eq!(present, device.config.parameters);

        assert!((reading.location.latitude - 22.54).abs() <= LOCATION_JITTER_DEG);
        assert!((reading.location.longitude - 114.06).abs() <= LOCATION_JITTER_DEG);
        assert!(reading.location.depth.is_some());
        assert_eq!(reading.device_id, device.id);
    }
}
