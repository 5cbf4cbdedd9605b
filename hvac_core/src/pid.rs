//! Proportional-integral-derivative controller with clamped output and anti-windup.
//!
//! Direction convention: a direct-acting loop (cooling) raises its output as the
//! input rises above setpoint; a reverse-acting loop (heating) raises its output
//! as the input falls below setpoint. Either way a larger output drives the
//! process toward setpoint.

use serde::{Deserialize, Serialize};

/// Setpoint moves larger than this clear the accumulated integral.
pub const SETPOINT_RESET_BAND: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PidGains {
    pub kp: f64,
    pub ki: f64,
    pub kd: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PidParams {
    pub gains: PidGains,
    pub output_min: f64,
    pub output_max: f64,
    pub reverse_acting: bool,
    pub max_integral: f64,
    pub enabled: bool,
}

impl Default for PidParams {
    fn default() -> Self {
        Self {
            gains: PidGains {
                kp: 2.0,
                ki: 0.05,
                kd: 0.0,
            },
            output_min: 0.0,
            output_max: 100.0,
            reverse_acting: false,
            max_integral: 500.0,
            enabled: true,
        }
    }
}

impl PidParams {
    pub fn reverse(mut self) -> Self {
        self.reverse_acting = true;
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

/// Per (unit, role) controller memory carried across evaluations.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PidMemory {
    pub integral: f64,
    pub previous_error: f64,
    pub last_output: f64,
    pub last_setpoint: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PidOutput {
    pub output: f64,
    pub p: f64,
    pub i: f64,
    pub d: f64,
}

/// One controller step.
///
/// A non-positive or non-finite `dt` is treated as one second. Non-finite
/// `input`/`setpoint` produce `output_min` and leave memory untouched.
pub fn compute(
    input: f64,
    setpoint: f64,
    params: &PidParams,
    dt: f64,
    mem: &mut PidMemory,
) -> PidOutput {
    if !params.enabled {
        return PidOutput::default();
    }
    if !input.is_finite() || !setpoint.is_finite() {
        tracing::warn!(input, setpoint, "pid input not finite, holding minimum output");
        return PidOutput {
            output: params.output_min,
            ..PidOutput::default()
        };
    }
    let dt = if dt.is_finite() && dt > 0.0 { dt } else { 1.0 };

    if let Some(last) = mem.last_setpoint {
        if (setpoint - last).abs() > SETPOINT_RESET_BAND {
            mem.integral = 0.0;
        }
    }

    let error = if params.reverse_acting {
        setpoint - input
    } else {
        input - setpoint
    };

    let limit = params.max_integral.abs();
    mem.integral = (mem.integral + error * dt).clamp(-limit, limit);

    let derivative = if mem.last_setpoint.is_some() {
        (error - mem.previous_error) / dt
    } else {
        0.0
    };

    let p = params.gains.kp * error;
    let i = params.gains.ki * mem.integral;
    let d = params.gains.kd * derivative;
    let output = (p + i + d).clamp(params.output_min, params.output_max);

    mem.previous_error = error;
    mem.last_output = output;
    mem.last_setpoint = Some(setpoint);

    PidOutput { output, p, i, d }
}
