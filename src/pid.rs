//! Proportional-Integral-Derivative controller
//!
//! Converts a process reading (here: the recorder's peak level) into a
//! corrective change for the process input (the recording volume).

/// PID controller with an optional change limiter.
///
/// The integral accumulator and the previous error are only ever advanced
/// together, inside [`PidController::input_change`].
#[derive(Debug, Clone)]
pub struct PidController {
    setpoint: f64,
    kp: f64,
    ki: f64,
    kd: f64,
    integral: f64,
    previous_error: f64,
    change_limit: f64,
}

impl PidController {
    /// Create a controller with the given gains and setpoint
    pub fn new(kp: f64, ki: f64, kd: f64, setpoint: f64) -> Self {
        Self {
            setpoint,
            kp,
            ki,
            kd,
            integral: 0.0,
            previous_error: 0.0,
            change_limit: 0.0,
        }
    }

    /// Builder-style variant of [`PidController::set_change_limit`]
    pub fn with_change_limit(mut self, limit: f64) -> Self {
        self.set_change_limit(limit);
        self
    }

    /// Calculate the desired change of the process input.
    ///
    /// `dt` must be strictly positive.
    pub fn input_change(&mut self, feedback: f64, dt: f64) -> f64 {
        let error = self.setpoint - feedback;
        let integral = self.integral + error * dt;
        let derivative = (error - self.previous_error) / dt;

        self.integral = integral;
        self.previous_error = error;

        let change = self.kp * error + self.ki * integral + self.kd * derivative;

        if self.change_limit != 0.0 && change.abs() > self.change_limit.abs() {
            // Sign of the raw change, not of the error
            return self.change_limit.abs().copysign(change);
        }

        change
    }

    /// Keep every change returned by `input_change` within `±limit`.
    ///
    /// A limit of zero disables limiting. A negative limit is treated as its
    /// magnitude, so the returned change keeps the sign of the raw change
    /// instead of taking the sign of the limit.
    pub fn set_change_limit(&mut self, limit: f64) {
        self.change_limit = limit;
    }

    pub fn change_limit(&self) -> f64 {
        self.change_limit
    }

    pub fn setpoint(&self) -> f64 {
        self.setpoint
    }

    pub fn integral(&self) -> f64 {
        self.integral
    }

    pub fn previous_error(&self) -> f64 {
        self.previous_error
    }

    /// Forget accumulated history
    pub fn reset(&mut self) {
        self.integral = 0.0;
        self.previous_error = 0.0;
    }
}
