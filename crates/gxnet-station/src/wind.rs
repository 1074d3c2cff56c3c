//! Wind speed/direction and u/v components.
//!
//! Directions follow the meteorological convention: the bearing the wind
//! blows *from*, in degrees clockwise from north. A northerly wind
//! (`dir = 0`) has `v < 0`.

use crate::error::{Error, Result};
use ndarray::{Array1, ArrayView1, Zip};

/// Speed and direction to `(u, v)`.
pub fn to_uv(speed: f64, direction_deg: f64) -> (f64, f64) {
    let (sin, cos) = direction_deg.to_radians().sin_cos();
    (-speed * sin, -speed * cos)
}

/// `(u, v)` to speed and direction in `(0, 360]`.
///
/// Calm wind (`u = v = 0`) reports a direction of 180.
pub fn from_uv(u: f64, v: f64) -> (f64, f64) {
    let speed = u.hypot(v);
    let direction = 180.0 + u.atan2(v).to_degrees();
    (speed, direction)
}

/// Element-wise [`to_uv`].
pub fn to_uv_array(
    speed: ArrayView1<'_, f64>,
    direction_deg: ArrayView1<'_, f64>,
) -> Result<(Array1<f64>, Array1<f64>)> {
    check_lengths("to_uv_array", speed.len(), direction_deg.len())?;
    let mut u = Array1::zeros(speed.len());
    let mut v = Array1::zeros(speed.len());
    Zip::from(&mut u)
        .and(&mut v)
        .and(&speed)
        .and(&direction_deg)
        .for_each(|u, v, &s, &d| (*u, *v) = to_uv(s, d));
    Ok((u, v))
}

/// Element-wise [`from_uv`].
pub fn from_uv_array(
    u: ArrayView1<'_, f64>,
    v: ArrayView1<'_, f64>,
) -> Result<(Array1<f64>, Array1<f64>)> {
    check_lengths("from_uv_array", u.len(), v.len())?;
    let mut speed = Array1::zeros(u.len());
    let mut direction = Array1::zeros(u.len());
    Zip::from(&mut speed)
        .and(&mut direction)
        .and(&u)
        .and(&v)
        .for_each(|s, d, &u, &v| (*s, *d) = from_uv(u, v));
    Ok((speed, direction))
}

fn check_lengths(context: &'static str, left: usize, right: usize) -> Result<()> {
    if left != right {
        return Err(Error::LengthMismatch {
            context,
            left,
            right,
        });
    }
    Ok(())
}
