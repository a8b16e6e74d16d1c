//! Helper functions of the audio subsystem.
//!
//! These functions are not tied to the `VolumeController` itself, but
//! convert between the server's integer volume domain and the normalized
//! `[0, 1]` scale the rest of the application works with.


/// Server volume that means silence.
pub const PA_VOLUME_MUTED: u32 = 0x0;
/// Server volume that means unity gain (100%).
pub const PA_VOLUME_NORM: u32 = 0x10000;

/// Volume differences below this are considered noise from the integer
/// round trip and don't count as a change.
pub const VOLUME_EPSILON: f64 = 2e-3;


/// Converts a server volume to the normalized scale, clamping anything
/// outside of `[PA_VOLUME_MUTED, PA_VOLUME_NORM]`.
pub fn vol_to_normalized(vol: u32) -> f64 {
    let range = (PA_VOLUME_NORM - PA_VOLUME_MUTED) as f64;
    let norm = (vol as f64 - PA_VOLUME_MUTED as f64) / range;
    return norm.max(0.0).min(1.0);
}


/// Converts a normalized volume back to the server domain.
/// ## `vol`
/// The normalized volume. Values outside of `[0, 1]` (and NaN) are
/// clamped to the server range.
pub fn normalized_to_vol(vol: f64) -> u32 {
    let range = (PA_VOLUME_NORM - PA_VOLUME_MUTED) as f64;
    let v = (range * vol).round() + PA_VOLUME_MUTED as f64;
    if v.is_nan() {
        return PA_VOLUME_MUTED;
    }
    return v.max(PA_VOLUME_MUTED as f64).min(PA_VOLUME_NORM as f64) as u32;
}


/// Whether two normalized volumes differ by more than `VOLUME_EPSILON`.
pub fn vol_changed(old: f64, new: f64) -> bool {
    if old.is_nan() || new.is_nan() {
        return old.is_nan() != new.is_nan();
    }
    return (old - new).abs() > VOLUME_EPSILON;
}


/// Builds a volume vector with the same channel count as `volumes`, every
/// channel set to `vol`. This flattens any balance between channels.
pub fn broadcast_vol(volumes: &[u32], vol: u32) -> Vec<u32> {
    return vec![vol; volumes.len()];
}


/// Moves `vol` by `step_percent` up or down, staying inside `[0, 1]`.
/// ## `up`
/// Whether to increase or decrease the volume.
pub fn step_vol(vol: f64, step_percent: u32, up: bool) -> f64 {
    let step = step_percent as f64 / 100.0;
    let new_vol = if up { vol + step } else { vol - step };
    return new_vol.max(0.0).min(1.0);
}
