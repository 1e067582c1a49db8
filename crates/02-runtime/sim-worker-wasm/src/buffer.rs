use sim_host::ModuleError;
use sim_protocol::Solution;

/// Floats per particle in a JS solver's `solutionAsBuffer`: x, y, z, intensity.
pub const STRIDE: usize = 4;

/// Rebuilds a [`Solution`] from the interleaved buffer a JS solver returns.
pub fn solution_from_interleaved(
    iteration: u64,
    time: f64,
    values: &[f64],
) -> Result<Solution, ModuleError> {
    if values.len() % STRIDE != 0 {
        return Err(ModuleError::solver(format!(
            "solution buffer of {} floats is not a multiple of {STRIDE}",
            values.len()
        )));
    }
    let count = values.len() / STRIDE;
    let mut positions = Vec::with_capacity(count * 3);
    let mut intensities = Vec::with_capacity(count);
    for particle in values.chunks_exact(STRIDE) {
        positions.extend_from_slice(&particle[..3]);
        intensities.push(particle[3]);
    }
    Ok(Solution {
        iteration,
        time,
        positions,
        intensities,
    })
}
