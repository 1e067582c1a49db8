//! Caller-supplied simulation setup.
//!
//! The JSON form keeps the field names used by the browser front-end, e.g.
//! `{"n_vortons": 1000, "initial_conditions": {"InitialConditionVortexRing": {...}}, ...}`.

use serde::{Deserialize, Serialize};

use crate::error::{ProtocolError, ProtocolResult};

/// Largest particle count a single configuration may request.
pub const MAX_VORTONS: usize = 200_000;

/// Immutable description of one simulation instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Configuration {
    /// Requested number of vortex particles.
    pub n_vortons: usize,
    /// Initial vorticity field.
    pub initial_conditions: InitialConditions,
    /// Axis-aligned bounds of the simulated region.
    pub domain: Domain,
    /// Kinematic viscosity.
    pub viscosity: f64,
}

/// Axis-aligned simulation bounds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Domain {
    /// Lower corner.
    pub min: [f64; 3],
    /// Upper corner.
    pub max: [f64; 3],
}

/// Initial-condition variants understood by compute modules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum InitialConditions {
    /// A single vortex ring.
    #[serde(rename = "InitialConditionVortexRing")]
    VortexRing(VortexRing),
    /// No vorticity; particles only follow the free stream.
    #[serde(rename = "InitialConditionEmpty")]
    Empty,
}

/// Vortex ring parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VortexRing {
    /// Center of the ring.
    pub center: [f64; 3],
    /// Propagation direction; normalized by consumers.
    pub direction: [f64; 3],
    /// Peak vorticity magnitude in the core.
    pub intensity: f64,
    /// Distance from the center to the core.
    pub radius: f64,
    /// Core thickness.
    pub thickness: f64,
}

impl Default for VortexRing {
    fn default() -> Self {
        Self {
            center: [0.0, 0.0, 0.0],
            direction: [1.0, 0.0, 0.0],
            intensity: 1.0,
            radius: 1.0,
            thickness: 0.5,
        }
    }
}

impl Default for Domain {
    fn default() -> Self {
        Self {
            min: [-10.0, -10.0, -10.0],
            max: [10.0, 10.0, 10.0],
        }
    }
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            n_vortons: 1000,
            initial_conditions: InitialConditions::VortexRing(VortexRing::default()),
            domain: Domain::default(),
            viscosity: 1e-5,
        }
    }
}

impl Configuration {
    /// Default vortex ring with a different particle count.
    pub fn with_vortons(n_vortons: usize) -> Self {
        Self {
            n_vortons,
            ..Self::default()
        }
    }

    /// Parses and validates a JSON configuration.
    pub fn from_json(text: &str) -> ProtocolResult<Self> {
        let configuration: Configuration = serde_json::from_str(text)
            .map_err(|err| ProtocolError::invalid(format!("malformed configuration: {err}")))?;
        configuration.validate()?;
        Ok(configuration)
    }

    /// Serializes the configuration to the JSON form accepted by [`Configuration::from_json`].
    pub fn to_json(&self) -> ProtocolResult<String> {
        serde_json::to_string(self).map_err(|err| ProtocolError::codec(err.to_string()))
    }

    /// Checks the invariants every compute module relies on.
    pub fn validate(&self) -> ProtocolResult<()> {
        if self.n_vortons > MAX_VORTONS {
            return Err(ProtocolError::invalid(format!(
                "n_vortons {} exceeds the limit of {MAX_VORTONS}",
                self.n_vortons
            )));
        }
        self.domain.validate()?;
        if !self.viscosity.is_finite() || self.viscosity < 0.0 {
            return Err(ProtocolError::invalid(format!(
                "viscosity must be finite and non-negative, got {}",
                self.viscosity
            )));
        }
        match &self.initial_conditions {
            InitialConditions::VortexRing(ring) => ring.validate(),
            InitialConditions::Empty => Ok(()),
        }
    }
}

impl Domain {
    fn validate(&self) -> ProtocolResult<()> {
        for axis in 0..3 {
            let (lo, hi) = (self.min[axis], self.max[axis]);
            if !lo.is_finite() || !hi.is_finite() {
                return Err(ProtocolError::invalid("domain bounds must be finite"));
            }
            if lo >= hi {
                return Err(ProtocolError::invalid(format!(
                    "domain min must be below max on axis {axis} ({lo} >= {hi})"
                )));
            }
        }
        Ok(())
    }

    /// Edge lengths of the domain.
    pub fn extent(&self) -> [f64; 3] {
        [
            self.max[0] - self.min[0],
            self.max[1] - self.min[1],
            self.max[2] - self.min[2],
        ]
    }

    /// Domain volume.
    pub fn volume(&self) -> f64 {
        let [x, y, z] = self.extent();
        x * y * z
    }
}

impl VortexRing {
    fn validate(&self) -> ProtocolResult<()> {
        let finite = self
            .center
            .iter()
            .chain(self.direction.iter())
            .chain([self.intensity, self.radius, self.thickness].iter())
            .all(|v| v.is_finite());
        if !finite {
            return Err(ProtocolError::invalid("vortex ring parameters must be finite"));
        }
        if self.radius <= 0.0 || self.thickness <= 0.0 {
            return Err(ProtocolError::invalid(
                "vortex ring radius and thickness must be positive",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const RING_JSON: &str = r#"{
        "n_vortons": 100,
        "domain": { "min": [-10.0, -10.0, -10.0], "max": [10.0, 10.0, 10.0] },
        "viscosity": 1e-5,
        "initial_conditions": {
            "InitialConditionVortexRing": {
                "center": [0.0, 0.0, 0.0],
                "direction": [1.0, 0.0, 0.0],
                "intensity": 1.0,
                "radius": 1.0,
                "thickness": 0.5
            }
        }
    }"#;

    #[test]
    fn parses_front_end_json() {
        let configuration = Configuration::from_json(RING_JSON).expect("parse");
        assert_eq!(configuration, Configuration::with_vortons(100));
    }

    #[test]
    fn empty_initial_condition_is_a_plain_string() {
        let mut configuration = Configuration::with_vortons(8);
        configuration.initial_conditions = InitialConditions::Empty;
        let json = configuration.to_json().expect("encode");
        assert!(json.contains(r#""initial_conditions":"InitialConditionEmpty""#));
        assert_eq!(Configuration::from_json(&json).expect("decode"), configuration);
    }

    #[test]
    fn rejects_inverted_domain() {
        let mut configuration = Configuration::default();
        configuration.domain.min[1] = 11.0;
        let err = configuration.validate().unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidConfiguration(_)));
    }

    #[test]
    fn rejects_bad_ring_and_viscosity() {
        let mut configuration = Configuration::default();
        configuration.viscosity = f64::NAN;
        assert!(configuration.validate().is_err());

        let mut configuration = Configuration::default();
        configuration.initial_conditions = InitialConditions::VortexRing(VortexRing {
            thickness: 0.0,
            ..VortexRing::default()
        });
        assert!(configuration.validate().is_err());
    }

    #[test]
    fn rejects_oversized_particle_count() {
        let configuration = Configuration::with_vortons(MAX_VORTONS + 1);
        assert!(configuration.validate().is_err());
    }

    #[test]
    fn unknown_fields_are_malformed() {
        let err = Configuration::from_json(r#"{"n_vortons": 1, "bogus": true}"#).unwrap_err();
        assert!(err.to_string().contains("malformed configuration"));
    }
}
