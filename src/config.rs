use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::RouterError;
use crate::geometry::real_to_tile;

pub const MAX_CYCLES_ENV: &str = "TILEROUTE_MAX_CYCLES";
pub const TRACE_JSON_ENV: &str = "TILEROUTE_TRACE_JSON";

#[derive(Clone, Copy, PartialEq, Eq, Debug, Default, Serialize, Deserialize)]
pub enum RoutingMode {
    #[default]
    Pcb,
    Schematic,
}

#[derive(Clone, Copy, PartialEq, Debug, Serialize, Deserialize)]
pub struct ViaSize {
    pub ring_thickness: f64,
    pub hole_size: f64,
}

impl ViaSize {
    pub fn diameter(&self) -> f64 {
        self.ring_thickness * 2.0 + self.hole_size
    }
}

#[derive(Clone, Copy, PartialEq, Debug, Serialize, Deserialize)]
pub struct JumperSize {
    pub width: f64,
    pub height: f64,
}

/// Everything the router reads from its host's settings. Built once and
/// passed down; nothing is read from global state during a run.
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    pub trace_width: f64,
    pub keepout: f64,
    pub via: ViaSize,
    pub jumper_size: JumperSize,
    pub max_cycles: usize,
    pub allow_jumpers: bool,
    pub both_layers: bool,
    pub mode: RoutingMode,
    /// Clearance used by the design rule check; half the trace width when unset.
    pub drc_keepout: Option<f64>,
    /// Widths offered when a connector is too narrow for `trace_width`.
    pub trace_widths: Vec<f64>,
    pub trace_json: Option<PathBuf>,
}

impl Default for RouterConfig {
    fn default() -> Self {
        RouterConfig {
            trace_width: 24.0,
            keepout: 10.0,
            via: ViaSize {
                ring_thickness: 10.0,
                hole_size: 20.0,
            },
            jumper_size: JumperSize {
                width: 40.0,
                height: 40.0,
            },
            max_cycles: 10,
            allow_jumpers: false,
            both_layers: true,
            mode: RoutingMode::Pcb,
            drc_keepout: None,
            trace_widths: vec![8.0, 12.0, 16.0, 24.0, 32.0, 48.0],
            trace_json: None,
        }
    }
}

impl RouterConfig {
    pub fn validate(&self) -> Result<(), RouterError> {
        let positive = [
            ("trace_width", self.trace_width),
            ("via ring thickness", self.via.ring_thickness),
            ("via hole size", self.via.hole_size),
            ("jumper width", self.jumper_size.width),
            ("jumper height", self.jumper_size.height),
        ];
        for (name, value) in positive {
            if !value.is_finite() || value <= 0.0 {
                return Err(RouterError::InvalidConfig(format!("{name} must be positive, got {value}")));
            }
        }
        if !self.keepout.is_finite() || self.keepout < 0.0 {
            return Err(RouterError::InvalidConfig(format!(
                "keepout must not be negative, got {}",
                self.keepout
            )));
        }
        if let Some(k) = self.drc_keepout {
            if !k.is_finite() || k < 0.0 {
                return Err(RouterError::InvalidConfig(format!("drc keepout must not be negative, got {k}")));
            }
        }
        if self.max_cycles == 0 {
            return Err(RouterError::InvalidConfig("max_cycles must be at least 1".to_string()));
        }
        if self.trace_widths.iter().any(|w| !w.is_finite() || *w <= 0.0) {
            return Err(RouterError::InvalidConfig("trace widths must be positive".to_string()));
        }
        if real_to_tile(self.trace_width) < 2 {
            return Err(RouterError::InvalidConfig(format!(
                "trace_width {} is below tile resolution",
                self.trace_width
            )));
        }
        Ok(())
    }

    /// Applies `TILEROUTE_MAX_CYCLES` and `TILEROUTE_TRACE_JSON` when set.
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(cycles) = std::env::var(MAX_CYCLES_ENV).ok().and_then(|v| v.parse().ok()) {
            self.max_cycles = cycles;
        }
        if let Ok(path) = std::env::var(TRACE_JSON_ENV) {
            self.trace_json = Some(PathBuf::from(path));
        }
        self
    }

    pub fn drc_keepout(&self) -> f64 {
        self.drc_keepout.unwrap_or(self.trace_width / 2.0)
    }

    /// Trace width to use when the narrowest connector being routed measures
    /// `min_dimension`. Keeps `trace_width` when it fits, otherwise picks the
    /// widest standard width that does, falling back to the dimension itself.
    pub fn fitted_trace_width(&self, min_dimension: f64) -> f64 {
        if min_dimension >= self.trace_width {
            return self.trace_width;
        }
        self.trace_widths
            .iter()
            .copied()
            .filter(|w| *w <= min_dimension)
            .fold(None, |best: Option<f64>, w| Some(best.map_or(w, |b| b.max(w))))
            .unwrap_or(min_dimension)
    }

    /// Square footprint a via needs, keepout included, in real units.
    pub(crate) fn via_extent(&self) -> f64 {
        self.via.diameter() + 2.0 * self.keepout
    }
}

/// A trace width in both coordinate spaces.
#[derive(Clone, Copy, PartialEq, Debug)]
pub(crate) struct Widths {
    pub(crate) real: f64,
    pub(crate) half_real: f64,
    pub(crate) tile: i32,
    pub(crate) half_tile: i32,
}

impl Widths {
    pub(crate) fn new(width: f64) -> Self {
        Widths {
            real: width,
            half_real: width / 2.0,
            tile: real_to_tile(width),
            half_tile: real_to_tile(width / 2.0),
        }
    }
}
