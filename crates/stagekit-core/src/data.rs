//! Data model for the stage client
//!
//! Positions are a *local cache* of the last commanded target. The device is
//! the source of truth; the cache is updated optimistically when a move
//! completes and reset to origin by home operations.

use serde::{Deserialize, Serialize};

/// Connection lifecycle state, owned exclusively by the session manager
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ConnectionState {
    /// No transport is open.
    #[default]
    Disconnected,
    /// Transport open is in progress; commands are rejected.
    Connecting,
    /// Transport open and handshake complete.
    Connected,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "Disconnected"),
            ConnectionState::Connecting => write!(f, "Connecting"),
            ConnectionState::Connected => write!(f, "Connected"),
        }
    }
}

/// Cartesian stage position in millimeters
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    /// X coordinate in mm.
    pub x: f64,
    /// Y coordinate in mm.
    pub y: f64,
    /// Z coordinate in mm.
    pub z: f64,
}

impl Position {
    /// The stage origin
    pub const ORIGIN: Position = Position {
        x: 0.0,
        y: 0.0,
        z: 0.0,
    };

    /// Create a position from explicit coordinates
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// Overwrite the axes present in an absolute move target
    pub fn apply(&mut self, target: &MoveTarget) {
        if let Some(x) = target.x {
            self.x = x;
        }
        if let Some(y) = target.y {
            self.y = y;
        }
        if let Some(z) = target.z {
            self.z = z;
        }
    }

    /// Shift by the deltas present in a relative move target
    pub fn offset_by(&mut self, delta: &MoveTarget) {
        if let Some(dx) = delta.x {
            self.x += dx;
        }
        if let Some(dy) = delta.y {
            self.y += dy;
        }
        if let Some(dz) = delta.z {
            self.z += dz;
        }
    }
}

impl std::fmt::Display for Position {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {}, {}) mm", self.x, self.y, self.z)
    }
}

/// Per-axis move parameters; an absent axis is omitted from the wire command
/// and the device retains its prior value for it
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct MoveTarget {
    /// X coordinate or delta in mm, if commanded.
    pub x: Option<f64>,
    /// Y coordinate or delta in mm, if commanded.
    pub y: Option<f64>,
    /// Z coordinate or delta in mm, if commanded.
    pub z: Option<f64>,
}

impl MoveTarget {
    /// Create an empty target (no axes commanded)
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the X axis
    pub fn x(mut self, x: f64) -> Self {
        self.x = Some(x);
        self
    }

    /// Set the Y axis
    pub fn y(mut self, y: f64) -> Self {
        self.y = Some(y);
        self
    }

    /// Set the Z axis
    pub fn z(mut self, z: f64) -> Self {
        self.z = Some(z);
        self
    }

    /// True when no axis is commanded
    pub fn is_empty(&self) -> bool {
        self.x.is_none() && self.y.is_none() && self.z.is_none()
    }
}
