//! Renderer parameters and transfer functions

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::core::types::Vec3;
use crate::math::VoxelBox;
use crate::render::frame::Rgba;

/// Parameters forwarded to every brick renderer
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ParameterId {
    /// Voxel box this renderer is responsible for
    VisibleRegion,
    /// Visible region plus the border needed for interpolation
    PaddingRegion,
    BrickSize,
    /// Center of the probe box in object space
    ProbePosition,
    /// Extent of the probe box in object space
    ProbeSize,
    /// Sampling rate multiplier
    Quality,
    Interpolation,
    /// Draw brick outlines instead of the volume
    ShowBricks,
}

impl ParameterId {
    pub const ALL: [ParameterId; 8] = [
        ParameterId::VisibleRegion,
        ParameterId::PaddingRegion,
        ParameterId::BrickSize,
        ParameterId::ProbePosition,
        ParameterId::ProbeSize,
        ParameterId::Quality,
        ParameterId::Interpolation,
        ParameterId::ShowBricks,
    ];

    /// Stable name used on the wire
    pub fn name(self) -> &'static str {
        match self {
            ParameterId::VisibleRegion => "VisibleRegion",
            ParameterId::PaddingRegion => "PaddingRegion",
            ParameterId::BrickSize => "BrickSize",
            ParameterId::ProbePosition => "ProbePosition",
            ParameterId::ProbeSize => "ProbeSize",
            ParameterId::Quality => "Quality",
            ParameterId::Interpolation => "Interpolation",
            ParameterId::ShowBricks => "ShowBricks",
        }
    }

    pub fn from_name(name: &str) -> Option<ParameterId> {
        Self::ALL.into_iter().find(|id| id.name() == name)
    }
}

/// Value of a renderer parameter
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub enum ParamValue {
    Bool(bool),
    Int(i64),
    Float(f32),
    Vec3(Vec3),
    Box(VoxelBox),
    #[default]
    Empty,
}

impl ParamValue {
    pub fn as_bool(&self) -> Option<bool> {
        match *self {
            ParamValue::Bool(b) => Some(b),
            ParamValue::Int(i) => Some(i != 0),
            _ => None,
        }
    }

    pub fn as_f32(&self) -> Option<f32> {
        match *self {
            ParamValue::Float(f) => Some(f),
            ParamValue::Int(i) => Some(i as f32),
            _ => None,
        }
    }

    pub fn as_vec3(&self) -> Option<Vec3> {
        match *self {
            ParamValue::Vec3(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_box(&self) -> Option<VoxelBox> {
        match *self {
            ParamValue::Box(b) => Some(b),
            _ => None,
        }
    }
}

/// Latest value of every parameter that was set
pub type RenderState = HashMap<ParameterId, ParamValue>;

/// One control point of a transfer function
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct TfPoint {
    /// Scalar value in [0, 1]
    pub value: f32,
    /// Straight-alpha color
    pub color: [f32; 4],
}

/// Piecewise-linear mapping from scalar value to color and opacity
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TransferFunction {
    points: Vec<TfPoint>,
}

impl Default for TransferFunction {
    /// Grey ramp from transparent black to opaque white
    fn default() -> Self {
        Self::new(vec![
            TfPoint { value: 0.0, color: [0.0, 0.0, 0.0, 0.0] },
            TfPoint { value: 1.0, color: [1.0, 1.0, 1.0, 1.0] },
        ])
    }
}

impl TransferFunction {
    /// Points are sorted by value
    pub fn new(mut points: Vec<TfPoint>) -> Self {
        points.sort_by(|a, b| a.value.total_cmp(&b.value));
        Self { points }
    }

    pub fn points(&self) -> &[TfPoint] {
        &self.points
    }

    /// Premultiplied color for a scalar value
    pub fn lookup(&self, value: f32) -> Rgba {
        let (Some(first), Some(last)) = (self.points.first(), self.points.last()) else {
            return Rgba::TRANSPARENT;
        };
        let color = if value <= first.value {
            first.color
        } else if value >= last.value {
            last.color
        } else {
            let i = self.points.partition_point(|p| p.value <= value);
            let (a, b) = (self.points[i - 1], self.points[i]);
            let t = (value - a.value) / (b.value - a.value).max(f32::EPSILON);
            std::array::from_fn(|c| a.color[c] + t * (b.color[c] - a.color[c]))
        };
        Rgba::premultiplied(color[0], color[1], color[2], color[3])
    }

    /// Smallest range of values with non-zero opacity, or `None` if fully
    /// transparent.
    pub fn opaque_range(&self) -> Option<(f32, f32)> {
        let mut range: Option<(f32, f32)> = None;
        for (i, point) in self.points.iter().enumerate() {
            let touches_opaque = point.color[3] > 0.0
                || self.points.get(i + 1).is_some_and(|n| n.color[3] > 0.0)
                || i.checked_sub(1).and_then(|p| self.points.get(p)).is_some_and(|p| p.color[3] > 0.0);
            if touches_opaque {
                range = Some(match range {
                    Some((lo, hi)) => (lo.min(point.value), hi.max(point.value)),
                    None => (point.value, point.value),
                });
            }
        }
        // a single opaque end point also covers everything beyond it
        if let (Some((lo, hi)), Some(first), Some(last)) = (range, self.points.first(), self.points.last()) {
            let lo = if first.color[3] > 0.0 { f32::NEG_INFINITY } else { lo };
            let hi = if last.color[3] > 0.0 { f32::INFINITY } else { hi };
            return Some((lo, hi));
        }
        range
    }
}
