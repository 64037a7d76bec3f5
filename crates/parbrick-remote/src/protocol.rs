//! Remote protocol - JSON event/reply definitions

use serde::{Deserialize, Serialize};

/// Camera matrices in column-major order plus the viewport `[x, y, w, h]`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WireCamera {
    pub modelview: [f32; 16],
    pub projection: [f32; 16],
    pub viewport: [i32; 4],
}

/// Events sent from the compositing node to a render server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cmd", content = "params")]
pub enum RemoteEvent {
    /// Render one frame into `rect` (`[x, y, w, h]`) and reply with a tile
    Render { camera: WireCamera, rect: [i32; 4], frame: u64 },
    /// Viewport changed
    Resize { width: u32, height: u32 },
    /// Set one renderer parameter
    NewParameter { id: String, value: serde_json::Value },
    /// Replace the transfer function
    TransferFunction { value: serde_json::Value },
    /// Release the renderer and close the connection
    Exit,
    /// Health check
    Ping,
}

/// Replies from a render server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status")]
pub enum RemoteReply {
    #[serde(rename = "ok")]
    Ok,
    /// Premultiplied RGBA floats, row-major, bottom row first
    #[serde(rename = "tile")]
    Tile { rect: [i32; 4], frame: u64, pixels: Vec<f32> },
    #[serde(rename = "error")]
    Error { message: String },
}

impl RemoteReply {
    pub fn error(msg: impl Into<String>) -> Self {
        RemoteReply::Error { message: msg.into() }
    }

    /// Tile reply with no pixels
    pub fn empty_tile(frame: u64) -> Self {
        RemoteReply::Tile {
            rect: [0, 0, 0, 0],
            frame,
            pixels: Vec::new(),
        }
    }
}
