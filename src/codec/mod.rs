//! Byte-level frame codecs.
//!
//! Pure functions only: building request frames and decoding reply frames.
//! Talking to the controller is the job of [`crate::protocols`].

pub mod ambiance_pro;
pub mod sx;

/// Render a frame as lowercase hex for logs.
pub fn format_frame(frame: &[u8]) -> String {
    let mut out = String::with_capacity(frame.len() * 2);
    for byte in frame {
        out.push_str(&format!("{:02x}", byte));
    }
    out
}
