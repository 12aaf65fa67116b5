//! AmbiancePRO frame encoding and decoding.
//!
//! Every exchange starts with a 16 byte header delimited by `0xAF`:
//!
//! ```text
//! [0xAF, code, type, module, 0x00, 0x00, 0x08, 0x01, col_data_count, 0xFF x6, 0xAF]
//! ```
//!
//! Actions append an 8 byte body:
//!
//! ```text
//! [module, output, action, 0xFF, 0xFF, level, 0xFF, 0xFF]
//! ```
//!
//! Poll replies carry one state byte per output address (0..12) starting at
//! byte 32.

use crate::core::error::{GatewayError, Result};
use crate::core::state::{ModuleView, OutputState};
use crate::core::topology::ModuleType;

/// Dialect name used in errors and logs.
pub const PROTOCOL_NAME: &str = "AmbiancePRO";

/// Header delimiter.
pub const FRAME_DELIMITER: u8 = 0xAF;

/// Header length.
pub const HEADER_LEN: usize = 16;

/// Action body length.
pub const ACTION_BODY_LEN: usize = 8;

/// First state byte in a poll reply.
pub const STATE_OFFSET: usize = 4 * 8;

/// Number of state bytes in a poll reply.
pub const STATE_COUNT: usize = 12;

/// Level written when the caller gives none (full brightness).
pub const DEFAULT_LEVEL: u8 = 0x64;

const COL_MAX_COUNT: u8 = 0x08;
const ROW_COUNT: u8 = 0x01;
const ACTION_COL_DATA_COUNT: u8 = 0x08;
// The controller needs 0 here to send the larger poll reply.
const POLL_COL_DATA_COUNT: u8 = 0x00;
const UNUSED: u8 = 0xFF;

/// Header type code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum HeaderCode {
    /// State request.
    Poll = 0x01,
    /// Output action.
    Action = 0x02,
}

/// Action byte in the action body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Action {
    /// Switch off.
    Off = 0x00,
    /// Switch on.
    On = 0x01,
    /// Flip current state.
    Toggle = 0x02,
}

/// Hardware byte for a module type.
pub fn module_type_byte(module_type: ModuleType) -> u8 {
    match module_type {
        ModuleType::Relay => 0x08,
        ModuleType::Dimmer => 0x10,
        ModuleType::ZeroToTenVolt => 0x18,
    }
}

fn header(code: HeaderCode, module_type: ModuleType, module: u8, col_data_count: u8) -> [u8; HEADER_LEN] {
    [
        FRAME_DELIMITER,
        code as u8,
        module_type_byte(module_type),
        module,
        0x00, // high
        0x00, // low
        COL_MAX_COUNT,
        ROW_COUNT,
        col_data_count,
        UNUSED,
        UNUSED,
        UNUSED,
        UNUSED,
        UNUSED,
        UNUSED,
        FRAME_DELIMITER,
    ]
}

/// Build a poll request for a module.
pub fn encode_poll(module_type: ModuleType, module: u8) -> Vec<u8> {
    header(HeaderCode::Poll, module_type, module, POLL_COL_DATA_COUNT).to_vec()
}

/// Build an action request (header + body).
///
/// `level` is written verbatim (clamped to 100) and defaults to full.
pub fn encode_action(
    module_type: ModuleType,
    module: u8,
    output: u8,
    action: Action,
    level: Option<u8>,
) -> Vec<u8> {
    let mut frame = Vec::with_capacity(HEADER_LEN + ACTION_BODY_LEN);
    frame.extend_from_slice(&header(HeaderCode::Action, module_type, module, ACTION_COL_DATA_COUNT));
    frame.extend_from_slice(&[
        module,
        output,
        action as u8,
        UNUSED, // delay on
        UNUSED, // delay off
        level.map(|l| l.min(100)).unwrap_or(DEFAULT_LEVEL),
        UNUSED, // dimmer speed
        UNUSED,
    ]);
    frame
}

/// Decode a poll reply into per-output states.
///
/// A zero byte means off. Any other byte means on, and for dimmable outputs
/// the byte is the level. State bytes for addresses the module doesn't have
/// are dropped.
pub fn decode_poll(view: &ModuleView, reply: &[u8]) -> Result<Vec<OutputState>> {
    let end = STATE_OFFSET + STATE_COUNT;
    if reply.len() < end {
        return Err(GatewayError::decode(format!(
            "{} poll reply for module {} is {} bytes, need at least {}",
            PROTOCOL_NAME,
            view.address(),
            reply.len(),
            end
        )));
    }

    let states = reply[STATE_OFFSET..end]
        .iter()
        .enumerate()
        .filter_map(|(index, &raw)| {
            let output = view.output(index as u8)?;
            let powered = raw != 0;
            let state = if output.dimmable && powered {
                OutputState::dimmed(output.clone(), powered, view.raw_to_display(raw))
            } else {
                OutputState::switched(output.clone(), powered)
            };
            Some(state)
        })
        .collect();

    Ok(states)
}
