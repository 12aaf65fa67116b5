//! SX frame encoding and decoding.
//!
//! SX frames start with a fixed 16 byte prefix and address modules by
//! "module id" (`address + 64`).
//!
//! Poll requests list 24 `(module id, output)` slots, padded with
//! `(0xFF, 0xFF)`. The reply is one raw byte per slot with no header.
//! Modules with more than 24 outputs are polled in several batches.
//!
//! Action requests append a single `(module id, output, value)` triple.

use crate::core::error::{GatewayError, Result};
use crate::core::state::{ModuleView, OutputState};
use crate::core::topology::Output;

/// Dialect name used in errors and logs.
pub const PROTOCOL_NAME: &str = "SX";

/// Hardware addressing offset between bus address and module id.
pub const MODULE_ID_OFFSET: u8 = 64;

/// Fixed number of slots in one poll request.
pub const POLL_BATCH_SIZE: usize = 24;

/// Raw-to-display divisor for dimmable outputs (raw is in 10% steps).
pub const BRIGHTNESS_SCALE: u8 = 10;

/// Padding sentinel for unused poll slots.
pub const EMPTY_SLOT: u8 = 0xFF;

/// Poll request prefix.
pub const POLL_PREFIX: [u8; 16] = [
    0xED, 0x63, 0x30, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0xAF, 0xAF,
];

/// Action request prefix.
pub const ACTION_PREFIX: [u8; 16] = [
    0xED, 0x43, 0x31, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0xAF, 0xAF,
];

/// A value of exactly 2 makes the controller toggle instead of dim.
const TOGGLE_QUIRK_VALUE: u8 = 2;
const TOGGLE_QUIRK_SUBSTITUTE: u8 = 3;

/// Convert a bus address into an SX module id.
#[inline]
pub fn module_id(address: u8) -> u8 {
    address.saturating_add(MODULE_ID_OFFSET)
}

/// Build one poll request for up to [`POLL_BATCH_SIZE`] outputs.
pub fn encode_poll_batch(module: u8, batch: &[Output]) -> Vec<u8> {
    let id = module_id(module);
    let mut frame = Vec::with_capacity(POLL_PREFIX.len() + POLL_BATCH_SIZE * 2);
    frame.extend_from_slice(&POLL_PREFIX);

    for slot in 0..POLL_BATCH_SIZE {
        match batch.get(slot) {
            Some(output) => frame.extend_from_slice(&[id, output.address]),
            None => frame.extend_from_slice(&[EMPTY_SLOT, EMPTY_SLOT]),
        }
    }

    frame
}

/// Split a module's outputs into poll batches.
pub fn poll_batches(view: &ModuleView) -> impl Iterator<Item = &[Output]> {
    view.module.outputs.chunks(POLL_BATCH_SIZE)
}

/// Decode the reply to one poll batch.
///
/// Byte `i` of the reply belongs to output `i` of the batch. Dimmable outputs
/// always carry a level (`raw / brightness_scale`, 0 when off).
pub fn decode_poll_batch(view: &ModuleView, batch: &[Output], reply: &[u8]) -> Result<Vec<OutputState>> {
    if reply.len() < batch.len() {
        return Err(GatewayError::decode(format!(
            "{} poll reply for module {} has {} bytes for {} outputs",
            PROTOCOL_NAME,
            view.address(),
            reply.len(),
            batch.len()
        )));
    }

    let states = batch
        .iter()
        .zip(reply)
        .map(|(output, &raw)| {
            let powered = raw != 0;
            if output.dimmable {
                OutputState::dimmed(output.clone(), powered, view.raw_to_display(raw))
            } else {
                OutputState::switched(output.clone(), powered)
            }
        })
        .collect();

    Ok(states)
}

/// Compute the action value byte.
///
/// Non-dimmable outputs get 0/1. Dimmable outputs get the requested
/// percentage (100 when none given) or 0 when turning off, with 2 replaced
/// by 3.
pub fn action_value(dimmable: bool, on: bool, level: Option<u8>) -> u8 {
    if !dimmable {
        return u8::from(on);
    }
    if !on {
        return 0;
    }

    match level.unwrap_or(100).min(100) {
        TOGGLE_QUIRK_VALUE => TOGGLE_QUIRK_SUBSTITUTE,
        value => value,
    }
}

/// Build an action request.
pub fn encode_action(module: u8, output: &Output, on: bool, level: Option<u8>) -> Vec<u8> {
    let mut frame = Vec::with_capacity(ACTION_PREFIX.len() + 3);
    frame.extend_from_slice(&ACTION_PREFIX);
    frame.extend_from_slice(&[
        module_id(module),
        output.address,
        action_value(output.dimmable, on, level),
    ]);
    frame
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::topology::{Module, ModuleType};

    fn relay_view() -> ModuleView {
        ModuleView::new(Module::new(1, ModuleType::Relay, ["berging", "koele_berging"]), 1)
    }

    fn dimmer_view() -> ModuleView {
        ModuleView::new(
            Module::new(2, ModuleType::Dimmer, ["nachthal", "office"]),
            BRIGHTNESS_SCALE,
        )
    }

    #[test]
    fn test_module_id_offset() {
        assert_eq!(module_id(1), 0x41);
        assert_eq!(module_id(2), 0x42);
    }

    #[test]
    fn test_poll_frame_is_padded() {
        let view = relay_view();
        let frame = encode_poll_batch(1, &view.module.outputs);

        assert_eq!(frame.len(), 16 + 48);
        assert_eq!(&frame[..16], &POLL_PREFIX);
        assert_eq!(&frame[16..20], &[0x41, 0x00, 0x41, 0x01]);
        assert!(frame[20..].iter().all(|&b| b == EMPTY_SLOT));
    }

    #[test]
    fn test_large_modules_are_batched() {
        let names: Vec<String> = (0..30).map(|i| format!("o{i}")).collect();
        let view = ModuleView::new(Module::new(3, ModuleType::Relay, names), 1);

        let batches: Vec<&[Output]> = poll_batches(&view).collect();
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].len(), 24);
        assert_eq!(batches[1].len(), 6);
        assert_eq!(batches[1][0].address, 24);

        let frame = encode_poll_batch(3, batches[1]);
        assert_eq!(&frame[16..18], &[0x43, 24]);
        assert_eq!(&frame[28..30], &[0x43, 29]);
        assert_eq!(&frame[30..32], &[EMPTY_SLOT, EMPTY_SLOT]);
    }

    #[test]
    fn test_decode_relay() {
        let view = relay_view();
        let states = decode_poll_batch(&view, &view.module.outputs, &[0x00, 0x01]).unwrap();
        assert!(!states[0].powered);
        assert!(states[1].powered);
        assert_eq!(states[1].level, None);
    }

    #[test]
    fn test_decode_dimmer_divides_by_scale() {
        let view = dimmer_view();
        let states = decode_poll_batch(&view, &view.module.outputs, &[0x01, 0x64]).unwrap();
        assert!(states[0].powered);
        assert_eq!(states[0].level, Some(0));
        assert!(states[1].powered);
        assert_eq!(states[1].level, Some(10));

        let states = decode_poll_batch(&view, &view.module.outputs, &[0x10, 0x00]).unwrap();
        assert_eq!(states[0].level, Some(1));
        assert!(!states[1].powered);
        assert_eq!(states[1].level, Some(0));
    }

    #[test]
    fn test_short_reply_is_decode_error() {
        let view = dimmer_view();
        let err = decode_poll_batch(&view, &view.module.outputs, &[0x01]).unwrap_err();
        assert!(err.is_codec());
    }

    #[test]
    fn test_action_values() {
        assert_eq!(action_value(false, true, None), 1);
        assert_eq!(action_value(false, false, None), 0);
        assert_eq!(action_value(false, true, Some(2)), 1);

        assert_eq!(action_value(true, true, None), 100);
        assert_eq!(action_value(true, true, Some(20)), 20);
        assert_eq!(action_value(true, true, Some(2)), 3);
        assert_eq!(action_value(true, true, Some(3)), 3);
        assert_eq!(action_value(true, true, Some(150)), 100);
        assert_eq!(action_value(true, false, Some(50)), 0);
    }

    #[test]
    fn test_action_frame() {
        let view = dimmer_view();
        let frame = encode_action(2, &view.module.outputs[0], true, Some(20));

        let mut expected = ACTION_PREFIX.to_vec();
        expected.extend_from_slice(&[0x42, 0x00, 0x14]);
        assert_eq!(frame, expected);
    }
}
