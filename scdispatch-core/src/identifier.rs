//! Opaque-identifier rewriter, covering every lifecycle reply address with
//! a fixed, fully-enumerated address/position table rather than partial
//! coverage.
//!
//! The bidirectional map itself is a narrow-critical-section table, built
//! on the same insert-on-first-use/remove-on-lifecycle-end discipline a
//! node registry would use, generalized from a liveness set to a
//! bidirectional allocator.
//!
//! Rewriting itself operates on the decoded [`crate::osc::OscPacketOwned`]
//! representation rather than on raw bytes: outbound messages are built
//! from application calls (never decoded from wire bytes), so substituting
//! `Uuid16` args for `Int32` before the fast encoder runs produces correct
//! padding and type-tag strings for free — the encoder computes the type
//! tag from the args it is actually given.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::osc::{OscArg, OscMessageOwned, OscPacketOwned};

/// First engine-native id handed out by the allocator; ids below this are
/// reserved for the engine's own bookkeeping.
const ALLOCATOR_FLOOR: i32 = 1_000;

/// Lifecycle reply addresses that carry node identifiers, and the
/// zero-based argument positions that are identifier-bearing. Position 0 is
/// always the primary id; later positions are the secondary id fields
/// (parent/group, prev, next, and — only present for group nodes — head,
/// tail), all of which need rewriting, not just the primary.
struct AddressShape {
    address: &'static str,
    /// Argument positions that may hold an identifier. Positions beyond
    /// the message's actual arg count are simply absent and skipped.
    id_positions: &'static [usize],
    /// Whether observing this address should drop the map entry for the
    /// primary (position 0) identifier after rewriting it.
    ends_node: bool,
}

const NODE_CREATED: AddressShape =
    AddressShape { address: "/n_go", id_positions: &[0, 1, 2, 3, 5, 6], ends_node: false };
const NODE_ENDED: AddressShape =
    AddressShape { address: "/n_end", id_positions: &[0, 1, 2, 3, 5, 6], ends_node: true };
const NODE_INFO: AddressShape =
    AddressShape { address: "/n_info", id_positions: &[0, 1, 2, 3, 5, 6], ends_node: false };
const NODE_MOVED: AddressShape =
    AddressShape { address: "/n_move", id_positions: &[0, 1, 2, 3], ends_node: false };
const NODE_PARAM_SET: AddressShape =
    AddressShape { address: "/n_set", id_positions: &[0], ends_node: false };

const KNOWN_SHAPES: &[AddressShape] = &[NODE_CREATED, NODE_ENDED, NODE_INFO, NODE_MOVED, NODE_PARAM_SET];

fn shape_for(address: &str) -> Option<&'static AddressShape> {
    KNOWN_SHAPES.iter().find(|s| s.address == address)
}

struct MapInner {
    forward: HashMap<[u8; 16], i32>,
    reverse: HashMap<i32, [u8; 16]>,
    next_id: i32,
}

/// Bidirectional map between opaque 16-byte node identifiers and the
/// engine's native 32-bit ids.
pub struct IdentifierMap {
    inner: Mutex<MapInner>,
}

impl IdentifierMap {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(MapInner {
                forward: HashMap::new(),
                reverse: HashMap::new(),
                next_id: ALLOCATOR_FLOOR,
            }),
        }
    }

    /// Writer side (pre-send rewriter): look up an existing mapping or
    /// allocate a fresh one.
    pub fn lookup_or_allocate(&self, opaque: [u8; 16]) -> i32 {
        let mut inner = self.inner.lock().expect("identifier map poisoned");
        if let Some(&id) = inner.forward.get(&opaque) {
            return id;
        }
        let id = inner.next_id;
        inner.next_id += 1;
        inner.forward.insert(opaque, id);
        inner.reverse.insert(id, opaque);
        id
    }

    /// Reader side (reply-rewriter thread): reverse lookup only; never
    /// allocates. An id with no mapping passes through as-is rather than
    /// synthesising a fake opaque id.
    pub fn reverse_lookup(&self, id: i32) -> Option<[u8; 16]> {
        let inner = self.inner.lock().expect("identifier map poisoned");
        inner.reverse.get(&id).copied()
    }

    /// Drops both directions of the mapping for `id`, on node-ended.
    pub fn remove(&self, id: i32) {
        let mut inner = self.inner.lock().expect("identifier map poisoned");
        if let Some(opaque) = inner.reverse.remove(&id) {
            inner.forward.remove(&opaque);
        }
    }

    pub fn live_count(&self) -> usize {
        self.inner.lock().expect("identifier map poisoned").forward.len()
    }
}

impl Default for IdentifierMap {
    fn default() -> Self {
        Self::new()
    }
}

/// Outbound direction: substitute every `Uuid16` arg with its
/// engine-native `Int32`, recursing into nested bundle elements.
pub fn rewrite_outbound(map: &IdentifierMap, packet: &mut OscPacketOwned) {
    match packet {
        OscPacketOwned::Message(msg) => rewrite_outbound_message(map, msg),
        OscPacketOwned::Bundle(bundle) => {
            for element in &mut bundle.elements {
                rewrite_outbound(map, element);
            }
        }
    }
}

fn rewrite_outbound_message(map: &IdentifierMap, msg: &mut OscMessageOwned) {
    for arg in &mut msg.args {
        if let OscArg::Uuid16(opaque) = *arg {
            *arg = OscArg::Int32(map.lookup_or_allocate(opaque));
        }
    }
}

/// Inbound direction: for the fixed set of lifecycle addresses, replace
/// known identifier-bearing `Int32` args with
/// their opaque form when a mapping exists. On `node-ended`, the mapping is
/// removed after rewriting so long-lived sessions don't leak entries.
pub fn rewrite_inbound(map: &IdentifierMap, packet: &mut OscPacketOwned) {
    match packet {
        OscPacketOwned::Message(msg) => rewrite_inbound_message(map, msg),
        OscPacketOwned::Bundle(bundle) => {
            for element in &mut bundle.elements {
                rewrite_inbound(map, element);
            }
        }
    }
}

fn rewrite_inbound_message(map: &IdentifierMap, msg: &mut OscMessageOwned) {
    let Some(shape) = shape_for(&msg.address) else { return };

    let mut primary_id = None;
    for &pos in shape.id_positions {
        let Some(arg) = msg.args.get_mut(pos) else { continue };
        if let OscArg::Int32(id) = *arg {
            if pos == 0 {
                primary_id = Some(id);
            }
            if let Some(opaque) = map.reverse_lookup(id) {
                *arg = OscArg::Uuid16(opaque);
            } else {
                // No mapping: leave the raw engine id in place.
                log::debug!(target: "dispatch::rewriter", "no opaque mapping for engine id {id} in {}", msg.address);
            }
        }
    }

    if shape.ends_node {
        if let Some(id) = primary_id {
            map.remove(id);
        }
    }
}
