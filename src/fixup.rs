//! Emits a node graph to bytes and appends its fixup table: the list of
//! byte offsets the loader must rewrite from file-relative offsets to
//! runtime absolute addresses.
//!
//! Stream layout: the emitted bytes, an optional one-byte pad if that
//! length is odd, a word giving the fixup count, then that many offset
//! words. All words respect the configured endianness.

use crate::ir::anode::{write_word, Arena, AnodeId};

/// Emits `root`'s bytes followed by its fixup table.
pub fn emit_stream(arena: &Arena, root: AnodeId, big_endian: bool) -> Vec<u8> {
    let mut out = Vec::new();
    arena.emit(root, &mut out, big_endian);

    let mut fixups = Vec::new();
    arena.collect_fixups(root, &mut fixups);

    if out.len() % 2 != 0 {
        out.push(0);
    }
    write_word(&mut out, fixups.len() as u16, big_endian);
    for offset in fixups {
        write_word(&mut out, offset as u16, big_endian);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forward_ref;
    use crate::ir::anode::{Anode, CompositeKind, CompositeNode, OpNode, Operand, Target};
    use crate::ir::opcode::OP_LOFSA;

    #[test]
    fn stream_with_no_fixups_has_zero_count_and_even_pad() {
        let mut arena = Arena::new();
        let root = arena.alloc(Anode::Composite(CompositeNode {
            name: "unit".into(),
            kind: CompositeKind::Generic,
            children: Vec::new(),
        }));
        let word = arena.alloc(Anode::Word(0x1234));
        arena.append(root, word);
        arena.set_offset(root, 0);

        let bytes = emit_stream(&arena, root, false);
        // 2 data bytes, no pad needed, then a zero count word.
        assert_eq!(bytes, vec![0x34, 0x12, 0x00, 0x00]);
    }

    #[test]
    fn object_ref_contributes_one_fixup_at_self_offset_plus_one() {
        let mut arena = Arena::new();
        let root = arena.alloc(Anode::Composite(CompositeNode {
            name: "unit".into(),
            kind: CompositeKind::Generic,
            children: Vec::new(),
        }));
        let padding = arena.alloc(Anode::Word(0));
        let target_ref = forward_ref::shared_resolved(Target(padding));
        let load = arena.alloc(Anode::Op(OpNode::with_operand(
            OP_LOFSA,
            Operand::None,
        )));
        // Swap in the real object-ref operand once target is known;
        // with_operand doesn't model ObjectRef directly so build it by hand.
        if let Anode::Op(op) = arena.get_mut(load) {
            op.operand = Operand::ObjectRef(target_ref);
        }
        arena.append(root, padding);
        arena.append(root, load);
        arena.set_offset(root, 0);

        let mut fixups = Vec::new();
        arena.collect_fixups(root, &mut fixups);
        // padding word occupies offset 0..2, load opcode at offset 2,
        // fixup at self_offset + 1 == 3.
        assert_eq!(fixups, vec![3]);
    }

    #[test]
    fn odd_length_stream_is_padded_before_the_count_word() {
        let mut arena = Arena::new();
        let root = arena.alloc(Anode::Composite(CompositeNode {
            name: "unit".into(),
            kind: CompositeKind::Generic,
            children: Vec::new(),
        }));
        let text = arena.alloc(Anode::Text("ab".into()));
        arena.append(root, text);
        arena.set_offset(root, 0);

        let bytes = emit_stream(&arena, root, false);
        // "ab\0" is 3 bytes (odd) so one pad byte follows before the
        // count word.
        assert_eq!(&bytes[0..3], b"ab\0");
        assert_eq!(bytes[3], 0);
        assert_eq!(&bytes[4..6], &[0, 0]);
    }
}
