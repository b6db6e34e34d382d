use std::collections::HashMap;

use pkl_opcodes::{arg_shape, op, ArgShape};

use crate::error::{CompileErrorKind, CompilerError, Result};

/// Renumber memo slots in an already-emitted stream by descending use
/// frequency, so the hottest slots get the 1-byte operand forms.
///
/// Operates on raw bytes; the original tree is not needed. Streams using the
/// combined store-and-cache instruction are refused outright, as are streams
/// with opcodes outside the contract. Running the pass on its own output is
/// a fixpoint.
pub fn optimize_slots(stream: &[u8]) -> Result<Vec<u8>> {
    let mapping = slot_mapping(stream)?;
    rewrite(stream, &mapping)
}

#[derive(Debug, Clone, Copy)]
struct SlotStats {
    uses: u32,
    first_seen: u32,
}

/// One decoded instruction: opcode, operand bounds, next offset.
struct ScannedOp {
    opcode: u8,
    arg_start: usize,
    end: usize,
}

fn scan_op(stream: &[u8], pos: usize) -> Result<ScannedOp> {
    let opcode = stream[pos];
    let shape = arg_shape(opcode).ok_or_else(|| {
        CompilerError::new(
            CompileErrorKind::Compatibility,
            format!("unknown opcode {opcode:#04x} at offset {pos}"),
        )
    })?;
    let arg_start = pos + 1;
    let end = match shape {
        ArgShape::None => arg_start,
        ArgShape::U8 => arg_start + 1,
        ArgShape::U16Le => arg_start + 2,
        ArgShape::I32Le | ArgShape::U32Le => arg_start + 4,
        ArgShape::U64Le | ArgShape::F64Be => arg_start + 8,
        ArgShape::DecimalNl | ArgShape::StringNl => newline_end(stream, pos, arg_start, 1)?,
        ArgShape::StringNl2 => newline_end(stream, pos, arg_start, 2)?,
        ArgShape::BytesU8 => {
            let len = *stream.get(arg_start).ok_or_else(|| truncated(pos))? as usize;
            arg_start + 1 + len
        }
        ArgShape::BytesU32 => {
            let raw = stream
                .get(arg_start..arg_start + 4)
                .ok_or_else(|| truncated(pos))?;
            let len = u32::from_le_bytes(raw.try_into().expect("4-byte slice")) as usize;
            arg_start + 4 + len
        }
        ArgShape::BytesU64 => {
            let raw = stream
                .get(arg_start..arg_start + 8)
                .ok_or_else(|| truncated(pos))?;
            let len = u64::from_le_bytes(raw.try_into().expect("8-byte slice")) as usize;
            arg_start + 8 + len
        }
    };
    if end > stream.len() {
        return Err(truncated(pos));
    }
    Ok(ScannedOp {
        opcode,
        arg_start,
        end,
    })
}

fn newline_end(stream: &[u8], pos: usize, from: usize, fields: usize) -> Result<usize> {
    let mut cursor = from;
    for _ in 0..fields {
        match stream[cursor..].iter().position(|&b| b == b'\n') {
            Some(offset) => cursor += offset + 1,
            None => return Err(truncated(pos)),
        }
    }
    Ok(cursor)
}

fn truncated(pos: usize) -> CompilerError {
    CompilerError::new(
        CompileErrorKind::Compatibility,
        format!("truncated operand for opcode at offset {pos}"),
    )
}

fn slot_of(stream: &[u8], scanned: &ScannedOp) -> Result<u32> {
    let operand = &stream[scanned.arg_start..scanned.end];
    match scanned.opcode {
        op::BINGET | op::BINPUT => Ok(operand[0] as u32),
        op::LONG_BINGET | op::LONG_BINPUT => {
            Ok(u32::from_le_bytes(operand.try_into().expect("4-byte slice")))
        }
        op::GET | op::PUT => {
            let digits = &operand[..operand.len() - 1];
            std::str::from_utf8(digits)
                .ok()
                .and_then(|s| s.parse::<u32>().ok())
                .ok_or_else(|| {
                    CompilerError::new(
                        CompileErrorKind::Compatibility,
                        format!("malformed decimal slot operand at offset {}", scanned.arg_start),
                    )
                })
        }
        _ => unreachable!("not a memo instruction"),
    }
}

fn slot_mapping(stream: &[u8]) -> Result<HashMap<u32, u32>> {
    let mut stats: HashMap<u32, SlotStats> = HashMap::new();
    let mut order: u32 = 0;
    let mut pos = 0;
    while pos < stream.len() {
        let scanned = scan_op(stream, pos)?;
        match scanned.opcode {
            op::MEMOIZE => {
                return Err(CompilerError::new(
                    CompileErrorKind::Compatibility,
                    format!(
                        "stream uses the combined store-and-cache instruction at offset {pos}; \
                         this pass only models separate store and load slots"
                    ),
                ));
            }
            op::PUT | op::BINPUT | op::LONG_BINPUT => {
                let slot = slot_of(stream, &scanned)?;
                let entry = stats.entry(slot).or_insert(SlotStats {
                    uses: 0,
                    first_seen: order,
                });
                entry.uses += 1;
                order += 1;
            }
            op::GET | op::BINGET | op::LONG_BINGET => {
                let slot = slot_of(stream, &scanned)?;
                let entry = stats.get_mut(&slot).ok_or_else(|| {
                    CompilerError::new(
                        CompileErrorKind::Resolution,
                        format!("slot {slot} is loaded before any store at offset {pos}"),
                    )
                })?;
                entry.uses += 1;
            }
            _ => {}
        }
        pos = scanned.end;
    }

    let mut ranked: Vec<(u32, SlotStats)> = stats.into_iter().collect();
    ranked.sort_by(|(_, a), (_, b)| b.uses.cmp(&a.uses).then(a.first_seen.cmp(&b.first_seen)));
    Ok(ranked
        .into_iter()
        .enumerate()
        .map(|(new, (old, _))| (old, new as u32))
        .collect())
}

fn rewrite(stream: &[u8], mapping: &HashMap<u32, u32>) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(stream.len());
    let mut pos = 0;
    while pos < stream.len() {
        let scanned = scan_op(stream, pos)?;
        match scanned.opcode {
            // Frame markers would carry stale lengths once operands change
            // width; they are optional, so they are dropped.
            op::FRAME => {}
            op::PUT | op::GET => {
                let slot = mapping[&slot_of(stream, &scanned)?];
                out.push(scanned.opcode);
                out.extend_from_slice(slot.to_string().as_bytes());
                out.push(b'\n');
            }
            op::BINPUT | op::LONG_BINPUT => {
                let slot = mapping[&slot_of(stream, &scanned)?];
                push_binary_slot(&mut out, op::BINPUT, op::LONG_BINPUT, slot);
            }
            op::BINGET | op::LONG_BINGET => {
                let slot = mapping[&slot_of(stream, &scanned)?];
                push_binary_slot(&mut out, op::BINGET, op::LONG_BINGET, slot);
            }
            _ => out.extend_from_slice(&stream[pos..scanned.end]),
        }
        pos = scanned.end;
    }
    Ok(out)
}

fn push_binary_slot(out: &mut Vec<u8>, short: u8, long: u8, slot: u32) {
    if slot < 256 {
        out.push(short);
        out.push(slot as u8);
    } else {
        out.push(long);
        out.extend_from_slice(&slot.to_le_bytes());
    }
}
