use std::io::Write;

use flate2::write::ZlibEncoder;
use flate2::Compression;
use pkl_opcodes::Protocol;

use crate::caps::HostCaps;
use crate::emit::generate;
use crate::error::{CompileErrorKind, CompilerError, Result};
use crate::ir::{Node, Value};

/// Re-express a finished stream as a new stream that carries the old one
/// compressed, plus the instructions to inflate and replay it.
///
/// The wrapping itself is ordinary IR lowered through the code generator, so
/// the capability references share the session memo table. The fixed
/// overhead means small inputs can come out larger; see
/// [`wrap_compressed_if_smaller`].
pub fn wrap_compressed(stream: &[u8], protocol: Protocol) -> Result<Vec<u8>> {
    wrap_compressed_with(&HostCaps::default(), stream, protocol)
}

pub fn wrap_compressed_with(
    caps: &HostCaps,
    stream: &[u8],
    protocol: Protocol,
) -> Result<Vec<u8>> {
    let packed = deflate(stream)?;
    let inflated = Node::call(caps.decompress_capability(), vec![Value::Bytes(packed)]);
    let replayed = Node::call(caps.replay_capability(), vec![Value::Node(inflated)]);
    generate(&replayed, protocol)
}

/// Wrapping as a size policy: keep the wrapped form only when it is actually
/// smaller than the input.
pub fn wrap_compressed_if_smaller(stream: &[u8], protocol: Protocol) -> Result<Vec<u8>> {
    let wrapped = wrap_compressed(stream, protocol)?;
    if wrapped.len() < stream.len() {
        Ok(wrapped)
    } else {
        Ok(stream.to_vec())
    }
}

fn deflate(payload: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::best());
    encoder
        .write_all(payload)
        .and_then(|_| encoder.finish())
        .map_err(|e| {
            CompilerError::new(CompileErrorKind::Internal, format!("deflate failed: {e}"))
        })
}
