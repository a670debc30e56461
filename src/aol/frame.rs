use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, ErrorKind, Read, Write};

/// Writes one length-prefixed frame.
pub fn write_frame<W: Write>(writer: &mut W, payload: &[u8]) -> io::Result<()> {
    writer.write_u32::<LittleEndian>(payload.len() as u32)?;
    writer.write_all(payload)
}

/// Reads one frame from the log.
///
/// Returns `None` at a clean end of file and also for a truncated tail: a
/// header shorter than four bytes or a payload shorter than the header
/// promised. A partial trailing frame is what an interrupted append leaves
/// behind, so the reader treats it as the end of the log rather than an
/// error.
pub fn read_frame<R: Read>(reader: &mut R) -> io::Result<Option<Vec<u8>>> {
    let length = match reader.read_u32::<LittleEndian>() {
        Ok(n) => n as usize,
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    };

    let mut payload = vec![0u8; length];
    match reader.read_exact(&mut payload) {
        Ok(()) => Ok(Some(payload)),
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => Ok(None),
        Err(e) => Err(e),
    }
}
