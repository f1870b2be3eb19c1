//! Binary checkpointing of host state.
//!
//! The whole per-host state — infections, drug lists, clinical state and
//! the random stream — serialises through a compact binary format whose
//! reader and writer are exact inverses: lists carry a length prefix
//! followed by their elements, floats round-trip bit-exactly, and the RNG
//! stream restores byte-equal. Shared scenario tables are not part of a
//! checkpoint; they are rebuilt from configuration at load.

use std::io::{Read, Write};

use crate::{Host, Result};

/// Write one host to a binary stream.
pub fn save_host<W: Write>(host: &Host, writer: W) -> Result<()> {
    bincode::serialize_into(writer, host)?;
    Ok(())
}

/// Read one host back; the inverse of [`save_host`].
pub fn load_host<R: Read>(reader: R) -> Result<Host> {
    Ok(bincode::deserialize_from(reader)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_type_reports_truncated_streams() {
        let short: &[u8] = &[1, 2, 3];
        assert!(load_host(short).is_err());
    }
}
