use std::io::{Read, Write};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{Result, SyncError};
use crate::types::{Hash, HASH_SIZE};

/// Writes the synchronizer state: exactly the raw genesis block hash.
pub fn save_genesis<W: Write>(writer: &mut W, genesis: &Hash) -> Result<()> {
    writer.write_all(genesis.as_bytes())?;
    writer.flush()?;
    Ok(())
}

/// Reads a stored genesis hash and checks it against `expected`.
pub fn load_genesis<R: Read>(reader: &mut R, expected: &Hash) -> Result<()> {
    let mut bytes = [0u8; HASH_SIZE];
    reader.read_exact(&mut bytes)?;
    let found = Hash::from_bytes(bytes);

    if found != *expected {
        return Err(SyncError::GenesisMismatch {
            expected: *expected,
            found,
        });
    }

    Ok(())
}

pub fn save_json<T: Serialize, W: Write>(writer: &mut W, value: &T) -> Result<()> {
    serde_json::to_writer(&mut *writer, value)?;
    writer.flush()?;
    Ok(())
}

pub fn load_json<T: DeserializeOwned, R: Read>(reader: &mut R) -> Result<T> {
    Ok(serde_json::from_reader(reader)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn genesis_is_stored_as_fixed_width_bytes() {
        let genesis = Hash([3u8; HASH_SIZE]);
        let mut buf = Vec::new();
        save_genesis(&mut buf, &genesis).unwrap();

        assert_eq!(buf.len(), HASH_SIZE);
        assert!(load_genesis(&mut Cursor::new(&buf), &genesis).is_ok());
    }

    #[test]
    fn genesis_mismatch_is_reported() {
        let mut buf = Vec::new();
        save_genesis(&mut buf, &Hash([1u8; HASH_SIZE])).unwrap();

        let err = load_genesis(&mut Cursor::new(&buf), &Hash([2u8; HASH_SIZE])).unwrap_err();
        assert!(matches!(err, SyncError::GenesisMismatch { .. }));
    }

    #[test]
    fn truncated_state_is_an_io_error() {
        let err = load_genesis(&mut Cursor::new(vec![0u8; 4]), &Hash::NULL).unwrap_err();
        assert!(matches!(err, SyncError::Io(_)));
    }
}
