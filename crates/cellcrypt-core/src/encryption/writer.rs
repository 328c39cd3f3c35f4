use tracing::trace;

use super::entry::EntryEncryptor;
use crate::entry::Entry;
use crate::error::CryptoError;
use crate::store::EntryWriter;

/// Encrypts entries before handing them to the wrapped writer.
///
/// A delete marker is expanded into one marker per stored key it may have
/// been written under.
pub struct EncryptedWriter<W> {
    writer: W,
    encryptor: EntryEncryptor,
}

impl<W: EntryWriter> EncryptedWriter<W> {
    pub fn new(writer: W, encryptor: EntryEncryptor) -> Self {
        Self { writer, encryptor }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: EntryWriter> EntryWriter for EncryptedWriter<W> {
    fn put(&mut self, entry: Entry) -> Result<(), CryptoError> {
        if entry.key.deleted {
            let keys = self.encryptor.get_delete_keys(&entry.key)?;
            trace!(markers = keys.len(), "expanded delete marker");
            for key in keys {
                self.writer.put(Entry::new(key, Vec::new()))?;
            }
            return Ok(());
        }
        let encrypted = self.encryptor.encrypt(&entry)?;
        self.writer.put(encrypted)
    }

    fn flush(&mut self) -> Result<(), CryptoError> {
        self.writer.flush()
    }
}
