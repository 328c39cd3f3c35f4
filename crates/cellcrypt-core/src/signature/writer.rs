use tracing::trace;

use super::config::Destination;
use super::signer::EntrySigner;
use crate::entry::Entry;
use crate::error::CryptoError;
use crate::store::EntryWriter;

/// Signs entries before handing them to the wrapped writer.
///
/// Delete markers are written unsigned, and mirrored into the signature
/// table when there is one.
pub struct SignedWriter<W> {
    writer: W,
    signature_writer: Option<W>,
    signer: EntrySigner,
}

impl<W: EntryWriter> SignedWriter<W> {
    pub fn new(writer: W, signer: EntrySigner) -> Result<Self, CryptoError> {
        if signer.config().destination() == Destination::SeparateTable {
            return Err(CryptoError::InvalidArgument(
                "signatures are in a separate table, but no signature writer was given"
                    .to_string(),
            ));
        }
        Ok(Self {
            writer,
            signature_writer: None,
            signer,
        })
    }

    pub fn with_signature_table(
        writer: W,
        signature_writer: W,
        signer: EntrySigner,
    ) -> Result<Self, CryptoError> {
        if signer.config().destination() != Destination::SeparateTable {
            return Err(CryptoError::InvalidArgument(format!(
                "signatures are stored in the {}, not a separate table",
                signer.config().destination()
            )));
        }
        Ok(Self {
            writer,
            signature_writer: Some(signature_writer),
            signer,
        })
    }

    /// Sign without the timestamp, for entries the store stamps on write.
    pub fn put_unstamped(&mut self, entry: Entry) -> Result<(), CryptoError> {
        self.write(entry, false)
    }

    fn write(&mut self, entry: Entry, has_timestamp: bool) -> Result<(), CryptoError> {
        if entry.key.deleted {
            if self.signer.config().destination() == Destination::ColumnVisibility {
                return Err(CryptoError::InvalidArgument(
                    "cannot delete entries when the signature is stored in the column visibility"
                        .to_string(),
                ));
            }
            trace!("writing unsigned delete marker");
            if let Some(signature_writer) = &mut self.signature_writer {
                signature_writer.put(entry.clone())?;
            }
            return self.writer.put(entry);
        }

        let signed = self.signer.sign(&entry, has_timestamp)?;
        match &mut self.signature_writer {
            Some(signature_writer) => {
                self.writer.put(entry)?;
                signature_writer.put(signed)
            }
            None => self.writer.put(signed),
        }
    }
}

impl<W: EntryWriter> EntryWriter for SignedWriter<W> {
    fn put(&mut self, entry: Entry) -> Result<(), CryptoError> {
        self.write(entry, true)
    }

    fn flush(&mut self) -> Result<(), CryptoError> {
        self.writer.flush()?;
        if let Some(signature_writer) = &mut self.signature_writer {
            signature_writer.flush()?;
        }
        Ok(())
    }
}
