//! Secret sharing of a field key over a visibility expression.
//!
//! Each TERM writes `[vint keyVersion][vint len][share encrypted under the attribute key]`.
//! An AND splits the share into XOR masks, one per child; an OR hands the same
//! share to every child. Reading mirrors writing and always consumes every
//! byte the writer produced, so later fields of the stream stay aligned.

use tracing::debug;
use zeroize::Zeroizing;

use crate::cipher::{fill_random, CipherKind};
use crate::error::CryptoError;
use crate::keys::EncryptionKeyContainer;
use crate::varint::{write_len_prefixed, write_vint, ByteReader};
use crate::visibility::{ColumnVisibility, VisibilityNode};

pub(crate) struct ShareCodec<'a> {
    pub keys: &'a dyn EncryptionKeyContainer,
    pub cipher: CipherKind,
    pub key_id: &'a str,
    pub key_length: usize,
}

fn attribute_name(
    visibility: &ColumnVisibility,
    node: &VisibilityNode,
) -> Result<String, CryptoError> {
    let attribute = visibility.attribute(node)?;
    Ok(String::from_utf8_lossy(&attribute).into_owned())
}

fn xor_into(target: &mut [u8], mask: &[u8]) -> Result<(), CryptoError> {
    if target.len() != mask.len() {
        return Err(CryptoError::Malformed(format!(
            "share length mismatch: {} vs {}",
            target.len(),
            mask.len()
        )));
    }
    target.iter_mut().zip(mask).for_each(|(t, m)| *t ^= m);
    Ok(())
}

impl ShareCodec<'_> {
    pub fn write_share(
        &self,
        visibility: &ColumnVisibility,
        node: &VisibilityNode,
        share: &[u8],
        out: &mut Vec<u8>,
    ) -> Result<(), CryptoError> {
        match node {
            VisibilityNode::Term { .. } => {
                let attribute = attribute_name(visibility, node)?;
                let key = self
                    .keys
                    .get_attribute_key(&attribute, self.key_id, self.key_length)?;
                write_vint(out, key.version);
                write_len_prefixed(out, &self.cipher.encrypt(&key.key, share)?)?;
            }
            VisibilityNode::And(children) => {
                let (last_child, others) = children
                    .split_last()
                    .ok_or_else(|| CryptoError::Malformed("AND node without children".to_string()))?;
                let mut remainder = Zeroizing::new(share.to_vec());
                for child in others {
                    let mut mask = Zeroizing::new(vec![0u8; share.len()]);
                    fill_random(&mut mask)?;
                    self.write_share(visibility, child, &mask, out)?;
                    xor_into(&mut remainder, &mask)?;
                }
                self.write_share(visibility, last_child, &remainder, out)?;
            }
            VisibilityNode::Or(children) => {
                for child in children {
                    self.write_share(visibility, child, share, out)?;
                }
            }
        }
        Ok(())
    }

    /// `None` when the held attribute keys do not satisfy `node`, or when `skip` is set.
    pub fn read_share(
        &self,
        visibility: &ColumnVisibility,
        node: &VisibilityNode,
        input: &mut ByteReader<'_>,
        skip: bool,
    ) -> Result<Option<Zeroizing<Vec<u8>>>, CryptoError> {
        match node {
            VisibilityNode::Term { .. } => {
                let version = input.read_vint()?;
                let encrypted = input.read_len_prefixed()?;
                if skip {
                    return Ok(None);
                }

                let attribute = attribute_name(visibility, node)?;
                match self.keys.get_attribute_key_version(
                    &attribute,
                    self.key_id,
                    version,
                    self.key_length,
                ) {
                    Ok(key) => Ok(Some(Zeroizing::new(self.cipher.decrypt(&key, encrypted)?))),
                    Err(e) if e.is_permission_denied() => {
                        debug!(attribute = %attribute, version, "attribute key unavailable for share");
                        Ok(None)
                    }
                    Err(e) => Err(e),
                }
            }
            VisibilityNode::And(children) => {
                let mut skip = skip;
                let mut share: Option<Zeroizing<Vec<u8>>> = None;
                for child in children {
                    let mask = self.read_share(visibility, child, input, skip)?;
                    if skip {
                        continue;
                    }
                    let Some(mask) = mask else {
                        share = None;
                        skip = true;
                        continue;
                    };
                    if let Some(acc) = share.as_mut() {
                        xor_into(acc, &mask)?;
                    } else {
                        share = Some(mask);
                    }
                }
                Ok(share)
            }
            VisibilityNode::Or(children) => {
                let mut skip = skip;
                let mut share = None;
                for child in children {
                    let candidate = self.read_share(visibility, child, input, skip)?;
                    if !skip && candidate.is_some() {
                        share = candidate;
                        skip = true;
                    }
                }
                Ok(share)
            }
        }
    }
}
