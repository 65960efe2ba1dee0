//! Output identity types.

use core::fmt;

/// The tree-relevant parts of a transaction output: the one-time output key
/// `O` and the amount commitment `C`, both canonical curve A point encodings.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OutputPair {
    /// One-time output public key.
    pub output_pubkey: [u8; 32],
    /// Amount commitment.
    pub commitment: [u8; 32],
}

impl OutputPair {
    /// Content hash identifying this pair, used as the lookup key for
    /// registered outputs.
    pub fn output_ref(&self) -> OutputRef {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&self.output_pubkey);
        hasher.update(&self.commitment);
        OutputRef(*hasher.finalize().as_bytes())
    }
}

/// An output pair plus the caller-assigned global output id.
///
/// The id is bookkeeping for the caller; tree positions are leaf tuple
/// indexes, assigned by insertion order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OutputContext {
    /// Caller-side output id.
    pub output_id: u64,
    /// The output itself.
    pub output_pair: OutputPair,
}

/// blake3 hash of an output pair's key and commitment encodings.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct OutputRef([u8; 32]);

impl OutputRef {
    /// The raw hash bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Debug for OutputRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OutputRef({})", hex::encode(self.0))
    }
}
