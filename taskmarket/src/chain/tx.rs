use anyhow::{anyhow, bail, Context, Result};
use bytes::{BufMut, BytesMut};
use ed25519_dalek::{Signer, SigningKey};
use std::path::Path;

const SYSTEM_PROGRAM_ID: [u8; 32] = [0; 32];
const SYSTEM_TRANSFER: u32 = 2;

/// Legacy transaction message holding a single System Program transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferMessage {
    pub from: [u8; 32],
    pub to: [u8; 32],
    pub lamports: u64,
    pub recent_blockhash: [u8; 32],
}

impl TransferMessage {
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(160);
        // header: one writable signer, no readonly signers, the program id is readonly
        buf.put_u8(1);
        buf.put_u8(0);
        buf.put_u8(1);

        put_compact_u16(&mut buf, 3);
        buf.put_slice(&self.from);
        buf.put_slice(&self.to);
        buf.put_slice(&SYSTEM_PROGRAM_ID);

        buf.put_slice(&self.recent_blockhash);

        put_compact_u16(&mut buf, 1);
        buf.put_u8(2);
        put_compact_u16(&mut buf, 2);
        buf.put_u8(0);
        buf.put_u8(1);
        put_compact_u16(&mut buf, 12);
        buf.put_u32_le(SYSTEM_TRANSFER);
        buf.put_u64_le(self.lamports);
        buf.to_vec()
    }

    pub fn sign(&self, key: &SigningKey) -> Result<SignedTransaction> {
        if key.verifying_key().to_bytes() != self.from {
            bail!("signing key does not own the source account");
        }
        if self.from == self.to {
            bail!("source and destination are the same account");
        }
        let message = self.serialize();
        let signature = key.sign(&message).to_bytes();

        let mut wire = BytesMut::with_capacity(message.len() + 65);
        put_compact_u16(&mut wire, 1);
        wire.put_slice(&signature);
        wire.put_slice(&message);
        Ok(SignedTransaction {
            signature,
            wire: wire.to_vec(),
        })
    }
}

#[derive(Debug, Clone)]
pub struct SignedTransaction {
    pub signature: [u8; 64],
    pub wire: Vec<u8>,
}

impl SignedTransaction {
    /// Transaction id as shown by explorers
    pub fn signature_string(&self) -> String {
        bs58::encode(self.signature).into_string()
    }

    pub fn to_base64(&self) -> String {
        base64::encode(&self.wire)
    }
}

fn put_compact_u16(buf: &mut BytesMut, value: u16) {
    let mut rem = value;
    loop {
        let mut byte = (rem & 0x7f) as u8;
        rem >>= 7;
        if rem == 0 {
            buf.put_u8(byte);
            return;
        }
        byte |= 0x80;
        buf.put_u8(byte);
    }
}

/// Load the treasury key from a keypair json file (array of 64 bytes) or a base58 secret
pub fn load_keypair(source: &str) -> Result<SigningKey> {
    let source = source.trim();
    if source.is_empty() {
        bail!("treasury key is not configured");
    }
    let path = Path::new(source);
    let bytes: Vec<u8> = if path.is_file() {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("read keypair file: {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("parse keypair file: {}", path.display()))?
    } else {
        bs58::decode(source)
            .into_vec()
            .map_err(|e| anyhow!("treasury key is neither a file nor base58: {}", e))?
    };
    signing_key_from_bytes(&bytes)
}

fn signing_key_from_bytes(bytes: &[u8]) -> Result<SigningKey> {
    match bytes.len() {
        32 => Ok(SigningKey::from_bytes(&<[u8; 32]>::try_from(bytes)?)),
        64 => {
            let key = SigningKey::from_bytes(&<[u8; 32]>::try_from(&bytes[..32])?);
            if key.verifying_key().to_bytes()[..] != bytes[32..] {
                bail!("keypair public half does not match its secret");
            }
            Ok(key)
        }
        n => bail!("keypair must be 32 or 64 bytes, got {}", n),
    }
}
