//! Key packet serialization and ASCII armor
//!
//! This is the bundled engine's own format. It is not OpenPGP and is not
//! meant to interoperate with other tools; an external engine brings its
//! own packets and armor.
//!
//! Packet layout (all integers big-endian):
//! `version(1) | created(4) | algorithm(1) | key_len(2) | key | label_len(2) | label`
//! and, for private packets only, `secret_len(2) | secret`.

use super::{Algorithm, EngineError};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

const PACKET_VERSION: u8 = 1;
const LINE_WIDTH: usize = 64;
const FINGERPRINT_LEN: usize = 20;

/// Which armored block a text holds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    PublicKey,
    PrivateKey,
}

impl BlockKind {
    fn title(&self) -> &'static str {
        match self {
            BlockKind::PublicKey => "DETERMINISTIC PUBLIC KEY BLOCK",
            BlockKind::PrivateKey => "DETERMINISTIC PRIVATE KEY BLOCK",
        }
    }
}

/// Decoded key packet
pub struct KeyPacket {
    pub algorithm: Algorithm,
    pub created_at: u32,
    pub public: Vec<u8>,
    pub label: String,
    pub secret: Option<Zeroizing<Vec<u8>>>,
}

impl KeyPacket {
    /// Public part of the packet (also the fingerprint input)
    pub fn encode_public(&self) -> Result<Vec<u8>, EngineError> {
        let mut out = Vec::with_capacity(8 + self.public.len() + 2 + self.label.len());
        out.push(PACKET_VERSION);
        out.extend_from_slice(&self.created_at.to_be_bytes());
        out.push(self.algorithm.id());
        put_field(&mut out, &self.public)?;
        put_field(&mut out, self.label.as_bytes())?;
        Ok(out)
    }

    /// Public part followed by the secret key
    pub fn encode_private(&self) -> Result<Zeroizing<Vec<u8>>, EngineError> {
        let secret = self
            .secret
            .as_ref()
            .ok_or_else(|| EngineError::Malformed("packet has no secret key".into()))?;

        let mut out = Zeroizing::new(self.encode_public()?);
        put_field(&mut out, secret)?;
        Ok(out)
    }

    /// Decode a public (`with_secret == false`) or private packet
    pub fn decode(bytes: &[u8], with_secret: bool) -> Result<Self, EngineError> {
        let mut reader = Reader { bytes, pos: 0 };

        let version = reader.take(1)?[0];
        if version != PACKET_VERSION {
            return Err(EngineError::Malformed(format!("unknown packet version {}", version)));
        }

        let created: [u8; 4] = reader
            .take(4)?
            .try_into()
            .map_err(|_| EngineError::Malformed("bad timestamp".into()))?;
        let algorithm = Algorithm::from_id(reader.take(1)?[0])?;
        let public = reader.field()?.to_vec();
        let label = String::from_utf8(reader.field()?.to_vec())
            .map_err(|e| EngineError::Malformed(format!("label is not UTF-8: {}", e)))?;

        let secret = if with_secret {
            Some(Zeroizing::new(reader.field()?.to_vec()))
        } else {
            None
        };

        if reader.pos != bytes.len() {
            return Err(EngineError::Malformed("trailing bytes after packet".into()));
        }

        Ok(Self {
            algorithm,
            created_at: u32::from_be_bytes(created),
            public,
            label,
            secret,
        })
    }

    /// Fingerprint of this packet's public part
    pub fn fingerprint(&self) -> Result<String, EngineError> {
        Ok(fingerprint(&self.encode_public()?))
    }
}

fn put_field(out: &mut Vec<u8>, field: &[u8]) -> Result<(), EngineError> {
    let len = u16::try_from(field.len())
        .map_err(|_| EngineError::Malformed(format!("field of {} bytes is too long", field.len())))?;
    out.extend_from_slice(&len.to_be_bytes());
    out.extend_from_slice(field);
    Ok(())
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], EngineError> {
        let end = self.pos + n;
        if end > self.bytes.len() {
            return Err(EngineError::Malformed("packet truncated".into()));
        }
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn field(&mut self) -> Result<&'a [u8], EngineError> {
        let len = self.take(2)?;
        let len = u16::from_be_bytes([len[0], len[1]]) as usize;
        self.take(len)
    }
}

/// Wrap `body` in an armored text block
pub fn armor(kind: BlockKind, body: &[u8]) -> String {
    let encoded = Zeroizing::new(STANDARD.encode(body));
    let title = kind.title();

    let mut out = format!("-----BEGIN {}-----\nVersion: {}\n\n", title, PACKET_VERSION);
    for line in encoded.as_bytes().chunks(LINE_WIDTH) {
        // base64 output is ASCII, so any chunk boundary is a char boundary
        out.push_str(&String::from_utf8_lossy(line));
        out.push('\n');
    }
    out.push_str(&format!("-----END {}-----\n", title));
    out
}

/// Extract the binary body of an armored block
pub fn dearmor(kind: BlockKind, text: &str) -> Result<Zeroizing<Vec<u8>>, EngineError> {
    let begin = format!("-----BEGIN {}-----", kind.title());
    let end = format!("-----END {}-----", kind.title());

    let mut lines = text.lines().map(str::trim);
    if !lines.by_ref().any(|line| line == begin) {
        return Err(EngineError::Malformed(format!("missing '{}'", begin)));
    }

    // Header lines run until the first blank line
    if !lines.by_ref().any(|line| line.is_empty()) {
        return Err(EngineError::Malformed("missing armor header separator".into()));
    }

    let mut encoded = Zeroizing::new(String::new());
    let mut terminated = false;
    for line in lines {
        if line == end {
            terminated = true;
            break;
        }
        encoded.push_str(line);
    }
    if !terminated {
        return Err(EngineError::Malformed(format!("missing '{}'", end)));
    }

    STANDARD
        .decode(encoded.as_bytes())
        .map(Zeroizing::new)
        .map_err(|e| EngineError::Malformed(format!("bad base64: {}", e)))
}

/// Fingerprint of an encoded public packet
pub fn fingerprint(public_packet: &[u8]) -> String {
    let digest = Sha256::digest(public_packet);
    format_fingerprint(&digest[..FINGERPRINT_LEN])
}

/// Uppercase hex in 2-byte groups, e.g. `"1A2B 3C4D ..."`
pub fn format_fingerprint(bytes: &[u8]) -> String {
    bytes
        .chunks(2)
        .map(hex::encode_upper)
        .collect::<Vec<_>>()
        .join(" ")
}
