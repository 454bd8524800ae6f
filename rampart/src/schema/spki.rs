//! Converts RSA public keys between the PEM-encoded SubjectPublicKeyInfo form
//! used on the wire and the PKCS#1 DER form `ring` verifies against.
//!
//! A SubjectPublicKeyInfo document for RSA is:
//!
//! ```text
//! SEQUENCE {
//!     SEQUENCE { OID 1.2.840.113549.1.1.1, NULL }
//!     BIT STRING { 0 unused bits, <PKCS#1 RSAPublicKey DER> }
//! }
//! ```

use crate::schema::error::{self, Error, Result};
use snafu::{ensure, OptionExt, ResultExt};

const PEM_TAG_SPKI: &str = "PUBLIC KEY";
const PEM_TAG_PKCS1: &str = "RSA PUBLIC KEY";

/// DER encoding of `AlgorithmIdentifier { rsaEncryption, NULL }`.
const RSA_ALGORITHM_ID: &[u8] = &[
    0x30, 0x0d, 0x06, 0x09, 0x2a, 0x86, 0x48, 0x86, 0xf7, 0x0d, 0x01, 0x01, 0x01, 0x05, 0x00,
];

/// Decodes a PEM public key to PKCS#1 DER. Accepts both `PUBLIC KEY` (SPKI)
/// and `RSA PUBLIC KEY` (already PKCS#1) documents.
pub(super) fn decode(s: &str) -> Result<Vec<u8>> {
    let pem = pem::parse(s).context(error::PemDecodeSnafu)?;
    match pem.tag() {
        PEM_TAG_PKCS1 => Ok(pem.contents().to_vec()),
        PEM_TAG_SPKI => unwrap_spki(pem.contents()),
        _ => error::InvalidSpkiSnafu {
            reason: "unrecognized PEM tag",
        }
        .fail(),
    }
}

/// Encodes a PKCS#1 DER public key as a SubjectPublicKeyInfo PEM string.
pub(super) fn encode(pkcs1: &[u8]) -> String {
    let mut bit_string_contents = Vec::with_capacity(pkcs1.len() + 1);
    bit_string_contents.push(0x00); // zero unused bits
    bit_string_contents.extend_from_slice(pkcs1);

    let mut spki_contents = RSA_ALGORITHM_ID.to_vec();
    spki_contents.extend_from_slice(&tlv(0x03, &bit_string_contents));
    let spki = tlv(0x30, &spki_contents);

    pem::encode(&pem::Pem::new(PEM_TAG_SPKI, spki))
}

/// Builds a DER TLV triple for `tag` around `contents`.
fn tlv(tag: u8, contents: &[u8]) -> Vec<u8> {
    let mut out = vec![tag];
    let len = contents.len();
    if len < 0x80 {
        out.push(len as u8);
    } else {
        let len_bytes = len.to_be_bytes();
        let skip = len_bytes.iter().take_while(|b| **b == 0).count();
        out.push(0x80 | (len_bytes.len() - skip) as u8);
        out.extend_from_slice(&len_bytes[skip..]);
    }
    out.extend_from_slice(contents);
    out
}

/// Extracts the PKCS#1 key from a SubjectPublicKeyInfo DER document.
fn unwrap_spki(der: &[u8]) -> Result<Vec<u8>> {
    let (outer, rest) = read_tlv(der, 0x30)?;
    ensure!(
        rest.is_empty(),
        error::InvalidSpkiSnafu {
            reason: "trailing bytes after outer SEQUENCE",
        }
    );
    let (algorithm, rest) = read_tlv(outer, 0x30)?;
    ensure!(
        algorithm == &RSA_ALGORITHM_ID[2..],
        error::InvalidSpkiSnafu {
            reason: "algorithm is not rsaEncryption",
        }
    );
    let (bit_string, rest) = read_tlv(rest, 0x03)?;
    ensure!(
        rest.is_empty(),
        error::InvalidSpkiSnafu {
            reason: "trailing bytes after BIT STRING",
        }
    );
    let (unused_bits, key) = bit_string.split_first().context(error::InvalidSpkiSnafu {
        reason: "empty BIT STRING",
    })?;
    ensure!(
        *unused_bits == 0,
        error::InvalidSpkiSnafu {
            reason: "BIT STRING has unused bits",
        }
    );
    Ok(key.to_vec())
}

/// Reads one TLV triple with the expected tag, returning its contents and the
/// remaining input.
fn read_tlv(input: &[u8], tag: u8) -> Result<(&[u8], &[u8])> {
    let err = |reason| Error::InvalidSpki { reason };
    let (&found, input) = input.split_first().ok_or(err("truncated tag"))?;
    ensure!(found == tag, error::InvalidSpkiSnafu { reason: "unexpected tag" });
    let (&first, input) = input.split_first().ok_or(err("truncated length"))?;
    let (len, input) = if first < 0x80 {
        (first as usize, input)
    } else {
        let count = (first & 0x7f) as usize;
        ensure!(
            count > 0 && count <= std::mem::size_of::<usize>() && input.len() >= count,
            error::InvalidSpkiSnafu {
                reason: "invalid long-form length",
            }
        );
        let mut len = 0usize;
        for &b in &input[..count] {
            len = (len << 8) | b as usize;
        }
        (len, &input[count..])
    };
    ensure!(
        input.len() >= len,
        error::InvalidSpkiSnafu {
            reason: "length exceeds input",
        }
    );
    Ok(input.split_at(len))
}

#[cfg(test)]
mod tests {
    use super::{decode, encode};

    #[test]
    fn wrap_then_unwrap() {
        // a PKCS#1 document is opaque here; any DER-ish bytes will do
        let pkcs1 = vec![0x30, 0x06, 0x02, 0x01, 0x05, 0x02, 0x01, 0x03];
        let pem = encode(&pkcs1);
        assert!(pem.contains("BEGIN PUBLIC KEY"));
        assert_eq!(decode(&pem).unwrap(), pkcs1);
    }

    #[test]
    fn pkcs1_pem_passthrough() {
        let pkcs1 = vec![0x30, 0x03, 0x02, 0x01, 0x2a];
        let pem = pem::encode(&pem::Pem::new("RSA PUBLIC KEY", pkcs1.clone()));
        assert_eq!(decode(&pem).unwrap(), pkcs1);
    }

    #[test]
    fn garbage_rejected() {
        assert!(decode("not pem at all").is_err());
    }
}
