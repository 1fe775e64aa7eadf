//! PKCS#12 unpacking on top of the `p12` ASN.1 model.
//!
//! `p12` only verifies SHA-1 MACs and decrypts the legacy PKCS#12 PBE
//! ciphers. Containers exported by OpenSSL 3 carry an HMAC-SHA-256 MAC and
//! PBES2 (PBKDF2 + AES-CBC) bags; both are handled here.
use super::VaultError;
use cbc::cipher::{BlockDecryptMut, KeyIvInit, block_padding::Pkcs7};
use hmac::digest::{KeyInit, OutputSizeUser};
use hmac::{Hmac, Mac};
use p12::{AlgorithmIdentifier, CertBag, ContentInfo, PFX, SafeBag, SafeBagKind};
use sha1::Sha1;
use sha2::{Digest, Sha256};
use yasna::models::ObjectIdentifier;
use zeroize::Zeroizing;

const OID_SHA256: &[u64] = &[2, 16, 840, 1, 101, 3, 4, 2, 1];
const OID_PBES2: &[u64] = &[1, 2, 840, 113_549, 1, 5, 13];
const OID_PBKDF2: &[u64] = &[1, 2, 840, 113_549, 1, 5, 12];
const OID_HMAC_SHA1: &[u64] = &[1, 2, 840, 113_549, 2, 7];
const OID_HMAC_SHA256: &[u64] = &[1, 2, 840, 113_549, 2, 9];
const OID_AES128_CBC: &[u64] = &[2, 16, 840, 1, 101, 3, 4, 1, 2];
const OID_AES192_CBC: &[u64] = &[2, 16, 840, 1, 101, 3, 4, 1, 22];
const OID_AES256_CBC: &[u64] = &[2, 16, 840, 1, 101, 3, 4, 1, 42];
const OID_KEY_BAG: &[u64] = &[1, 2, 840, 113_549, 1, 12, 10, 1, 1];

/// RFC 7292 appendix B diversifier for MAC keys.
const MAC_KEY_ID: u8 = 3;
const SHA256_BLOCK: usize = 64;

/// Certificates and private keys found in a container, in bag order.
pub(super) struct Contents {
    pub certificates: Vec<Vec<u8>>,
    pub keys: Vec<Zeroizing<Vec<u8>>>,
}

struct Passwords<'a> {
    pin: &'a str,
    bmp: Zeroizing<Vec<u8>>,
}

impl<'a> Passwords<'a> {
    fn new(pin: &'a str) -> Self {
        let mut bmp: Vec<u8> = pin.encode_utf16().flat_map(u16::to_be_bytes).collect();
        bmp.extend_from_slice(&[0, 0]);
        Self {
            pin,
            bmp: Zeroizing::new(bmp),
        }
    }
}

pub(super) fn open(blob: &[u8], pin: &str) -> Result<Contents, VaultError> {
    let pfx = PFX::parse(blob).map_err(|e| invalid(format!("{e:?}")))?;
    let passwords = Passwords::new(pin);
    verify_mac(&pfx, &passwords)?;

    let ContentInfo::Data(auth_safe) = &pfx.auth_safe else {
        return Err(invalid("authenticated safe is not plain data"));
    };
    let safes = yasna::parse_ber(auth_safe, |r| r.collect_sequence_of(ContentInfo::parse))
        .map_err(|e| invalid(format!("{e:?}")))?;

    let mut contents = Contents {
        certificates: Vec::new(),
        keys: Vec::new(),
    };
    for safe in &safes {
        let data = safe_contents(safe, &passwords)?;
        let bags = yasna::parse_ber(&data, |r| r.collect_sequence_of(SafeBag::parse))
            .map_err(|e| invalid(format!("{e:?}")))?;
        for bag in bags {
            match bag.bag {
                SafeBagKind::CertBag(CertBag::X509(der)) => contents.certificates.push(der),
                SafeBagKind::Pkcs8ShroudedKeyBag(info) => contents.keys.push(decrypt(
                    &info.encryption_algorithm,
                    &info.encrypted_data,
                    &passwords,
                )?),
                SafeBagKind::OtherBagKind(other) if other.bag_id == oid(OID_KEY_BAG) => {
                    contents.keys.push(Zeroizing::new(other.bag_value))
                }
                _ => {}
            }
        }
    }
    Ok(contents)
}

fn verify_mac(pfx: &PFX, passwords: &Passwords<'_>) -> Result<(), VaultError> {
    let Some(mac_data) = &pfx.mac_data else {
        return Ok(());
    };
    match &mac_data.mac.digest_algorithm {
        AlgorithmIdentifier::Sha1 => {
            if pfx.verify_mac(passwords.pin) {
                Ok(())
            } else {
                Err(VaultError::InvalidPassphrase)
            }
        }
        AlgorithmIdentifier::OtherAlg(other) if other.algorithm_type == oid(OID_SHA256) => {
            let ContentInfo::Data(data) = &pfx.auth_safe else {
                return Err(invalid("authenticated safe is not plain data"));
            };
            let key = pkcs12_kdf_sha256(
                &passwords.bmp,
                &mac_data.salt,
                mac_data.iterations,
                MAC_KEY_ID,
                <Sha256 as OutputSizeUser>::output_size(),
            );
            let mut mac = <Hmac<Sha256> as Mac>::new_from_slice(&key)
                .map_err(|e| invalid(e.to_string()))?;
            mac.update(data);
            mac.verify_slice(&mac_data.mac.digest)
                .map_err(|_| VaultError::InvalidPassphrase)
        }
        AlgorithmIdentifier::OtherAlg(other) => Err(invalid(format!(
            "unsupported MAC algorithm {}",
            other.algorithm_type
        ))),
        _ => Err(invalid("unsupported MAC algorithm")),
    }
}

fn safe_contents(
    content: &ContentInfo,
    passwords: &Passwords<'_>,
) -> Result<Zeroizing<Vec<u8>>, VaultError> {
    match content {
        ContentInfo::Data(data) => Ok(Zeroizing::new(data.clone())),
        ContentInfo::EncryptedData(encrypted) => {
            let info = &encrypted.encrypted_content_info;
            decrypt(
                &info.content_encryption_algorithm,
                &info.encrypted_content,
                passwords,
            )
        }
        ContentInfo::OtherContext(other) => Err(invalid(format!(
            "unsupported safe contents {}",
            other.content_type
        ))),
    }
}

fn decrypt(
    algorithm: &AlgorithmIdentifier,
    ciphertext: &[u8],
    passwords: &Passwords<'_>,
) -> Result<Zeroizing<Vec<u8>>, VaultError> {
    match algorithm {
        AlgorithmIdentifier::OtherAlg(other) if other.algorithm_type == oid(OID_PBES2) => {
            let params = other
                .params
                .as_deref()
                .ok_or_else(|| invalid("PBES2 parameters missing"))?;
            Pbes2::parse(params)?.decrypt(ciphertext, passwords.pin.as_bytes())
        }
        AlgorithmIdentifier::OtherAlg(other) => Err(invalid(format!(
            "unsupported bag encryption {}",
            other.algorithm_type
        ))),
        legacy => legacy
            .decrypt_pbe(ciphertext, &passwords.bmp)
            .map(Zeroizing::new)
            .ok_or_else(|| invalid("bag decryption failed")),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Prf {
    HmacSha1,
    HmacSha256,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AesCbc {
    Aes128,
    Aes192,
    Aes256,
}

impl AesCbc {
    fn key_len(self) -> usize {
        match self {
            AesCbc::Aes128 => 16,
            AesCbc::Aes192 => 24,
            AesCbc::Aes256 => 32,
        }
    }
}

#[derive(Debug)]
struct Pbes2 {
    salt: Vec<u8>,
    iterations: u32,
    key_len: Option<u32>,
    prf: Prf,
    cipher: AesCbc,
    iv: Vec<u8>,
}

impl Pbes2 {
    /// Parse `PBES2-params` (RFC 8018 appendix A.4).
    fn parse(params: &[u8]) -> Result<Self, VaultError> {
        let (kdf, salt, iterations, key_len, prf, cipher, iv) = yasna::parse_ber(params, |r| {
            r.read_sequence(|r| {
                let (kdf, salt, iterations, key_len, prf) = r.next().read_sequence(|r| {
                    let kdf = r.next().read_oid()?;
                    let (salt, iterations, key_len, prf) = r.next().read_sequence(|r| {
                        let salt = r.next().read_bytes()?;
                        let iterations = r.next().read_u32()?;
                        let key_len = r.read_optional(|r| r.read_u32())?;
                        let prf = r.read_optional(|r| {
                            r.read_sequence(|r| {
                                let prf = r.next().read_oid()?;
                                r.read_optional(|r| r.read_null())?;
                                Ok(prf)
                            })
                        })?;
                        Ok((salt, iterations, key_len, prf))
                    })?;
                    Ok((kdf, salt, iterations, key_len, prf))
                })?;
                let (cipher, iv) = r.next().read_sequence(|r| {
                    let cipher = r.next().read_oid()?;
                    let iv = r.next().read_bytes()?;
                    Ok((cipher, iv))
                })?;
                Ok((kdf, salt, iterations, key_len, prf, cipher, iv))
            })
        })
        .map_err(|e| invalid(format!("PBES2 parameters: {e:?}")))?;

        if kdf != oid(OID_PBKDF2) {
            return Err(invalid(format!("unsupported key derivation {kdf}")));
        }
        let prf = match prf {
            None => Prf::HmacSha1,
            Some(prf) if prf == oid(OID_HMAC_SHA1) => Prf::HmacSha1,
            Some(prf) if prf == oid(OID_HMAC_SHA256) => Prf::HmacSha256,
            Some(prf) => return Err(invalid(format!("unsupported PBKDF2 PRF {prf}"))),
        };
        let cipher = if cipher == oid(OID_AES128_CBC) {
            AesCbc::Aes128
        } else if cipher == oid(OID_AES192_CBC) {
            AesCbc::Aes192
        } else if cipher == oid(OID_AES256_CBC) {
            AesCbc::Aes256
        } else {
            return Err(invalid(format!("unsupported bag cipher {cipher}")));
        };
        Ok(Self {
            salt,
            iterations,
            key_len,
            prf,
            cipher,
            iv,
        })
    }

    fn decrypt(&self, ciphertext: &[u8], password: &[u8]) -> Result<Zeroizing<Vec<u8>>, VaultError> {
        let mut key = Zeroizing::new(vec![0u8; self.cipher.key_len()]);
        if self.key_len.is_some_and(|len| len as usize != key.len()) {
            return Err(invalid("PBES2 key length does not match the cipher"));
        }
        match self.prf {
            Prf::HmacSha1 => pbkdf2::<Hmac<Sha1>>(password, &self.salt, self.iterations, &mut key)?,
            Prf::HmacSha256 => {
                pbkdf2::<Hmac<Sha256>>(password, &self.salt, self.iterations, &mut key)?
            }
        }

        let iv_error = |e: cbc::cipher::InvalidLength| invalid(format!("PBES2 IV: {e}"));
        let plain = match self.cipher {
            AesCbc::Aes128 => cbc::Decryptor::<aes::Aes128>::new_from_slices(&key, &self.iv)
                .map_err(iv_error)?
                .decrypt_padded_vec_mut::<Pkcs7>(ciphertext),
            AesCbc::Aes192 => cbc::Decryptor::<aes::Aes192>::new_from_slices(&key, &self.iv)
                .map_err(iv_error)?
                .decrypt_padded_vec_mut::<Pkcs7>(ciphertext),
            AesCbc::Aes256 => cbc::Decryptor::<aes::Aes256>::new_from_slices(&key, &self.iv)
                .map_err(iv_error)?
                .decrypt_padded_vec_mut::<Pkcs7>(ciphertext),
        };
        plain
            .map(Zeroizing::new)
            .map_err(|_| invalid("bag decryption failed"))
    }
}

/// PBKDF2 (RFC 8018 section 5.2) over an HMAC.
fn pbkdf2<M>(password: &[u8], salt: &[u8], rounds: u32, out: &mut [u8]) -> Result<(), VaultError>
where
    M: Mac + KeyInit + Clone,
{
    let prf = <M as Mac>::new_from_slice(password).map_err(|e| invalid(e.to_string()))?;
    for (index, block) in out.chunks_mut(<M as OutputSizeUser>::output_size()).enumerate() {
        let counter = u32::try_from(index + 1).map_err(|e| invalid(e.to_string()))?;
        let mut u = prf
            .clone()
            .chain_update(salt)
            .chain_update(counter.to_be_bytes())
            .finalize()
            .into_bytes();
        let mut t = u.clone();
        for _ in 1..rounds {
            u = prf.clone().chain_update(&u).finalize().into_bytes();
            t.iter_mut().zip(u.iter()).for_each(|(acc, byte)| *acc ^= byte);
        }
        block.copy_from_slice(&t[..block.len()]);
    }
    Ok(())
}

/// PKCS#12 key derivation (RFC 7292 appendix B.2) with SHA-256.
fn pkcs12_kdf_sha256(
    password: &[u8],
    salt: &[u8],
    iterations: u32,
    id: u8,
    size: usize,
) -> Zeroizing<Vec<u8>> {
    let fill = |bytes: &[u8]| -> Vec<u8> {
        let len = SHA256_BLOCK * bytes.len().div_ceil(SHA256_BLOCK);
        bytes.iter().cycle().take(len).copied().collect()
    };
    let diversifier = [id; SHA256_BLOCK];
    let mut input = fill(salt);
    input.extend(fill(password));
    let mut input = Zeroizing::new(input);

    let mut out = Zeroizing::new(Vec::with_capacity(size));
    loop {
        let mut a = Sha256::new()
            .chain_update(diversifier)
            .chain_update(input.as_slice())
            .finalize();
        for _ in 1..iterations.max(1) {
            a = Sha256::digest(a);
        }
        out.extend_from_slice(&a);
        if out.len() >= size {
            out.truncate(size);
            return out;
        }

        let b: Vec<u8> = a.iter().cycle().take(SHA256_BLOCK).copied().collect();
        for chunk in input.chunks_mut(SHA256_BLOCK) {
            let mut carry = 1u16;
            for (x, y) in chunk.iter_mut().rev().zip(b.iter().rev()) {
                let sum = u16::from(*x) + u16::from(*y) + carry;
                *x = sum as u8;
                carry = sum >> 8;
            }
        }
    }
}

fn oid(components: &[u64]) -> ObjectIdentifier {
    ObjectIdentifier::from_slice(components)
}

fn invalid(message: impl Into<String>) -> VaultError {
    VaultError::InvalidContainer(message.into())
}
