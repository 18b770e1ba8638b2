//! C2: AES-128 block ops and a cryptographic RNG, both consumed as traits.
//!
//! The AES-128 primitive itself is explicitly out of scope (spec §1) — the
//! engine only ever calls `encrypt_block`/`decrypt_block` on a caller-
//! supplied [`BlockCipher`]. ECB and CBC are implemented here purely in
//! terms of that one-block primitive, binding IVs the way
//! `original_source/src/crypto/openssl.c` does: ECB always uses a zero IV
//! internally (so callers never pass one), CBC takes an explicit IV.

use crate::error::Error;

/// A 128-bit block cipher, supplied by the host application (a software
/// implementation, OpenSSL, or a hardware AES peripheral).
pub trait BlockCipher {
	/// Encrypts `block` in place under `key`.
	fn encrypt_block(&self, key: &[u8; 16], block: &mut [u8; 16]);

	/// Decrypts `block` in place under `key`.
	fn decrypt_block(&self, key: &[u8; 16], block: &mut [u8; 16]);
}

/// A cryptographically secure random byte source, supplied by the host
/// application.
pub trait RandomSource {
	/// Fills `buf` with random bytes.
	fn fill(&mut self, buf: &mut [u8]);
}

/// One AES-128-ECB block encryption with an implicit zero IV — the shape
/// every secure-channel key-derivation step in spec §4.4 is built from.
pub fn ecb_encrypt_block(cipher: &impl BlockCipher, key: &[u8; 16], block: &[u8; 16]) -> [u8; 16] {
	let mut out = *block;
	cipher.encrypt_block(key, &mut out);
	out
}

/// AES-128-CBC encryption of `data` (must already be a multiple of 16
/// bytes) under `key`/`iv`, writing the ciphertext into `out` (same length
/// as `data`).
pub fn cbc_encrypt(
	cipher: &impl BlockCipher,
	key: &[u8; 16],
	iv: &[u8; 16],
	data: &[u8],
	out: &mut [u8],
) -> Result<(), Error> {
	if data.len() % 16 != 0 || out.len() != data.len() {
		return Err(Error::InvalidArgument);
	}
	let mut prev = *iv;
	for (chunk_in, chunk_out) in data.chunks_exact(16).zip(out.chunks_exact_mut(16)) {
		let mut block = [0u8; 16];
		for i in 0..16 {
			block[i] = chunk_in[i] ^ prev[i];
		}
		cipher.encrypt_block(key, &mut block);
		chunk_out.copy_from_slice(&block);
		prev = block;
	}
	Ok(())
}

/// AES-128-CBC decryption, the inverse of [`cbc_encrypt`].
pub fn cbc_decrypt(
	cipher: &impl BlockCipher,
	key: &[u8; 16],
	iv: &[u8; 16],
	data: &[u8],
	out: &mut [u8],
) -> Result<(), Error> {
	if data.len() % 16 != 0 || out.len() != data.len() {
		return Err(Error::InvalidArgument);
	}
	let mut prev = *iv;
	for (chunk_in, chunk_out) in data.chunks_exact(16).zip(out.chunks_exact_mut(16)) {
		let mut block = [0u8; 16];
		block.copy_from_slice(chunk_in);
		let cipher_block = block;
		cipher.decrypt_block(key, &mut block);
		for i in 0..16 {
			block[i] ^= prev[i];
		}
		chunk_out.copy_from_slice(&block);
		prev = cipher_block;
	}
	Ok(())
}


#[cfg(test)]
mod tests {
	use super::test_support::SoftwareAes;
	use super::*;

	#[test]
	fn ecb_round_trips_through_decrypt() {
		let cipher = SoftwareAes;
		let key = [0x42u8; 16];
		let block = [1u8, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16];
		let ct = ecb_encrypt_block(&cipher, &key, &block);
		let mut pt = ct;
		cipher.decrypt_block(&key, &mut pt);
		assert_eq!(pt, block);
	}

	#[test]
	fn cbc_round_trips() {
		let cipher = SoftwareAes;
		let key = [0x11u8; 16];
		let iv = [0x22u8; 16];
		let data = [5u8; 32];
		let mut ct = [0u8; 32];
		cbc_encrypt(&cipher, &key, &iv, &data, &mut ct).unwrap();
		let mut pt = [0u8; 32];
		cbc_decrypt(&cipher, &key, &iv, &ct, &mut pt).unwrap();
		assert_eq!(pt, data);
	}

	#[test]
	fn cbc_rejects_non_block_multiple_lengths() {
		let cipher = SoftwareAes;
		let key = [0u8; 16];
		let iv = [0u8; 16];
		let data = [0u8; 10];
		let mut out = [0u8; 10];
		assert!(cbc_encrypt(&cipher, &key, &iv, &data, &mut out).is_err());
	}
}
