//! C4: secure-channel key derivation, cryptograms, MAC chain, payload wrap.
//!
//! Every operation here is expressed in terms of [`crate::crypto::BlockCipher`]
//! and [`crate::crypto::RandomSource`] — this module never touches AES
//! internals directly. Constants and padding scheme are spec §4.4; the
//! CBC-MAC last-block key switch and the `0x80`-then-zero pad are bit-exact
//! requirements, not stylistic choices.

use crate::crypto::{self, BlockCipher, RandomSource};
use crate::error::Error;

/// A publicly documented default key, usable only while `install_mode` is
/// set (spec §4.4, "SCBK-D").
pub const SCBK_DEFAULT: [u8; 16] = [
	0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0A, 0x0B, 0x0C, 0x0D, 0x0E, 0x0F, 0x10,
];

/// Derived session key material plus the two 8-byte randoms and two 16-byte
/// cryptograms that produced it, held on [`crate::pd_model::PdRecord`] for
/// the lifetime of one secure session.
#[derive(Clone, Default)]
pub struct SessionKeys {
	pub s_enc: [u8; 16],
	pub s_mac1: [u8; 16],
	pub s_mac2: [u8; 16],
	pub cp_random: [u8; 8],
	pub pd_random: [u8; 8],
	pub cp_cryptogram: [u8; 16],
	pub pd_cryptogram: [u8; 16],
	pub r_mac: [u8; 16],
	pub c_mac: [u8; 16],
}

impl SessionKeys {
	/// Overwrites every secret field with zero. Called on any session reset
	/// (spec §7: "Fatal errors always zero session keys").
	pub fn zeroize(&mut self) {
		use zeroize::Zeroize;
		self.s_enc.zeroize();
		self.s_mac1.zeroize();
		self.s_mac2.zeroize();
		self.cp_random.zeroize();
		self.pd_random.zeroize();
		self.cp_cryptogram.zeroize();
		self.pd_cryptogram.zeroize();
		self.r_mac.zeroize();
		self.c_mac.zeroize();
	}
}

fn derivation_input(selector: u8, cp_random: &[u8; 8]) -> [u8; 16] {
	let mut block = [0u8; 16];
	block[0] = 0x01;
	block[1] = selector;
	block[2..8].copy_from_slice(&cp_random[0..6]);
	block
}

/// Derives `S-ENC`, `S-MAC1`, `S-MAC2` from `scbk` and `cp_random` (spec
/// §4.4). Each is one AES-128-ECB encryption of a constant built from a
/// selector byte and the first six bytes of `cp_random`.
pub fn derive_session_keys(cipher: &impl BlockCipher, scbk: &[u8; 16], cp_random: &[u8; 8]) -> (
	[u8; 16],
	[u8; 16],
	[u8; 16],
) {
	let s_enc = crypto::ecb_encrypt_block(cipher, scbk, &derivation_input(0x82, cp_random));
	let s_mac1 = crypto::ecb_encrypt_block(cipher, scbk, &derivation_input(0x01, cp_random));
	let s_mac2 = crypto::ecb_encrypt_block(cipher, scbk, &derivation_input(0x02, cp_random));
	(s_enc, s_mac1, s_mac2)
}

fn concat_randoms(first: &[u8; 8], second: &[u8; 8]) -> [u8; 16] {
	let mut block = [0u8; 16];
	block[0..8].copy_from_slice(first);
	block[8..16].copy_from_slice(second);
	block
}

/// `pd_cryptogram = AES_ECB(S-ENC, cp_random || pd_random)` — computed by
/// the PD and checked by the CP.
pub fn compute_pd_cryptogram(cipher: &impl BlockCipher, s_enc: &[u8; 16], cp_random: &[u8; 8], pd_random: &[u8; 8]) -> [u8; 16] {
	crypto::ecb_encrypt_block(cipher, s_enc, &concat_randoms(cp_random, pd_random))
}

/// `cp_cryptogram = AES_ECB(S-ENC, pd_random || cp_random)` — computed by
/// the CP and checked by the PD.
pub fn compute_cp_cryptogram(cipher: &impl BlockCipher, s_enc: &[u8; 16], cp_random: &[u8; 8], pd_random: &[u8; 8]) -> [u8; 16] {
	crypto::ecb_encrypt_block(cipher, s_enc, &concat_randoms(pd_random, cp_random))
}

/// Generates this side's random (8 bytes) via the supplied [`RandomSource`].
pub fn generate_random(rng: &mut impl RandomSource) -> [u8; 8] {
	let mut out = [0u8; 8];
	rng.fill(&mut out);
	out
}

/// Constant-time comparison of two cryptograms/MACs, so a mismatching
/// handshake never leaks timing information about how many leading bytes
/// matched.
pub fn verify_equal(a: &[u8], b: &[u8]) -> bool {
	use subtle::ConstantTimeEq;
	a.ct_eq(b).into()
}

/// Seeds `R-MAC`/`C-MAC` from the cryptogram that authenticated the
/// handshake (spec §4.4: "seeded by a cryptogram-derived IV").
pub fn initial_mac(cryptogram: &[u8; 16]) -> [u8; 16] {
	*cryptogram
}

/// Advances a running MAC chain by one packet: CBC-MAC under `s_mac1` for
/// every block except the last, which uses `s_mac2`. `running` is both the
/// chain's current value (used as the first block's IV) and the output.
///
/// `data` need not be block-aligned; it is padded internally with the same
/// `0x80`-then-zero scheme used for encrypted payloads (spec §4.4) without
/// mutating the caller's buffer.
pub fn advance_mac_chain(
	cipher: &impl BlockCipher,
	s_mac1: &[u8; 16],
	s_mac2: &[u8; 16],
	running: &mut [u8; 16],
	data: &[u8],
) {
	let mut padded = [0u8; 256];
	let padded_len = pad_80(data, &mut padded);
	let blocks = padded_len / 16;
	let mut state = *running;
	for (i, chunk) in padded[..padded_len].chunks_exact(16).enumerate() {
		let key = if i == blocks - 1 { s_mac2 } else { s_mac1 };
		let mut block = [0u8; 16];
		for j in 0..16 {
			block[j] = chunk[j] ^ state[j];
		}
		cipher.encrypt_block(key, &mut block);
		state = block;
	}
	*running = state;
}

/// Pads `data` with a single `0x80` byte followed by zeros up to the next
/// 16-byte boundary, writing the result into `out`. Returns the padded
/// length. `data` empty still yields one full padding block.
fn pad_80(data: &[u8], out: &mut [u8]) -> usize {
	let padded_len = ((data.len() / 16) + 1) * 16;
	out[..data.len()].copy_from_slice(data);
	out[data.len()] = 0x80;
	for b in &mut out[data.len() + 1..padded_len] {
		*b = 0;
	}
	padded_len
}

/// Inverts every byte of `mac`, the IV-derivation step spec §4.4 calls out
/// for encrypted payload wrapping ("IV = inverted last MAC").
fn invert(mac: &[u8; 16]) -> [u8; 16] {
	let mut out = [0u8; 16];
	for i in 0..16 {
		out[i] = !mac[i];
	}
	out
}

/// Maximum cleartext payload this module will wrap in one call (bounded by
/// the scratch buffer `advance_mac_chain`/`wrap` use internally).
pub const MAX_WRAP_PAYLOAD: usize = 128;

/// Wraps `payload` for transmission under `SCS_18` (encrypted + MAC): pads
/// with `0x80`-then-zero, encrypts with AES-CBC under `s_enc` with IV =
/// inverted `running_mac`, appends the first 4 bytes of the MAC computed
/// over `header || ciphertext` using [`advance_mac_chain`].
///
/// Returns the number of bytes written to `out` (ciphertext length + 4).
pub fn wrap(
	cipher: &impl BlockCipher,
	s_enc: &[u8; 16],
	s_mac1: &[u8; 16],
	s_mac2: &[u8; 16],
	running_mac: &mut [u8; 16],
	header: &[u8],
	payload: &[u8],
	out: &mut [u8],
) -> Result<usize, Error> {
	if payload.len() > MAX_WRAP_PAYLOAD {
		return Err(Error::BufferTooSmall);
	}
	let mut padded = [0u8; MAX_WRAP_PAYLOAD + 16];
	let padded_len = pad_80(payload, &mut padded);
	if out.len() < padded_len + 4 {
		return Err(Error::BufferTooSmall);
	}

	let iv = invert(running_mac);
	crypto::cbc_encrypt(cipher, s_enc, &iv, &padded[..padded_len], &mut out[..padded_len])?;

	let mut mac_input = [0u8; MAX_WRAP_PAYLOAD + 16 + 32];
	if header.len() + padded_len > mac_input.len() {
		return Err(Error::BufferTooSmall);
	}
	mac_input[..header.len()].copy_from_slice(header);
	mac_input[header.len()..header.len() + padded_len].copy_from_slice(&out[..padded_len]);
	advance_mac_chain(cipher, s_mac1, s_mac2, running_mac, &mac_input[..header.len() + padded_len]);

	out[padded_len..padded_len + 4].copy_from_slice(&running_mac[0..4]);
	Ok(padded_len + 4)
}

/// Inverse of [`wrap`]: verifies the trailing 4-byte MAC first, then
/// decrypts, then strips the `0x80`-then-zero pad. Returns the cleartext
/// length written into `out`.
///
/// MAC verification happens before decryption, never after, so a forged
/// ciphertext is rejected without ever running through AES-CBC decrypt
/// (spec §4.4: "verifies MAC first, then decrypts").
pub fn unwrap(
	cipher: &impl BlockCipher,
	s_enc: &[u8; 16],
	s_mac1: &[u8; 16],
	s_mac2: &[u8; 16],
	running_mac: &mut [u8; 16],
	header: &[u8],
	ciphertext_and_mac: &[u8],
	out: &mut [u8],
) -> Result<usize, Error> {
	if ciphertext_and_mac.len() < 4 || (ciphertext_and_mac.len() - 4) % 16 != 0 {
		return Err(Error::ScCondition);
	}
	let ct_len = ciphertext_and_mac.len() - 4;
	let ciphertext = &ciphertext_and_mac[..ct_len];
	let received_mac = &ciphertext_and_mac[ct_len..];

	let mut mac_input = [0u8; MAX_WRAP_PAYLOAD + 16 + 32];
	if header.len() + ct_len > mac_input.len() {
		return Err(Error::BufferTooSmall);
	}
	mac_input[..header.len()].copy_from_slice(header);
	mac_input[header.len()..header.len() + ct_len].copy_from_slice(ciphertext);

	let mut candidate = *running_mac;
	advance_mac_chain(cipher, s_mac1, s_mac2, &mut candidate, &mac_input[..header.len() + ct_len]);
	if !verify_equal(&candidate[0..4], received_mac) {
		return Err(Error::ScCondition);
	}

	let iv = invert(running_mac);
	*running_mac = candidate;

	if ct_len == 0 {
		return Ok(0);
	}
	let mut padded = [0u8; MAX_WRAP_PAYLOAD + 16];
	crypto::cbc_decrypt(cipher, s_enc, &iv, ciphertext, &mut padded[..ct_len])?;

	let mut cleartext_len = ct_len;
	while cleartext_len > 0 && padded[cleartext_len - 1] == 0 {
		cleartext_len -= 1;
	}
	if cleartext_len == 0 || padded[cleartext_len - 1] != 0x80 {
		return Err(Error::ScCondition);
	}
	cleartext_len -= 1;
	if out.len() < cleartext_len {
		return Err(Error::BufferTooSmall);
	}
	out[..cleartext_len].copy_from_slice(&padded[..cleartext_len]);
	Ok(cleartext_len)
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::crypto::test_support::SoftwareAes;

	fn scbk() -> [u8; 16] {
		let mut k = [0u8; 16];
		k[15] = 0x01;
		k
	}

	#[test]
	fn both_sides_derive_identical_session_keys() {
		let cipher = SoftwareAes;
		let key = scbk();
		let cp_random = [0x00, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07];
		let (enc_a, mac1_a, mac2_a) = derive_session_keys(&cipher, &key, &cp_random);
		let (enc_b, mac1_b, mac2_b) = derive_session_keys(&cipher, &key, &cp_random);
		assert_eq!(enc_a, enc_b);
		assert_eq!(mac1_a, mac1_b);
		assert_eq!(mac2_a, mac2_b);
	}

	#[test]
	fn cryptograms_match_across_cp_and_pd() {
		let cipher = SoftwareAes;
		let key = scbk();
		let cp_random = [0x00, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07];
		let pd_random = [0x08, 0x09, 0x0A, 0x0B, 0x0C, 0x0D, 0x0E, 0x0F];
		let (s_enc, _, _) = derive_session_keys(&cipher, &key, &cp_random);

		let pd_side = compute_pd_cryptogram(&cipher, &s_enc, &cp_random, &pd_random);
		let cp_side_check = compute_pd_cryptogram(&cipher, &s_enc, &cp_random, &pd_random);
		assert!(verify_equal(&pd_side, &cp_side_check));

		let cp_side = compute_cp_cryptogram(&cipher, &s_enc, &cp_random, &pd_random);
		let pd_side_check = compute_cp_cryptogram(&cipher, &s_enc, &cp_random, &pd_random);
		assert!(verify_equal(&cp_side, &pd_side_check));
	}

	#[test]
	fn wrap_then_unwrap_round_trips() {
		let cipher = SoftwareAes;
		let key = scbk();
		let cp_random = [0u8; 8];
		let (s_enc, s_mac1, s_mac2) = derive_session_keys(&cipher, &key, &cp_random);
		let mut tx_mac = [0x11u8; 16];
		let mut rx_mac = tx_mac;

		let header = [0xFFu8, 0x00, 0x10, 0x00, 0x0C];
		let payload = b"poll-command-body";
		let mut wrapped = [0u8; 64];
		let n = wrap(&cipher, &s_enc, &s_mac1, &s_mac2, &mut tx_mac, &header, payload, &mut wrapped).unwrap();

		let mut recovered = [0u8; 64];
		let m = unwrap(&cipher, &s_enc, &s_mac1, &s_mac2, &mut rx_mac, &header, &wrapped[..n], &mut recovered).unwrap();
		assert_eq!(&recovered[..m], payload);
		assert_eq!(tx_mac, rx_mac);
	}

	#[test]
	fn unwrap_rejects_flipped_ciphertext_byte() {
		let cipher = SoftwareAes;
		let key = scbk();
		let cp_random = [0u8; 8];
		let (s_enc, s_mac1, s_mac2) = derive_session_keys(&cipher, &key, &cp_random);
		let mut tx_mac = [0x11u8; 16];
		let mut rx_mac = tx_mac;

		let header = [0xFFu8];
		let payload = b"abc";
		let mut wrapped = [0u8; 32];
		let n = wrap(&cipher, &s_enc, &s_mac1, &s_mac2, &mut tx_mac, &header, payload, &mut wrapped).unwrap();
		wrapped[0] ^= 0x01;

		let mut recovered = [0u8; 32];
		let result = unwrap(&cipher, &s_enc, &s_mac1, &s_mac2, &mut rx_mac, &header, &wrapped[..n], &mut recovered);
		assert!(matches!(result, Err(Error::ScCondition)));
	}

	#[test]
	fn zeroize_clears_every_field() {
		let mut keys = SessionKeys {
			s_enc: [1; 16],
			s_mac1: [1; 16],
			s_mac2: [1; 16],
			cp_random: [1; 8],
			pd_random: [1; 8],
			cp_cryptogram: [1; 16],
			pd_cryptogram: [1; 16],
			r_mac: [1; 16],
			c_mac: [1; 16],
		};
		keys.zeroize();
		assert_eq!(keys.s_enc, [0; 16]);
		assert_eq!(keys.cp_random, [0; 8]);
		assert_eq!(keys.r_mac, [0; 16]);
	}
}
