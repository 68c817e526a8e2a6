//! Crypto Pipeline (C3): streaming authenticated encryption for file bodies.
//!
//! Scheme v1: scrypt (N=2^18, r=8, p=1) over a 32-byte random salt derives
//! 64 bytes, split into a 32-byte AES-256-CTR content key and a 32-byte
//! HMAC-SHA-512 authentication key. The authentication tag covers
//! `salt || iv || ciphertext`. Wire format:
//! `[4-byte LE version][salt][iv][ciphertext][hmac]`.

use aes::Aes256;
use cipher::{KeyIvInit, StreamCipher};
use ctr::Ctr128BE;
use hmac::{Hmac, Mac};
use rand::RngCore;
use scrypt::Params;
use sha2::Sha512;
use std::path::PathBuf;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeekExt, AsyncWrite, AsyncWriteExt};

use crate::error::CryptoError;

pub const VERSION_1: u32 = 1;
pub const SALT_LEN: usize = 32;
pub const IV_LEN: usize = 16;
/// HMAC-SHA-512 output size.
pub const HMAC_LEN: usize = 64;
const VERSION_LEN: usize = 4;

/// Peek-ahead chunk size: large enough that the HMAC suffix can be
/// distinguished from ciphertext without reading past the true end.
pub const PEEK_CHUNK: usize = 16 * 1024;

/// Fixed overhead the pipeline adds to a plaintext body. Consumers
/// comparing local/remote sizes must subtract this before comparing.
pub const OVERHEAD: u64 = (VERSION_LEN + SALT_LEN + IV_LEN + HMAC_LEN) as u64;

type Aes256Ctr = Ctr128BE<Aes256>;
type HmacSha512 = Hmac<Sha512>;

struct DerivedKeys {
	content_key: [u8; 32],
	auth_key: [u8; 32],
}

fn derive_keys(password: &str, salt: &[u8; SALT_LEN]) -> Result<DerivedKeys, CryptoError> {
	let params = Params::new(18, 8, 1, 64)
		.map_err(|e| CryptoError::KdfFailed { message: e.to_string() })?;
	let mut output = [0u8; 64];
	scrypt::scrypt(password.as_bytes(), salt, &params, &mut output)
		.map_err(|e| CryptoError::KdfFailed { message: e.to_string() })?;

	let mut content_key = [0u8; 32];
	let mut auth_key = [0u8; 32];
	content_key.copy_from_slice(&output[..32]);
	auth_key.copy_from_slice(&output[32..]);
	Ok(DerivedKeys { content_key, auth_key })
}

/// Encrypt `src` into `dst`, deriving keys from `password`.
pub async fn encrypt<R, W>(mut src: R, mut dst: W, password: &str) -> Result<(), CryptoError>
where
	R: AsyncRead + Unpin,
	W: AsyncWrite + Unpin,
{
	let mut salt = [0u8; SALT_LEN];
	let mut iv = [0u8; IV_LEN];
	rand::rngs::OsRng.try_fill_bytes(&mut salt).map_err(|_| CryptoError::RandomSourceExhausted)?;
	rand::rngs::OsRng.try_fill_bytes(&mut iv).map_err(|_| CryptoError::RandomSourceExhausted)?;

	let keys = derive_keys(password, &salt)?;
	let mut mac = HmacSha512::new_from_slice(&keys.auth_key)
		.map_err(|e| CryptoError::KdfFailed { message: e.to_string() })?;
	mac.update(&salt);
	mac.update(&iv);

	dst.write_all(&VERSION_1.to_le_bytes()).await?;
	dst.write_all(&salt).await?;
	dst.write_all(&iv).await?;

	let mut cipher = Aes256Ctr::new((&keys.content_key).into(), (&iv).into());
	let mut buf = vec![0u8; PEEK_CHUNK];
	loop {
		let n = src.read(&mut buf).await?;
		if n == 0 {
			break;
		}
		let chunk = &mut buf[..n];
		cipher.apply_keystream(chunk);
		mac.update(chunk);
		dst.write_all(chunk).await?;
	}

	let tag = mac.finalize().into_bytes();
	dst.write_all(&tag).await?;
	dst.flush().await?;
	Ok(())
}

/// RAII guard that unlinks a scratch file on drop, on every exit path.
struct ScratchGuard {
	path: PathBuf,
}

impl Drop for ScratchGuard {
	fn drop(&mut self) {
		let _ = std::fs::remove_file(&self.path);
	}
}

/// Decrypt the stream read from `src` (version tag, salt, iv, ciphertext,
/// hmac) into `dst`, using a scratch temp file at `scratch_path` to hold
/// the ciphertext while the trailing HMAC is peeled off the tail of the
/// stream. The scratch file is removed on every exit path.
pub async fn decrypt<R, W>(
	mut src: R,
	mut dst: W,
	password: &str,
	scratch_path: PathBuf,
) -> Result<(), CryptoError>
where
	R: AsyncRead + Unpin,
	W: AsyncWrite + Unpin,
{
	let _guard = ScratchGuard { path: scratch_path.clone() };

	let mut version_bytes = [0u8; VERSION_LEN];
	src.read_exact(&mut version_bytes).await?;
	let version = u32::from_le_bytes(version_bytes);
	if version != VERSION_1 {
		return Err(CryptoError::UnknownVersion { version });
	}

	let mut salt = [0u8; SALT_LEN];
	let mut iv = [0u8; IV_LEN];
	src.read_exact(&mut salt).await?;
	src.read_exact(&mut iv).await?;

	let keys = derive_keys(password, &salt)?;
	let mut mac = HmacSha512::new_from_slice(&keys.auth_key)
		.map_err(|e| CryptoError::KdfFailed { message: e.to_string() })?;
	mac.update(&salt);
	mac.update(&iv);

	{
		let mut scratch = tokio::fs::File::create(&scratch_path).await?;
		let mut pending: Vec<u8> = Vec::with_capacity(PEEK_CHUNK + HMAC_LEN);
		let mut buf = vec![0u8; PEEK_CHUNK];

		loop {
			let n = src.read(&mut buf).await?;
			if n == 0 {
				break;
			}
			pending.extend_from_slice(&buf[..n]);
			if pending.len() > HMAC_LEN {
				let flush_len = pending.len() - HMAC_LEN;
				let to_flush: Vec<u8> = pending.drain(..flush_len).collect();
				mac.update(&to_flush);
				scratch.write_all(&to_flush).await?;
			}
		}
		scratch.flush().await?;

		if pending.len() != HMAC_LEN {
			return Err(CryptoError::AuthenticationFailed);
		}
		mac.verify_slice(&pending).map_err(|_| CryptoError::AuthenticationFailed)?;
	}

	let mut scratch = tokio::fs::File::open(&scratch_path).await?;
	scratch.seek(std::io::SeekFrom::Start(0)).await?;

	let mut cipher = Aes256Ctr::new((&keys.content_key).into(), (&iv).into());
	let mut buf = vec![0u8; PEEK_CHUNK];
	loop {
		let n = scratch.read(&mut buf).await?;
		if n == 0 {
			break;
		}
		let chunk = &mut buf[..n];
		cipher.apply_keystream(chunk);
		dst.write_all(chunk).await?;
	}
	dst.flush().await?;

	Ok(())
}


// vim: ts=4
