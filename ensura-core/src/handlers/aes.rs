//! `encrypted`/`unencrypted` on `file` subjects. Wire format: 16-byte magic
//! `ENSURA_AES256_V1`, 12-byte nonce, AES-256-GCM ciphertext with its
//! 16-byte tag appended by the AEAD. Key resolution: `env:<NAME>`,
//! `file:<path>`, or a literal string, then SHA-256 to a 32-byte key.

use std::fs;

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Nonce};
use sha2::{Digest, Sha256};

use crate::error::HandlerError;

use super::{subject_path, Handler, HandlerCtx, HandlerResult};

const MAGIC: &[u8; 16] = b"ENSURA_AES256_V1";
const NONCE_LEN: usize = 12;

pub struct AesHandler;

impl Handler for AesHandler {
    fn name(&self) -> &'static str {
        "AES:256"
    }

    fn check(&self, ctx: &HandlerCtx) -> HandlerResult {
        let path = match subject_path(ctx.subject) {
            Ok(p) => p,
            Err(e) => return HandlerResult::failed(e),
        };
        let want_encrypted = ctx.condition == "encrypted";
        match fs::read(path) {
            Ok(bytes) => {
                let is_encrypted = bytes.len() >= MAGIC.len() && &bytes[..MAGIC.len()] == MAGIC;
                if is_encrypted == want_encrypted {
                    HandlerResult::ok(format!("{path} already {}", ctx.condition))
                } else {
                    HandlerResult::failed(HandlerError::Other(format!(
                        "{path} is not {}",
                        ctx.condition
                    )))
                }
            }
            Err(e) => HandlerResult::failed(HandlerError::Other(e.to_string())),
        }
    }

    fn enforce(&self, ctx: &HandlerCtx) -> HandlerResult {
        let path = match subject_path(ctx.subject) {
            Ok(p) => p,
            Err(e) => return HandlerResult::failed(e),
        };
        match ctx.condition {
            "encrypted" => encrypt_in_place(path, ctx),
            "unencrypted" => decrypt_in_place(path, ctx),
            other => HandlerResult::failed(HandlerError::UnknownCondition(other.to_string())),
        }
    }
}

fn key_material(ctx: &HandlerCtx) -> Result<[u8; 32], HandlerError> {
    let Some(key_ref) = ctx.args.get("key") else {
        return Err(HandlerError::MissingArgument("key".to_string()));
    };
    let raw = if let Some(var) = key_ref.strip_prefix("env:") {
        std::env::var(var).map_err(|_| HandlerError::Other(format!("environment variable `{var}` not set")))?
            .into_bytes()
    } else if let Some(path) = key_ref.strip_prefix("file:") {
        fs::read(path).map_err(|e| HandlerError::Other(format!("could not read key file `{path}`: {e}")))?
    } else {
        key_ref.clone().into_bytes()
    };
    let mut hasher = Sha256::new();
    hasher.update(&raw);
    Ok(hasher.finalize().into())
}

fn encrypt_in_place(path: &str, ctx: &HandlerCtx) -> HandlerResult {
    let key = match key_material(ctx) {
        Ok(k) => k,
        Err(e) => return HandlerResult::failed(e),
    };
    let plaintext = match fs::read(path) {
        Ok(b) => b,
        Err(e) => return HandlerResult::failed(HandlerError::Other(e.to_string())),
    };
    let cipher = Aes256Gcm::new_from_slice(&key).expect("32-byte key always valid for AES-256-GCM");
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
    let ciphertext = match cipher.encrypt(&nonce, plaintext.as_ref()) {
        Ok(c) => c,
        Err(_) => return HandlerResult::failed(HandlerError::Other("AES-GCM encryption failed".to_string())),
    };
    let mut out = Vec::with_capacity(MAGIC.len() + NONCE_LEN + ciphertext.len());
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(nonce.as_slice());
    out.extend_from_slice(&ciphertext);
    match fs::write(path, out) {
        Ok(()) => HandlerResult::ok(format!("{path} encrypted")),
        Err(e) => HandlerResult::failed(HandlerError::Other(e.to_string())),
    }
}

fn decrypt_in_place(path: &str, ctx: &HandlerCtx) -> HandlerResult {
    let key = match key_material(ctx) {
        Ok(k) => k,
        Err(e) => return HandlerResult::failed(e),
    };
    let bytes = match fs::read(path) {
        Ok(b) => b,
        Err(e) => return HandlerResult::failed(HandlerError::Other(e.to_string())),
    };
    if bytes.len() < MAGIC.len() + NONCE_LEN || &bytes[..MAGIC.len()] != MAGIC {
        return HandlerResult::failed(HandlerError::Other(format!("{path} is not an ensura AES file")));
    }
    let nonce_bytes = &bytes[MAGIC.len()..MAGIC.len() + NONCE_LEN];
    let ciphertext = &bytes[MAGIC.len() + NONCE_LEN..];
    let cipher = Aes256Gcm::new_from_slice(&key).expect("32-byte key always valid for AES-256-GCM");
    let nonce = Nonce::from_slice(nonce_bytes);
    match cipher.decrypt(nonce, ciphertext) {
        Ok(plaintext) => match fs::write(path, plaintext) {
            Ok(()) => HandlerResult::ok(format!("{path} decrypted")),
            Err(e) => HandlerResult::failed(HandlerError::Other(e.to_string())),
        },
        Err(_) => HandlerResult::failed(HandlerError::Other(
            "AES-GCM decryption failed (wrong key or corrupt file)".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{ResourceRef, ResourceType};
    use std::collections::BTreeMap;

    #[test]
    fn round_trip_recovers_original_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s.db").to_string_lossy().into_owned();
        std::fs::write(&path, b"hello").unwrap();
        std::env::set_var("ENSURA_TEST_KEY", "topsecret");

        let subject = ResourceRef::Inline { res_type: ResourceType::File, path: path.clone() };
        let mut args = BTreeMap::new();
        args.insert("key".to_string(), "env:ENSURA_TEST_KEY".to_string());
        let handler = AesHandler;

        let enc_ctx = HandlerCtx { subject: &subject, condition: "encrypted", args: &args };
        assert!(handler.enforce(&enc_ctx).success);
        let on_disk = std::fs::read(&path).unwrap();
        assert_eq!(&on_disk[..16], MAGIC);
        assert!(handler.check(&enc_ctx).success);

        let dec_ctx = HandlerCtx { subject: &subject, condition: "unencrypted", args: &args };
        assert!(handler.enforce(&dec_ctx).success);
        assert_eq!(std::fs::read(&path).unwrap(), b"hello");

        std::env::remove_var("ENSURA_TEST_KEY");
    }

    #[test]
    fn decrypt_with_wrong_key_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s.db").to_string_lossy().into_owned();
        std::fs::write(&path, b"hello").unwrap();
        let subject = ResourceRef::Inline { res_type: ResourceType::File, path: path.clone() };
        let mut args = BTreeMap::new();
        args.insert("key".to_string(), "right".to_string());
        let handler = AesHandler;
        handler.enforce(&HandlerCtx { subject: &subject, condition: "encrypted", args: &args });

        args.insert("key".to_string(), "wrong".to_string());
        let r = handler.enforce(&HandlerCtx { subject: &subject, condition: "unencrypted", args: &args });
        assert!(!r.success);
    }
}
