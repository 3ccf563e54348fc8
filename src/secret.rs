//! Encrypted values kept off the tracker.
//!
//! Values are serialized to JSON, encrypted by a [`Cipher`] and sent to a
//! [`SecretBackend`] as base64 text. Reads decrypt everything before
//! returning, so a caller sees either every requested plaintext or an error.

use std::collections::{BTreeMap, BTreeSet};
use std::io::Write;
use std::process::{Command, Stdio};
use std::thread;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde_json::Value;
use tracing::debug;

use crate::error::{CryptoError, Error, Result};
use crate::model::Key;

/// Opaque encryption capability.
pub trait Cipher {
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError>;
    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError>;
}

/// Remote storage for ciphertext.
pub trait SecretBackend {
    fn put(&self, key: &Key, ciphertext: &str) -> Result<()>;

    /// `None` when the key has never been written.
    fn get(&self, key: &Key) -> Result<Option<String>>;
}

/// Runs an external program per operation, piping data through stdin and
/// stdout (`age`, `gpg`, `openssl`, ...).
#[derive(Debug, Clone)]
pub struct CommandCipher {
    encrypt: Vec<String>,
    decrypt: Vec<String>,
}

impl CommandCipher {
    /// Both commands are argv vectors; the first element is the program.
    pub fn new(encrypt: Vec<String>, decrypt: Vec<String>) -> Result<Self> {
        if encrypt.is_empty() || decrypt.is_empty() {
            return Err(Error::Configuration(
                "encrypt_command and decrypt_command must name a program".into(),
            ));
        }
        Ok(Self { encrypt, decrypt })
    }

    fn run(argv: &[String], input: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| CryptoError::new("empty cipher command"))?;
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| CryptoError::new(format!("failed to start {program}: {e}")))?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| CryptoError::new(format!("no stdin for {program}")))?;
        // stdin is fed from its own thread so a full stdout pipe cannot stall the write
        let (written, output) = thread::scope(|scope| {
            let writer = scope.spawn(move || stdin.write_all(input));
            let output = child.wait_with_output();
            (writer.join(), output)
        });
        let output =
            output.map_err(|e| CryptoError::new(format!("failed to wait for {program}: {e}")))?;

        if !output.status.success() {
            return Err(CryptoError::new(format!(
                "{program} exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        match written {
            Ok(Ok(())) => Ok(output.stdout),
            Ok(Err(e)) => Err(CryptoError::new(format!(
                "failed to write to {program}: {e}"
            ))),
            Err(_) => Err(CryptoError::new(format!(
                "writer thread for {program} panicked"
            ))),
        }
    }
}

impl Cipher for CommandCipher {
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        Self::run(&self.encrypt, plaintext)
    }

    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        Self::run(&self.decrypt, ciphertext)
    }
}

pub struct SecretStore<C, B> {
    cipher: C,
    backend: B,
}

impl<C: Cipher, B: SecretBackend> SecretStore<C, B> {
    pub fn new(cipher: C, backend: B) -> Self {
        Self { cipher, backend }
    }

    pub fn upsert(&self, key: &Key, value: &Value) -> Result<()> {
        let plaintext = serde_json::to_vec(value)?;
        let ciphertext = self.cipher.encrypt(&plaintext)?;
        self.backend.put(key, &STANDARD.encode(ciphertext))?;
        debug!(key = %key, "stored encrypted value");
        Ok(())
    }

    /// Decrypted values of the requested keys; absent keys are left out.
    pub fn get(&self, keys: &BTreeSet<Key>) -> Result<BTreeMap<Key, Value>> {
        let mut found = BTreeMap::new();
        for key in keys {
            let Some(encoded) = self.backend.get(key)? else {
                continue;
            };
            found.insert(key.clone(), self.open(key, &encoded)?);
        }
        Ok(found)
    }

    fn open(&self, key: &Key, encoded: &str) -> Result<Value> {
        let ciphertext = STANDARD
            .decode(encoded.trim())
            .map_err(|e| CryptoError::new(format!("ciphertext of '{key}' is not base64: {e}")))?;
        let plaintext = self.cipher.decrypt(&ciphertext)?;
        serde_json::from_slice(&plaintext).map_err(|source| Error::Decode {
            key: key.to_string(),
            source,
        })
    }
}
