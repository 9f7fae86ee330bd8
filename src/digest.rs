// src/digest.rs

//! Reusable, thread-confined digest engines.
//!
//! Every fingerprint in the crate goes through [`compute_digest`]. Each
//! thread owns one engine per algorithm; the engine is reset before and after
//! every use so the next caller on the same thread starts from a clean state.
//! Nothing is shared across threads, so there is no locking.
//!
//! The scratch engines are not re-entrant: a nested `compute_digest` call for
//! the same algorithm from inside `operation` falls back to a fresh engine
//! instead of reusing the borrowed one.

use std::cell::RefCell;
use std::fmt;
use std::str::FromStr;

use sha2::{Digest, Sha256, Sha512};

use crate::errors::{BuildCauseError, Result};

/// Allow-listed digest algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DigestAlgorithm {
    Sha256,
    Sha512,
    Blake3,
}

impl DigestAlgorithm {
    pub fn name(self) -> &'static str {
        match self {
            DigestAlgorithm::Sha256 => "SHA-256",
            DigestAlgorithm::Sha512 => "SHA-512",
            DigestAlgorithm::Blake3 => "BLAKE3",
        }
    }
}

impl fmt::Display for DigestAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DigestAlgorithm {
    type Err = BuildCauseError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().replace('_', "-").as_str() {
            "SHA-256" | "SHA256" => Ok(DigestAlgorithm::Sha256),
            "SHA-512" | "SHA512" => Ok(DigestAlgorithm::Sha512),
            "BLAKE3" => Ok(DigestAlgorithm::Blake3),
            _ => Err(BuildCauseError::UnsupportedDigest(s.to_string())),
        }
    }
}

thread_local! {
    static SHA256_ENGINE: RefCell<Sha256> = RefCell::new(Sha256::new());
    static SHA512_ENGINE: RefCell<Sha512> = RefCell::new(Sha512::new());
    static BLAKE3_ENGINE: RefCell<blake3::Hasher> = RefCell::new(blake3::Hasher::new());
}

/// Handle passed to digest operations; feed it bytes with [`Digester::update`].
pub struct Digester<'a> {
    engine: Engine<'a>,
}

enum Engine<'a> {
    Sha256(&'a mut Sha256),
    Sha512(&'a mut Sha512),
    Blake3(&'a mut blake3::Hasher),
}

impl Digester<'_> {
    pub fn update(&mut self, data: impl AsRef<[u8]>) -> &mut Self {
        let data = data.as_ref();
        match &mut self.engine {
            Engine::Sha256(h) => Digest::update(&mut **h, data),
            Engine::Sha512(h) => Digest::update(&mut **h, data),
            Engine::Blake3(h) => {
                h.update(data);
            }
        }
        self
    }

    /// Feed a key/value pair, each prefixed with its byte length.
    pub fn field(&mut self, key: &str, value: &str) -> &mut Self {
        self.update((key.len() as u64).to_le_bytes())
            .update(key)
            .update((value.len() as u64).to_le_bytes())
            .update(value)
    }

    /// Finish the digest as lowercase hex and reset the engine.
    fn finish(self) -> String {
        match self.engine {
            Engine::Sha256(h) => format!("{:x}", h.finalize_reset()),
            Engine::Sha512(h) => format!("{:x}", h.finalize_reset()),
            Engine::Blake3(h) => {
                let hex = h.finalize().to_hex().to_string();
                h.reset();
                hex
            }
        }
    }
}

/// Run `operation` against this thread's engine for `algorithm` and return
/// the hex digest.
pub fn compute_digest<F>(algorithm: DigestAlgorithm, operation: F) -> String
where
    F: FnOnce(&mut Digester<'_>),
{
    match algorithm {
        DigestAlgorithm::Sha256 => SHA256_ENGINE.with(|cell| match cell.try_borrow_mut() {
            Ok(mut engine) => {
                Digest::reset(&mut *engine);
                run(Engine::Sha256(&mut engine), operation)
            }
            Err(_) => run(Engine::Sha256(&mut Sha256::new()), operation),
        }),
        DigestAlgorithm::Sha512 => SHA512_ENGINE.with(|cell| match cell.try_borrow_mut() {
            Ok(mut engine) => {
                Digest::reset(&mut *engine);
                run(Engine::Sha512(&mut engine), operation)
            }
            Err(_) => run(Engine::Sha512(&mut Sha512::new()), operation),
        }),
        DigestAlgorithm::Blake3 => BLAKE3_ENGINE.with(|cell| match cell.try_borrow_mut() {
            Ok(mut engine) => {
                engine.reset();
                run(Engine::Blake3(&mut engine), operation)
            }
            Err(_) => run(Engine::Blake3(&mut blake3::Hasher::new()), operation),
        }),
    }
}

/// Same as [`compute_digest`] but with the algorithm given by name.
///
/// Unsupported names fail before `operation` runs.
pub fn compute_digest_named<F>(algorithm: &str, operation: F) -> Result<String>
where
    F: FnOnce(&mut Digester<'_>),
{
    let algorithm = algorithm.parse::<DigestAlgorithm>()?;
    Ok(compute_digest(algorithm, operation))
}

/// SHA-256 of a single byte string.
pub fn sha256_hex(data: impl AsRef<[u8]>) -> String {
    compute_digest(DigestAlgorithm::Sha256, |d| {
        d.update(data);
    })
}

fn run<F>(engine: Engine<'_>, operation: F) -> String
where
    F: FnOnce(&mut Digester<'_>),
{
    let mut digester = Digester { engine };
    operation(&mut digester);
    digester.finish()
}
