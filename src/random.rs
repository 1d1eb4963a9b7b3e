//! Thread-safe random numbers and secure tokens.
//!
//! Two sources sit side by side:
//!
//! - a seeded pseudo-random generator behind a single mutex, for cheap numeric draws;
//! - the operating system's entropy source, used directly for every byte or string that
//!   ends up in a filename, directory name or identifier, so those tokens never derive
//!   from an observable generator stream.
//!
//! The generator must be reseeded after `fork()`; otherwise parent and child produce
//! identical sequences. Never call anything here from a signal handler: the mutex may be
//! held by the interrupted thread.

use crate::error::{Result, SigguardError};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use log::{debug, warn};
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

/// Length of tokens produced by [`SecureRandom::directory_token_default`].
pub const DEFAULT_TOKEN_LEN: usize = 64;

/// A provider of unpredictable bytes.
pub trait EntropySource: Send + Sync {
    /// Fills `buf` completely, or fails. Implementations must never leave `buf` partially
    /// filled on success.
    fn fill(&self, buf: &mut [u8]) -> Result<()>;
}

/// The operating system's cryptographic random source, via `getrandom`.
#[derive(Debug, Default, Clone, Copy)]
pub struct OsEntropy;

impl EntropySource for OsEntropy {
    fn fill(&self, buf: &mut [u8]) -> Result<()> {
        getrandom::getrandom(buf).map_err(|e| SigguardError::EntropyUnavailable(e.to_string()))
    }
}

/// Which seed a call to [`SecureRandom::reseed`] ended up using.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReseedSource {
    /// The generator was seeded from the entropy source.
    Entropy,
    /// Entropy was unavailable; the generator was seeded from the wall clock and process id.
    /// Differs between processes but is not cryptographically strong.
    Fallback,
}

/// Thread-safe generator plus direct access to an entropy source.
pub struct SecureRandom {
    generator: Mutex<StdRng>,
    entropy: Arc<dyn EntropySource>,
}

impl std::fmt::Debug for SecureRandom {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecureRandom").finish_non_exhaustive()
    }
}

impl Default for SecureRandom {
    fn default() -> Self {
        Self::new()
    }
}

impl SecureRandom {
    /// Creates a generator backed by [`OsEntropy`].
    pub fn new() -> Self {
        Self::with_entropy(Arc::new(OsEntropy))
    }

    /// Creates a generator backed by `entropy`, seeded from it (or from the fallback seed).
    pub fn with_entropy(entropy: Arc<dyn EntropySource>) -> Self {
        let (rng, _) = seed_generator(entropy.as_ref());
        Self {
            generator: Mutex::new(rng),
            entropy,
        }
    }

    /// Draws the next value from the shared generator.
    ///
    /// Safe to call from any number of threads; callers are mutually excluded but not
    /// ordered.
    pub fn next_integer(&self) -> u64 {
        // The generator holds no invariant a panicking holder could break.
        let mut rng = self
            .generator
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        rng.next_u64()
    }

    /// Replaces the generator state with a fresh seed. Call once in the child after
    /// every `fork()`.
    ///
    /// Seeds from the entropy source when it is available, otherwise from the wall clock
    /// and process id (logged as a warning so deployments can notice).
    pub fn reseed(&self) -> ReseedSource {
        // Seed material is gathered before taking the lock so entropy I/O never happens
        // while other threads wait on the generator.
        let (fresh, source) = seed_generator(self.entropy.as_ref());
        let mut rng = self
            .generator
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *rng = fresh;
        debug!("Generator reseeded from {:?}", source);
        source
    }

    /// Returns exactly `length` bytes read directly from the entropy source.
    ///
    /// # Errors
    ///
    /// `SigguardError::EntropyUnavailable` if the source fails. There is no fallback.
    pub fn secure_bytes(&self, length: usize) -> Result<Vec<u8>> {
        let mut bytes = vec![0_u8; length];
        if length > 0 {
            self.entropy.fill(&mut bytes)?;
        }
        Ok(bytes)
    }

    /// Returns exactly `length` characters of URL- and filename-safe base64 built from
    /// entropy bytes. The result never contains `/`.
    pub fn secure_string(&self, length: usize) -> Result<String> {
        let bytes = self.secure_bytes(entropy_bytes_for(length))?;
        let mut encoded = URL_SAFE_NO_PAD.encode(bytes);
        encoded.truncate(length);
        // The URL-safe alphabet has no '/', but the guarantee must not depend on it.
        if encoded.contains('/') {
            encoded = encoded.replace('/', "_");
        }
        Ok(encoded)
    }

    /// A token suitable as a single path segment, e.g. for a secure temporary directory.
    /// Creating the directory is up to the caller.
    pub fn directory_token(&self, length: usize) -> Result<String> {
        self.secure_string(length)
    }

    /// [`directory_token`](Self::directory_token) with [`DEFAULT_TOKEN_LEN`] characters.
    pub fn directory_token_default(&self) -> Result<String> {
        self.directory_token(DEFAULT_TOKEN_LEN)
    }
}

/// Entropy bytes whose unpadded base64 encoding has at least `chars` characters.
///
/// Every 3 bytes encode to exactly 4 characters.
fn entropy_bytes_for(chars: usize) -> usize {
    chars.div_ceil(4) * 3
}

fn seed_generator(entropy: &dyn EntropySource) -> (StdRng, ReseedSource) {
    let mut seed = <StdRng as SeedableRng>::Seed::default();
    match entropy.fill(&mut seed) {
        Ok(()) => (StdRng::from_seed(seed), ReseedSource::Entropy),
        Err(e) => {
            warn!("{}; seeding generator from clock and pid", e);
            (
                StdRng::seed_from_u64(fallback_seed()),
                ReseedSource::Fallback,
            )
        }
    }
}

fn fallback_seed() -> u64 {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or_default();
    nanos ^ (u64::from(std::process::id()) << 32)
}
