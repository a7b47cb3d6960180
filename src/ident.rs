//! Identifier Generation
//!
//! Random alphanumeric identifiers, delete tokens, and quarantine names.
//! Identifier allocation re-draws on collision; the window between the
//! existence check and folder creation is closed by exclusive creation
//! in the backends, which surfaces as a conflict rather than an overwrite.

use rand::distr::{Alphanumeric, SampleString};

use crate::backend::{Backend, QUARANTINE_DIR};
use crate::error::Result;

/// Length of the random portion of quarantine names
const QUARANTINE_SUFFIX_LENGTH: usize = 5;

/// Draw a uniform random alphanumeric string of the given length
pub fn random_alphanumeric(length: usize) -> String {
    Alphanumeric.sample_string(&mut rand::rng(), length)
}

/// Allocate a fresh record identifier against a backend.
///
/// Draws until the backend reports the id unused. The quarantine
/// directory name is reserved and never handed out regardless of length.
pub async fn allocate_id(backend: &dyn Backend, length: usize) -> Result<String> {
    loop {
        let id = random_alphanumeric(length);
        if id == QUARANTINE_DIR {
            continue;
        }
        if !backend.id_exists(&id).await? {
            return Ok(id);
        }
    }
}

/// Build a candidate quarantine filename for a record name.
///
/// The original name stays recognizable at the end; the random middle
/// keeps same-named records from colliding inside the quarantine
/// directory. Callers re-draw while the candidate is taken.
pub fn quarantine_name(name: &str) -> String {
    let initial = name.chars().next().unwrap_or('_');
    format!(
        "{}{}_{}",
        initial,
        random_alphanumeric(QUARANTINE_SUFFIX_LENGTH),
        name
    )
}
