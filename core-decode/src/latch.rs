//! # Error Latch
//!
//! The first fatal decode error is kept for the lifetime of the pipeline and
//! returned from every later controller call. Later errors never replace it.

use crate::error::{DecodeError, PipelineError};

/// Holds the first fatal decode error for replay to every later caller.
#[derive(Debug, Default)]
pub struct ErrorLatch {
    error: Option<DecodeError>,
}

impl ErrorLatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Latch `error`. Returns `false` if an earlier error already won.
    pub fn latch(&mut self, error: DecodeError) -> bool {
        if self.error.is_some() {
            return false;
        }
        self.error = Some(error);
        true
    }

    pub fn is_set(&self) -> bool {
        self.error.is_some()
    }

    pub fn get(&self) -> Option<&DecodeError> {
        self.error.as_ref()
    }

    /// Replay the latched error, if any.
    pub fn check(&self) -> Result<(), PipelineError> {
        match &self.error {
            Some(err) => Err(PipelineError::Decode(err.clone())),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_error_wins() {
        let mut latch = ErrorLatch::new();
        assert!(latch.check().is_ok());

        assert!(latch.latch(DecodeError::Corrupted("first".into())));
        assert!(!latch.latch(DecodeError::Internal("second".into())));

        let expected = PipelineError::Decode(DecodeError::Corrupted("first".into()));
        assert_eq!(latch.check(), Err(expected.clone()));
        assert_eq!(latch.check(), Err(expected));
        assert!(latch.is_set());
    }
}
