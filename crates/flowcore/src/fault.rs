use crate::ElementError;

/// What the scheduler does with an element error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Soft fault: recorded, successors of the element are cut, run goes on
    Continue,
    /// Hard fault on a required element: the run fails
    Halt,
    /// Client-initiated cancellation: the run stops silently
    Abort,
}

impl ElementError {
    pub fn is_cancellation(&self) -> bool {
        matches!(self, ElementError::Cancelled)
    }

    /// Classify this error for an element that is `optional` or not.
    pub fn disposition(&self, optional: bool) -> Disposition {
        match self {
            ElementError::Cancelled => Disposition::Abort,
            _ if optional => Disposition::Continue,
            _ => Disposition::Halt,
        }
    }

    /// Whether the error is hard for the element itself
    pub fn is_hard(&self) -> bool {
        !self.is_cancellation()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connectivity_is_hard_unless_optional() {
        let err = ElementError::Connectivity("refused".into());
        assert!(err.is_hard());
        assert_eq!(err.disposition(false), Disposition::Halt);
        assert_eq!(err.disposition(true), Disposition::Continue);
    }

    #[test]
    fn cancellation_aborts() {
        assert_eq!(ElementError::Cancelled.disposition(true), Disposition::Abort);
        assert!(ElementError::Cancelled.is_cancellation());
        assert!(!ElementError::Cancelled.is_hard());
    }

    #[test]
    fn required_http_status_halts() {
        let err = ElementError::HttpStatus {
            status: 503,
            body: String::new(),
        };
        assert_eq!(err.disposition(false), Disposition::Halt);
    }
}
