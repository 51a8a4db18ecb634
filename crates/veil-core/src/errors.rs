/// Authentication failures surfaced to the connecting client.
/// Every variant maps to a distinct caller-facing reason string; all other
/// internal failures (cache outages, push errors, missing live channel)
/// degrade silently and never reach the client as errors.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("missing credential")]
    MissingToken,
    #[error("credential expired")]
    Expired,
    #[error("credential malformed")]
    Malformed,
    #[error("subject not found")]
    SubjectNotFound,
}

impl AuthError {
    /// Stable reason string for rejection payloads and logs.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::MissingToken => "missing_token",
            Self::Expired => "expired",
            Self::Malformed => "malformed",
            Self::SubjectNotFound => "subject_not_found",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reasons_are_distinct() {
        let reasons = [
            AuthError::MissingToken.reason(),
            AuthError::Expired.reason(),
            AuthError::Malformed.reason(),
            AuthError::SubjectNotFound.reason(),
        ];
        let unique: std::collections::HashSet<_> = reasons.iter().collect();
        assert_eq!(unique.len(), reasons.len());
    }

    #[test]
    fn display_is_human_readable() {
        assert_eq!(AuthError::Expired.to_string(), "credential expired");
    }
}
