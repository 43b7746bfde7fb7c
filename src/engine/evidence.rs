use crate::limits::*;
use crate::model::*;

use super::lifecycle::{require_assigned_provider, require_open};
use super::{stamp_after, Engine, EngineError};

/// Reference lists are opaque: no URL parsing, no dedup, caller order kept.
pub(crate) fn validate_refs(refs: &[String]) -> Result<(), EngineError> {
    if refs.is_empty() {
        return Err(EngineError::Validation(
            "evidence list must contain at least one reference".into(),
        ));
    }
    if refs.len() > MAX_EVIDENCE_REFS {
        return Err(EngineError::LimitExceeded("too many evidence references"));
    }
    if refs.iter().any(|r| r.is_empty()) {
        return Err(EngineError::Validation("evidence reference must not be empty".into()));
    }
    if refs.iter().any(|r| r.len() > MAX_EVIDENCE_REF_LEN) {
        return Err(EngineError::LimitExceeded("evidence reference too long"));
    }
    Ok(())
}

impl Engine {
    /// Replace one evidence list wholesale.
    pub async fn replace_evidence(
        &self,
        id: BookingId,
        caller: Participant,
        phase: EvidencePhase,
        refs: Vec<String>,
    ) -> Result<Booking, EngineError> {
        validate_refs(&refs)?;
        let _commit = self.begin_commit().await;
        let mut pair = self.resolve_booking_write(id).await?;
        let current = pair.booking(id).ok_or(EngineError::NotFound(id))?;
        require_assigned_provider(current, caller, "upload evidence for")?;
        require_open(current, "upload evidence for")?;

        let event = Event::EvidenceReplaced {
            id,
            phase,
            refs,
            at: stamp_after(current.updated_at),
        };
        self.persist_and_apply(&mut pair, &event).await?;
        tracing::debug!("booking {id}: {} evidence replaced", phase.as_str());
        pair.booking(id).cloned().ok_or(EngineError::NotFound(id))
    }

    pub async fn set_before_evidence(
        &self,
        id: BookingId,
        caller: Participant,
        refs: Vec<String>,
    ) -> Result<Booking, EngineError> {
        self.replace_evidence(id, caller, EvidencePhase::Before, refs)
            .await
    }

    pub async fn set_after_evidence(
        &self,
        id: BookingId,
        caller: Participant,
        refs: Vec<String>,
    ) -> Result<Booking, EngineError> {
        self.replace_evidence(id, caller, EvidencePhase::After, refs)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_list_rejected() {
        assert!(matches!(validate_refs(&[]), Err(EngineError::Validation(_))));
        assert!(matches!(
            validate_refs(&[String::new()]),
            Err(EngineError::Validation(_))
        ));
    }

    #[test]
    fn duplicates_are_kept() {
        let refs = vec!["a".to_string(), "a".to_string()];
        assert!(validate_refs(&refs).is_ok());
    }

    #[test]
    fn size_limits() {
        let too_many: Vec<String> = (0..=MAX_EVIDENCE_REFS).map(|i| format!("r{i}")).collect();
        assert!(matches!(
            validate_refs(&too_many),
            Err(EngineError::LimitExceeded(_))
        ));
        let too_long = vec!["x".repeat(MAX_EVIDENCE_REF_LEN + 1)];
        assert!(matches!(
            validate_refs(&too_long),
            Err(EngineError::LimitExceeded(_))
        ));
    }
}
