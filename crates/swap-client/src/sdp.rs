//! Syntactic SDP guards the caller may apply before sending an `offer`,
//! `answer`, or `update` body. The relay does not apply these; a
//! violation is a local validation failure, never a relay error.

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SdpViolation {
    #[error("SDP body has no media section (`m=` line)")]
    NoMediaSection,
    #[error("SDP body declares `a=ice-options:trickle`, which is not permitted here")]
    TrickleIceDeclared,
    #[error("SDP body has no `a=candidate:` line")]
    NoCandidateLine,
}

/// Applies the three syntactic guards to `sdp`, returning every violation
/// found (not just the first).
pub fn validate(sdp: &str) -> Result<(), Vec<SdpViolation>> {
    let mut violations = Vec::new();

    if !sdp.lines().any(|line| line.starts_with("m=")) {
        violations.push(SdpViolation::NoMediaSection);
    }
    if sdp.lines().any(|line| line.trim() == "a=ice-options:trickle") {
        violations.push(SdpViolation::TrickleIceDeclared);
    }
    if !sdp.lines().any(|line| line.starts_with("a=candidate:")) {
        violations.push(SdpViolation::NoCandidateLine);
    }

    if violations.is_empty() {
        Ok(())
    } else {
        Err(violations)
    }
}
