use crate::{DispatchMode, ModeDecision, TargetConfig};

/// Decide the effective interaction mode for a target before any session is
/// opened. Native requests against targets without native tool support fall
/// back to the tagged-text relay and say so in the decision.
pub(crate) fn resolve_mode(requested: DispatchMode, target: &TargetConfig) -> ModeDecision {
    match requested {
        DispatchMode::Native if !target.supports_native_tools => ModeDecision {
            requested,
            effective: DispatchMode::Relay,
            was_fallback: true,
            note: Some(format!(
                "target '{}' does not support native tool calling; using tagged-text relay",
                target.name
            )),
        },
        _ => ModeDecision {
            requested,
            effective: requested,
            was_fallback: false,
            note: None,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(native: bool) -> TargetConfig {
        TargetConfig {
            name: "t1".to_string(),
            model: "m".to_string(),
            base_url: None,
            api_key_env: None,
            supports_native_tools: native,
        }
    }

    #[test]
    fn plain_and_relay_pass_through() {
        for mode in [DispatchMode::Plain, DispatchMode::Relay] {
            let decision = resolve_mode(mode, &target(false));
            assert_eq!(decision.effective, mode);
            assert!(!decision.was_fallback);
            assert!(decision.note.is_none());
        }
    }

    #[test]
    fn native_on_capable_target_stays_native() {
        let decision = resolve_mode(DispatchMode::Native, &target(true));
        assert_eq!(decision.effective, DispatchMode::Native);
        assert!(!decision.was_fallback);
    }

    #[test]
    fn native_on_incapable_target_falls_back_to_relay() {
        let decision = resolve_mode(DispatchMode::Native, &target(false));
        assert_eq!(decision.requested, DispatchMode::Native);
        assert_eq!(decision.effective, DispatchMode::Relay);
        assert!(decision.was_fallback);
        assert!(decision.note.unwrap().contains("t1"));
    }
}
