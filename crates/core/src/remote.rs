//! Backend-pushed control overrides.
//!
//! The stream delivers either the whole `controls/current` object at path
//! `/`, or one field at a time at `/pump_state`, `/canopy_state` or
//! `/auto_mode`. Both shapes decode to the same [`ControlCommand`].

use serde_json::{Map, Value};
use tracing::warn;

use crate::control::Applied;
use crate::error::RemoteError;
use crate::link::StreamEvent;
use crate::state::{on_off, Actuator, ControlState};

const AUTO_MODE: &str = "auto_mode";

/// Requested changes; `None` fields are left alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ControlCommand {
    pub pump: Option<bool>,
    pub canopy: Option<bool>,
    pub auto_mode: Option<bool>,
}

/// Result of applying a [`ControlCommand`].
#[derive(Debug, Default, PartialEq)]
pub struct CommandOutcome {
    pub transitions: Vec<Applied>,
    /// New auto-mode value when it changed; the caller persists it.
    pub auto_mode_changed: Option<bool>,
}

// ---------------------------------------------------------------------------
// Decoding
// ---------------------------------------------------------------------------

/// Decode one stream event. A payload that parses as an object carrying any
/// control field is taken as a full state object; anything else is matched
/// by path suffix.
pub fn parse_event(event: &StreamEvent) -> Result<ControlCommand, RemoteError> {
    let value = serde_json::from_str::<Value>(event.payload.trim()).ok();

    if let Some(Value::Object(map)) = &value {
        if let Some(cmd) = from_object(map)? {
            return Ok(cmd);
        }
    }

    let field = event.path.trim_matches('/').rsplit('/').next().unwrap_or("");
    if field.is_empty() {
        return Err(RemoteError::Empty);
    }

    // Scalars arrive either JSON-encoded ("\"ON\"", "true") or bare (ON).
    let scalar = value.unwrap_or_else(|| Value::String(event.payload.trim().to_string()));
    from_field(field, &scalar)
}

fn from_object(map: &Map<String, Value>) -> Result<Option<ControlCommand>, RemoteError> {
    let mut cmd = ControlCommand::default();
    let mut any = false;
    for (name, value) in map {
        if is_control_field(name) {
            merge(&mut cmd, name, value)?;
            any = true;
        }
    }
    Ok(any.then_some(cmd))
}

fn from_field(field: &str, value: &Value) -> Result<ControlCommand, RemoteError> {
    if !is_control_field(field) {
        return Err(RemoteError::UnknownPath(field.to_string()));
    }
    let mut cmd = ControlCommand::default();
    merge(&mut cmd, field, value)?;
    Ok(cmd)
}

fn is_control_field(name: &str) -> bool {
    name == Actuator::Pump.field() || name == Actuator::Canopy.field() || name == AUTO_MODE
}

fn merge(cmd: &mut ControlCommand, field: &str, value: &Value) -> Result<(), RemoteError> {
    let (slot, name): (&mut Option<bool>, &'static str) = if field == Actuator::Pump.field() {
        (&mut cmd.pump, "pump_state")
    } else if field == Actuator::Canopy.field() {
        (&mut cmd.canopy, "canopy_state")
    } else {
        (&mut cmd.auto_mode, AUTO_MODE)
    };
    *slot = Some(parse_flag(value).ok_or_else(|| RemoteError::BadValue {
        field: name,
        value: value.to_string(),
    })?);
    Ok(())
}

/// Accepts JSON booleans, `"ON"`/`"OFF"`, `"true"`/`"false"` and `0`/`1`.
pub fn parse_flag(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => match n.as_i64()? {
            0 => Some(false),
            1 => Some(true),
            _ => None,
        },
        Value::String(s) => match s.trim().to_ascii_uppercase().as_str() {
            "ON" | "TRUE" | "1" => Some(true),
            "OFF" | "FALSE" | "0" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Applying
// ---------------------------------------------------------------------------

/// Apply a command through the transition primitive. `source` names the
/// origin in transition reasons.
pub fn apply_command(
    control: &mut ControlState,
    cmd: ControlCommand,
    now_ms: u64,
    source: &str,
) -> CommandOutcome {
    let mut outcome = CommandOutcome::default();

    if let Some(on) = cmd.auto_mode {
        if control.auto_mode != on {
            control.auto_mode = on;
            outcome.auto_mode_changed = Some(on);
        }
    }

    for (actuator, desired) in [(Actuator::Pump, cmd.pump), (Actuator::Canopy, cmd.canopy)] {
        let Some(on) = desired else { continue };
        if let Some(event) = control.apply_actuator_target(actuator, on, now_ms) {
            outcome.transitions.push(Applied {
                event,
                reason: format!("{source}: {actuator} {}", on_off(on)),
            });
        }
    }

    outcome
}

/// Decode and apply one stream event. Malformed events are logged and
/// dropped.
pub fn consume(control: &mut ControlState, event: &StreamEvent, now_ms: u64) -> CommandOutcome {
    match parse_event(event) {
        Ok(cmd) => apply_command(control, cmd, now_ms, "remote command"),
        Err(e) => {
            warn!(path = %event.path, payload = %event.payload, "remote: discarding malformed command: {e}");
            CommandOutcome::default()
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn ev(path: &str, payload: &str) -> StreamEvent {
        StreamEvent {
            path: path.into(),
            payload: payload.into(),
        }
    }

    // -- parse_event: full object ---------------------------------------------

    #[test]
    fn full_object_sets_every_field() {
        let cmd = parse_event(&ev(
            "/",
            r#"{"pump_state":"ON","canopy_state":"OFF","auto_mode":false,"timestamp":"x"}"#,
        ))
        .unwrap();
        assert_eq!(
            cmd,
            ControlCommand {
                pump: Some(true),
                canopy: Some(false),
                auto_mode: Some(false)
            }
        );
    }

    #[test]
    fn partial_object_leaves_other_fields_alone() {
        let cmd = parse_event(&ev("/", r#"{"auto_mode": false}"#)).unwrap();
        assert_eq!(cmd.auto_mode, Some(false));
        assert_eq!(cmd.pump, None);
        assert_eq!(cmd.canopy, None);
    }

    #[test]
    fn object_with_bad_value_is_rejected() {
        let err = parse_event(&ev("/", r#"{"pump_state":"MAYBE"}"#)).unwrap_err();
        assert!(matches!(err, RemoteError::BadValue { field: "pump_state", .. }));
    }

    // -- parse_event: path suffix ---------------------------------------------

    #[test]
    fn suffix_with_json_string() {
        let cmd = parse_event(&ev("/pump_state", "\"OFF\"")).unwrap();
        assert_eq!(cmd.pump, Some(false));
    }

    #[test]
    fn suffix_with_bare_value() {
        let cmd = parse_event(&ev("/canopy_state", "ON")).unwrap();
        assert_eq!(cmd.canopy, Some(true));
    }

    #[test]
    fn suffix_with_bool() {
        let cmd = parse_event(&ev("/auto_mode", "true")).unwrap();
        assert_eq!(cmd.auto_mode, Some(true));
    }

    #[test]
    fn unknown_suffix_rejected() {
        assert_eq!(
            parse_event(&ev("/timestamp", "\"2024\"")),
            Err(RemoteError::UnknownPath("timestamp".into()))
        );
    }

    #[test]
    fn root_path_without_fields_is_empty() {
        assert_eq!(parse_event(&ev("/", "null")), Err(RemoteError::Empty));
        assert_eq!(parse_event(&ev("/", "{not json")), Err(RemoteError::Empty));
    }

    // -- apply_command --------------------------------------------------------

    #[test]
    fn remote_pump_on_emits_one_transition() {
        let mut c = ControlState::new(true);
        let out = apply_command(&mut c, ControlCommand { pump: Some(true), ..Default::default() }, 5, "remote command");
        assert_eq!(out.transitions.len(), 1);
        assert_eq!(out.transitions[0].reason, "remote command: pump ON");
        assert!(c.pump_on);
    }

    #[test]
    fn repeated_command_is_idempotent() {
        let mut c = ControlState::new(true);
        let cmd = ControlCommand {
            canopy: Some(true),
            auto_mode: Some(false),
            ..Default::default()
        };
        let first = apply_command(&mut c, cmd, 5, "remote command");
        assert_eq!(first.auto_mode_changed, Some(false));
        let second = apply_command(&mut c, cmd, 6, "remote command");
        assert_eq!(second, CommandOutcome::default());
    }

    #[test]
    fn malformed_event_changes_nothing() {
        let mut c = ControlState::new(true);
        let before = c;
        let out = consume(&mut c, &ev("/pump_state", "\"SIDEWAYS\""), 1);
        assert_eq!(out, CommandOutcome::default());
        assert_eq!(c, before);
    }

    #[test]
    fn parse_flag_variants() {
        assert_eq!(parse_flag(&Value::from("on")), Some(true));
        assert_eq!(parse_flag(&Value::from(" Off ")), Some(false));
        assert_eq!(parse_flag(&Value::from(1)), Some(true));
        assert_eq!(parse_flag(&Value::from(2)), None);
        assert_eq!(parse_flag(&Value::Null), None);
    }
}
