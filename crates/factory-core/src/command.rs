//! Command/response schema and structural validation (§4.8, §6.3, §6.4).
//!
//! This module only validates shape: is the action known, are its required
//! params present and well-typed, does the path point exist. Validation that
//! depends on live device state — faulted AGV, wrong corridor, full buffer —
//! happens once a command reaches its target AGV, in
//! [`crate::line::Line::dispatch_command`].

use crate::error::CommandError;
use crate::fixed::Fixed64;
use crate::id::{AgvId, LineId, PathPoint};
use crate::registry::DEFAULT_CHARGE_TARGET_PCT;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandAction {
    Move,
    Charge,
    Load,
    Unload,
    GetResult,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct CommandParams {
    #[serde(default)]
    pub target_point: Option<String>,
    #[serde(default)]
    pub target_level: Option<f64>,
    #[serde(default)]
    pub product_id: Option<String>,
}

/// Raw inbound command, shaped per §6.3. Unknown fields in `params` are
/// ignored by construction (we only ever read the three named ones).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Command {
    #[serde(default)]
    pub command_id: Option<String>,
    pub action: CommandAction,
    #[serde(default)]
    pub target: Option<AgvId>,
    #[serde(default)]
    pub params: CommandParams,
}

/// Response schema, §6.4.
#[derive(Debug, Clone, Serialize)]
pub struct CommandResponse {
    pub timestamp: f64,
    pub command_id: Option<String>,
    pub response: String,
}

impl CommandResponse {
    pub fn new(now: Fixed64, command_id: Option<String>, response: impl Into<String>) -> Self {
        Self {
            timestamp: now.to_num::<f64>(),
            command_id,
            response: response.into(),
        }
    }
}

/// The concrete action a validated command resolves to.
#[derive(Debug, Clone)]
pub enum Intent {
    Move { target: PathPoint },
    Charge { target_level: Fixed64 },
    Load { product_id: Option<String> },
    Unload,
    GetResult,
}

/// A structurally sound command, resolved to its target AGV (`None` only for
/// `get_result`, which is not queued to an AGV at all).
#[derive(Debug, Clone)]
pub struct ValidatedCommand {
    pub command_id: Option<String>,
    pub line: LineId,
    pub agv: Option<AgvId>,
    pub intent: Intent,
}

/// Validates `command` against the §6.3 schema.
pub fn validate(line: LineId, command: &Command) -> Result<ValidatedCommand, CommandError> {
    let intent = match command.action {
        CommandAction::Move => {
            let raw = command.params.target_point.as_deref().ok_or_else(|| {
                CommandError::Malformed("move requires params.target_point".to_string())
            })?;
            let target = PathPoint::parse(raw).ok_or_else(|| CommandError::InvalidPathPoint(raw.to_string()))?;
            Intent::Move { target }
        }
        CommandAction::Charge => {
            let level = command.params.target_level.unwrap_or(DEFAULT_CHARGE_TARGET_PCT);
            if !(0.0..=100.0).contains(&level) {
                return Err(CommandError::InvalidChargeTarget);
            }
            Intent::Charge {
                target_level: Fixed64::from_num(level),
            }
        }
        CommandAction::Load => Intent::Load {
            product_id: command.params.product_id.clone(),
        },
        CommandAction::Unload => Intent::Unload,
        CommandAction::GetResult => Intent::GetResult,
    };

    let agv = if matches!(command.action, CommandAction::GetResult) {
        None
    } else {
        Some(
            command
                .target
                .ok_or_else(|| CommandError::Malformed("missing target AGV".to_string()))?,
        )
    };

    Ok(ValidatedCommand {
        command_id: command.command_id.clone(),
        line,
        agv,
        intent,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn move_requires_target_point() {
        let cmd = Command {
            command_id: None,
            action: CommandAction::Move,
            target: Some(AgvId::Agv1),
            params: CommandParams::default(),
        };
        assert!(validate(LineId::Line1, &cmd).is_err());
    }

    #[test]
    fn charge_defaults_to_80_percent() {
        let cmd = Command {
            command_id: Some("c1".to_string()),
            action: CommandAction::Charge,
            target: Some(AgvId::Agv1),
            params: CommandParams::default(),
        };
        let validated = validate(LineId::Line1, &cmd).unwrap();
        assert!(matches!(
            validated.intent,
            Intent::Charge { target_level } if target_level == Fixed64::from_num(DEFAULT_CHARGE_TARGET_PCT)
        ));
    }

    #[test]
    fn get_result_has_no_agv_target() {
        let cmd = Command {
            command_id: None,
            action: CommandAction::GetResult,
            target: None,
            params: CommandParams::default(),
        };
        let validated = validate(LineId::Line1, &cmd).unwrap();
        assert!(validated.agv.is_none());
    }

    #[test]
    fn invalid_path_point_is_rejected() {
        let cmd = Command {
            command_id: None,
            action: CommandAction::Move,
            target: Some(AgvId::Agv1),
            params: CommandParams {
                target_point: Some("P99".to_string()),
                ..Default::default()
            },
        };
        assert!(validate(LineId::Line1, &cmd).is_err());
    }
}
