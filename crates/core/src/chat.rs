//! Messaging-channel commands: parsing, allow-list checks, and reply text.

use tracing::info;

use crate::error::LinkError;
use crate::link::{ChatMessage, Messaging};
use crate::remote::ControlCommand;
use crate::state::{on_off, Actuator, Context};

pub const HELP_TEXT: &str = "Smart irrigation controller commands:\n\
/status - system status\n\
/sensors - latest sensor readings\n\
/help - this help\n\
/pump on|off|status - pump control\n\
/canopy on|off|status - canopy control\n\
/auto on|off|status - automatic mode";

pub const REFUSED_TEXT: &str = "You are not allowed to control this system.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    On,
    Off,
    Status,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatCommand {
    Start,
    Help,
    Status,
    Sensors,
    Actuator(Actuator, Option<Action>),
    Auto(Option<Action>),
    Unknown(String),
}

/// What to do in response to one command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatAction {
    pub reply: String,
    pub command: Option<ControlCommand>,
}

impl ChatAction {
    fn reply(text: impl Into<String>) -> Self {
        Self {
            reply: text.into(),
            command: None,
        }
    }
}

/// Figures the status reply needs beyond the shared context.
#[derive(Debug, Clone)]
pub struct StatusFacts {
    pub uptime_secs: u64,
    pub local_time: String,
    pub buffered: usize,
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// `None` for plain text. A `@botname` suffix on the verb is ignored.
pub fn parse_command(text: &str) -> Option<ChatCommand> {
    let text = text.trim();
    if !text.starts_with('/') {
        return None;
    }
    let mut words = text.split_whitespace();
    let verb = words.next()?.split('@').next().unwrap_or("").to_ascii_lowercase();
    let action = words.next().map(|a| match a.to_ascii_lowercase().as_str() {
        "on" => Some(Action::On),
        "off" => Some(Action::Off),
        "status" => Some(Action::Status),
        _ => None,
    });
    // Missing action and unrecognised action are both invalid.
    let action = action.flatten();

    Some(match verb.as_str() {
        "/start" => ChatCommand::Start,
        "/help" => ChatCommand::Help,
        "/status" => ChatCommand::Status,
        "/sensors" => ChatCommand::Sensors,
        "/pump" => ChatCommand::Actuator(Actuator::Pump, action),
        "/canopy" => ChatCommand::Actuator(Actuator::Canopy, action),
        "/auto" => ChatCommand::Auto(action),
        _ => ChatCommand::Unknown(text.to_string()),
    })
}

pub fn is_authorized(allowed: &[String], chat_id: &str) -> bool {
    allowed.iter().any(|a| a == chat_id)
}

// ---------------------------------------------------------------------------
// Responses
// ---------------------------------------------------------------------------

pub fn respond(cmd: &ChatCommand, ctx: &Context, facts: &StatusFacts) -> ChatAction {
    match cmd {
        ChatCommand::Start => ChatAction::reply(format!(
            "Welcome to the smart irrigation controller.\n{HELP_TEXT}"
        )),
        ChatCommand::Help => ChatAction::reply(HELP_TEXT),
        ChatCommand::Status => ChatAction::reply(status_text(ctx, facts)),
        ChatCommand::Sensors => ChatAction::reply(sensors_text(ctx)),
        ChatCommand::Actuator(actuator, action) => actuator_action(*actuator, *action, ctx),
        ChatCommand::Auto(action) => auto_action(*action, ctx),
        ChatCommand::Unknown(_) => {
            ChatAction::reply("Unknown command. Use /help to list the available commands.")
        }
    }
}

pub fn greeting(from: &str) -> String {
    format!("Hello {from}! Type /help to see the commands.")
}

fn actuator_action(actuator: Actuator, action: Option<Action>, ctx: &Context) -> ChatAction {
    let set = |on: bool| {
        let mut command = ControlCommand::default();
        match actuator {
            Actuator::Pump => command.pump = Some(on),
            Actuator::Canopy => command.canopy = Some(on),
        }
        ChatAction {
            reply: format!("{actuator} turned {}", on_off(on)),
            command: Some(command),
        }
    };
    match action {
        Some(Action::On) => set(true),
        Some(Action::Off) => set(false),
        Some(Action::Status) => ChatAction::reply(format!(
            "{actuator} is {}",
            on_off(ctx.control.is_on(actuator))
        )),
        None => ChatAction::reply(format!(
            "Invalid {actuator} command. Use /{actuator} on, /{actuator} off or /{actuator} status."
        )),
    }
}

fn auto_action(action: Option<Action>, ctx: &Context) -> ChatAction {
    let set = |on: bool| ChatAction {
        reply: format!("automatic mode turned {}", on_off(on)),
        command: Some(ControlCommand {
            auto_mode: Some(on),
            ..ControlCommand::default()
        }),
    };
    match action {
        Some(Action::On) => set(true),
        Some(Action::Off) => set(false),
        Some(Action::Status) => ChatAction::reply(format!(
            "automatic mode is {}",
            on_off(ctx.control.auto_mode)
        )),
        None => ChatAction::reply("Invalid auto command. Use /auto on, /auto off or /auto status."),
    }
}

pub fn status_text(ctx: &Context, facts: &StatusFacts) -> String {
    let connected = |up: bool| if up { "connected" } else { "disconnected" };
    format!(
        "System status\n\
         time: {}\n\
         uptime: {}h {}m\n\
         network: {}\n\
         backend: {}\n\
         buffered records: {}\n\
         pump: {}\n\
         canopy: {}\n\
         auto mode: {}",
        facts.local_time,
        facts.uptime_secs / 3600,
        (facts.uptime_secs % 3600) / 60,
        connected(ctx.link.network),
        connected(ctx.link.backend),
        facts.buffered,
        on_off(ctx.control.pump_on),
        on_off(ctx.control.canopy_on),
        on_off(ctx.control.auto_mode),
    )
}

pub fn sensors_text(ctx: &Context) -> String {
    let r = &ctx.sensors.latest;
    let mut text = format!(
        "Sensor readings\n\
         temperature: {:.1}°C\n\
         humidity: {:.1}%\n\
         soil moisture: {}\n\
         light: {:.0} lux\n\
         rain: {}",
        r.temperature,
        r.humidity,
        r.soil_moisture,
        r.light_level,
        if r.rain_detected { "yes" } else { "no" },
    );
    if ctx.sensors.error {
        text.push_str("\n(last reading failed validation)");
    }
    text
}

// ---------------------------------------------------------------------------
// Inbox
// ---------------------------------------------------------------------------

/// Tracks the update offset. The first successful poll only skips whatever
/// backlog was pending when the controller started.
#[derive(Debug, Default)]
pub struct ChatInbox {
    next_update: i64,
    primed: bool,
}

impl ChatInbox {
    pub async fn fetch<M: Messaging>(&mut self, messaging: &mut M) -> Result<Vec<ChatMessage>, LinkError> {
        let updates = messaging.poll_updates(self.next_update).await?;
        if let Some(last) = updates.iter().map(|u| u.update_id).max() {
            self.next_update = last + 1;
        }
        if !self.primed {
            self.primed = true;
            if !updates.is_empty() {
                info!(skipped = updates.len(), next = self.next_update, "chat: skipping old messages");
            }
            return Ok(Vec::new());
        }
        Ok(updates.into_iter().filter(|u| !u.text.is_empty()).collect())
    }
}

// ===========================================================================
// Tests
// ===========================================================================
