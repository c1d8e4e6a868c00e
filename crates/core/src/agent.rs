//! Read-only agent configuration record
//!
//! Agent definitions are managed elsewhere; a session takes an immutable
//! snapshot of one record at `agent_config` time and derives the LLM
//! system prompt from it.

use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Agent configuration snapshot, immutable for the session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentProfile {
    pub id: String,
    pub name: String,
    /// TTS voice identifier.
    pub voice: String,
    /// Speaking speed multiplier.
    #[serde(default = "default_speed")]
    pub speed: f32,
    /// Initial greeting spoken when the agent is selected. Empty = none.
    #[serde(default)]
    pub greeting: String,
    #[serde(default)]
    pub system_prompt: String,
    /// Tone preset, e.g. "professional" or "chatty".
    #[serde(default)]
    pub tone: String,
    /// LLM model identifier passed through to the provider.
    #[serde(default)]
    pub llm_model: String,
    /// Optional knowledge text injected into the system prompt.
    #[serde(default)]
    pub knowledge: String,
    /// Restrict answers to the knowledge text.
    #[serde(default)]
    pub guardrails_enabled: bool,
    /// Inject the current date/time into the system prompt.
    #[serde(default)]
    pub current_date_enabled: bool,
    /// Inject caller transport info into the system prompt.
    #[serde(default)]
    pub caller_info_enabled: bool,
    /// IANA timezone name for the dynamic clock, e.g. "America/Los_Angeles".
    #[serde(default)]
    pub timezone: String,
}

fn default_speed() -> f32 {
    1.0
}

impl Default for AgentProfile {
    fn default() -> Self {
        Self {
            id: String::new(),
            name: "Assistant".to_string(),
            voice: String::new(),
            speed: 1.0,
            greeting: String::new(),
            system_prompt: "You are a conversational voice assistant. Be concise and natural."
                .to_string(),
            tone: "professional".to_string(),
            llm_model: String::new(),
            knowledge: String::new(),
            guardrails_enabled: false,
            current_date_enabled: true,
            caller_info_enabled: false,
            timezone: "UTC".to_string(),
        }
    }
}

impl AgentProfile {
    /// Assemble the full system prompt for a generation request.
    ///
    /// `caller_info` is transport metadata (e.g. remote address) included
    /// only when the profile enables it.
    pub fn build_system_prompt(&self, caller_info: Option<&str>) -> String {
        let mut prompt = if self.system_prompt.is_empty() {
            "You are a conversational voice assistant. Be concise and natural.".to_string()
        } else {
            self.system_prompt.clone()
        };

        if !self.tone.is_empty() {
            prompt.push_str(&format!(
                "\nKeep a {} tone. Responses are spoken aloud, so keep them brief.",
                self.tone
            ));
        }

        if !self.knowledge.is_empty() {
            prompt.push_str("\n\nReference knowledge:\n");
            prompt.push_str(&self.knowledge);
            if self.guardrails_enabled {
                prompt.push_str(
                    "\nOnly answer using the reference knowledge above. If the answer is \
                     not covered there, say you don't know.",
                );
            }
        }

        if self.current_date_enabled {
            prompt.push_str(&format!("\n\nCurrent date and time: {}.", self.local_now()));
        }

        if self.caller_info_enabled {
            if let Some(info) = caller_info {
                prompt.push_str(&format!("\nCaller: {info}."));
            }
        }

        prompt
    }

    /// Now, formatted in the agent's timezone.
    ///
    /// Accepts IANA names ("America/Los_Angeles") and the display format
    /// agent records carry natively, "(GMT-08:00) Pacific Time (US &
    /// Canada)", which resolves to a fixed offset. Anything else falls
    /// back to UTC.
    fn local_now(&self) -> String {
        if let Ok(tz) = self.timezone.parse::<chrono_tz::Tz>() {
            return Utc::now()
                .with_timezone(&tz)
                .format("%A, %B %e %Y, %H:%M %Z")
                .to_string();
        }
        if let Some(offset) = parse_gmt_offset(&self.timezone) {
            return Utc::now()
                .with_timezone(&offset)
                .format("%A, %B %e %Y, %H:%M GMT%:z")
                .to_string();
        }
        Utc::now().format("%A, %B %e %Y, %H:%M UTC").to_string()
    }
}

/// Parse the leading "(GMT±HH:MM)" of a display-format timezone into a
/// fixed offset. The label after the parenthesis is ignored; these
/// strings carry no DST rule.
fn parse_gmt_offset(timezone: &str) -> Option<chrono::FixedOffset> {
    let rest = timezone.strip_prefix("(GMT")?;
    let (offset, _) = rest.split_once(')')?;
    let sign = match offset.chars().next()? {
        '+' => 1,
        '-' => -1,
        _ => return None,
    };
    let (hours, minutes) = offset[1..].split_once(':')?;
    let hours: i32 = hours.parse().ok()?;
    let minutes: i32 = minutes.parse().ok()?;
    if hours > 14 || minutes > 59 {
        return None;
    }
    chrono::FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
}
