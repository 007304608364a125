//! Template trigger matching with cooldowns and once-flags (§4.7).

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use chrono::{Datelike, Timelike, Utc};
use iris_core::config::{AutoReplyTemplateConfig, AutoReplyTrigger};
use iris_core::types::Chat;
use regex::RegexBuilder;

use crate::error::{Result, SecurityError};

struct CompiledTemplate {
    config: AutoReplyTemplateConfig,
    regex: Option<regex::Regex>,
}

pub struct MatchContext<'a> {
    pub channel_id: &'a str,
    pub chat_type: Chat,
    pub sender_id: &'a str,
    pub sender_name: &'a str,
    pub text: &'a str,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AutoReplyMatch {
    pub response: String,
    pub forward_to_ai: bool,
}

#[derive(Default)]
struct FireState {
    last_fired: Option<Instant>,
    fired_once: bool,
}

/// Templates sorted by descending priority; the first matching one wins.
pub struct AutoReplyEngine {
    templates: Vec<CompiledTemplate>,
    state: Mutex<HashMap<(String, String), FireState>>,
}

impl AutoReplyEngine {
    pub fn new(mut templates: Vec<AutoReplyTemplateConfig>) -> Result<Self> {
        templates.sort_by(|a, b| b.priority.cmp(&a.priority));
        let compiled = templates
            .into_iter()
            .map(|config| {
                let regex = match &config.trigger {
                    AutoReplyTrigger::Regex { pattern } => Some(
                        RegexBuilder::new(pattern)
                            .case_insensitive(true)
                            .build()
                            .map_err(|e| SecurityError::InvalidTrigger(e.to_string()))?,
                    ),
                    _ => None,
                };
                Ok(CompiledTemplate { config, regex })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { templates: compiled, state: Mutex::new(HashMap::new()) })
    }

    pub fn match_message(&self, ctx: &MatchContext) -> Option<AutoReplyMatch> {
        for template in &self.templates {
            if !channel_allowed(&template.config, ctx.channel_id) {
                continue;
            }
            if !chat_type_allowed(&template.config, ctx.chat_type) {
                continue;
            }
            if !trigger_matches(template, ctx.text) {
                continue;
            }
            if !self.cooldown_ok(&template.config, ctx.sender_id) {
                continue;
            }
            self.record_fire(&template.config, ctx.sender_id);
            return Some(AutoReplyMatch {
                response: substitute_placeholders(&template.config.response, ctx),
                forward_to_ai: template.config.forward_to_ai,
            });
        }
        None
    }

    fn cooldown_ok(&self, config: &AutoReplyTemplateConfig, sender_id: &str) -> bool {
        let state = self.state.lock().unwrap();
        let Some(fire) = state.get(&(config.name.clone(), sender_id.to_string())) else { return true };
        if config.once && fire.fired_once {
            return false;
        }
        if let (Some(cooldown_ms), Some(last_fired)) = (config.cooldown_ms, fire.last_fired) {
            if last_fired.elapsed() < Duration::from_millis(cooldown_ms) {
                return false;
            }
        }
        true
    }

    fn record_fire(&self, config: &AutoReplyTemplateConfig, sender_id: &str) {
        let mut state = self.state.lock().unwrap();
        let entry = state.entry((config.name.clone(), sender_id.to_string())).or_default();
        entry.last_fired = Some(Instant::now());
        entry.fired_once = true;
    }
}

fn channel_allowed(config: &AutoReplyTemplateConfig, channel_id: &str) -> bool {
    match &config.channels {
        None => true,
        Some(list) => list.iter().any(|c| c == channel_id),
    }
}

fn chat_type_allowed(config: &AutoReplyTemplateConfig, chat_type: Chat) -> bool {
    match &config.chat_types {
        None => true,
        Some(list) => list.iter().any(|c| c.eq_ignore_ascii_case(&chat_type.to_string())),
    }
}

fn trigger_matches(template: &CompiledTemplate, text: &str) -> bool {
    match &template.config.trigger {
        AutoReplyTrigger::Exact { text: expected } => {
            text.trim().eq_ignore_ascii_case(expected.trim())
        }
        AutoReplyTrigger::Regex { .. } => {
            template.regex.as_ref().map(|re| re.is_match(text)).unwrap_or(false)
        }
        AutoReplyTrigger::Keyword { any_of } => {
            let lower = text.to_lowercase();
            any_of.iter().any(|k| lower.contains(&k.to_lowercase()))
        }
        AutoReplyTrigger::Command { name } => {
            let trimmed = text.trim();
            let prefix = format!("/{name}");
            trimmed.len() >= prefix.len()
                && trimmed[..prefix.len()].eq_ignore_ascii_case(&prefix)
        }
        AutoReplyTrigger::Schedule { start_hour, end_hour, days_of_week } => {
            let now = Utc::now();
            let hour = now.hour() as u8;
            let weekday = now.weekday().num_days_from_sunday() as u8;
            let in_hours = if start_hour <= end_hour {
                hour >= *start_hour && hour < *end_hour
            } else {
                hour >= *start_hour || hour < *end_hour
            };
            in_hours && (days_of_week.is_empty() || days_of_week.contains(&weekday))
        }
    }
}

fn substitute_placeholders(template: &str, ctx: &MatchContext) -> String {
    let now = Utc::now();
    template
        .replace("{sender.name}", ctx.sender_name)
        .replace("{sender.id}", ctx.sender_id)
        .replace("{channel}", ctx.channel_id)
        .replace("{time}", &now.format("%H:%M:%S").to_string())
        .replace("{date}", &now.format("%Y-%m-%d").to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn template(name: &str, priority: i32, trigger: AutoReplyTrigger, response: &str) -> AutoReplyTemplateConfig {
        AutoReplyTemplateConfig {
            name: name.to_string(),
            priority,
            trigger,
            response: response.to_string(),
            channels: None,
            chat_types: None,
            cooldown_ms: None,
            once: false,
            forward_to_ai: false,
        }
    }

    fn ctx<'a>(text: &'a str) -> MatchContext<'a> {
        MatchContext {
            channel_id: "telegram",
            chat_type: Chat::Dm,
            sender_id: "u1",
            sender_name: "Alice",
            text,
        }
    }

    #[test]
    fn exact_trigger_is_case_insensitive_and_trimmed() {
        let engine = AutoReplyEngine::new(vec![template(
            "hi",
            0,
            AutoReplyTrigger::Exact { text: "hello".to_string() },
            "hi {sender.name}",
        )])
        .unwrap();
        let m = engine.match_message(&ctx("  HELLO  ")).unwrap();
        assert_eq!(m.response, "hi Alice");
    }

    #[test]
    fn higher_priority_template_wins() {
        let engine = AutoReplyEngine::new(vec![
            template("low", 0, AutoReplyTrigger::Keyword { any_of: vec!["hi".into()] }, "low"),
            template("high", 10, AutoReplyTrigger::Keyword { any_of: vec!["hi".into()] }, "high"),
        ])
        .unwrap();
        let m = engine.match_message(&ctx("hi there")).unwrap();
        assert_eq!(m.response, "high");
    }

    #[test]
    fn once_flag_fires_only_once_per_sender() {
        let mut t = template("once", 0, AutoReplyTrigger::Keyword { any_of: vec!["hi".into()] }, "hi");
        t.once = true;
        let engine = AutoReplyEngine::new(vec![t]).unwrap();
        assert!(engine.match_message(&ctx("hi")).is_some());
        assert!(engine.match_message(&ctx("hi")).is_none());
    }

    #[test]
    fn command_trigger_requires_slash_prefix() {
        let engine = AutoReplyEngine::new(vec![template(
            "help",
            0,
            AutoReplyTrigger::Command { name: "help".to_string() },
            "usage...",
        )])
        .unwrap();
        assert!(engine.match_message(&ctx("/help")).is_some());
        assert!(engine.match_message(&ctx("help")).is_none());
    }

    #[test]
    fn channel_filter_excludes_other_channels() {
        let mut t = template("x", 0, AutoReplyTrigger::Keyword { any_of: vec!["hi".into()] }, "hi");
        t.channels = Some(vec!["discord".to_string()]);
        let engine = AutoReplyEngine::new(vec![t]).unwrap();
        assert!(engine.match_message(&ctx("hi")).is_none());
    }
}
