use serde_json::{Map, Value, json};
use tracing::{debug, info};

/// How a rule recognises a model name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelPattern {
    /// Case-sensitive whole-name match.
    Exact(&'static str),
    Prefix(&'static str),
    Contains(&'static str),
    /// Starts with the first part and contains the second somewhere after it.
    PrefixThen(&'static str, &'static str),
}

impl ModelPattern {
    pub fn matches(&self, model: &str) -> bool {
        let lower = model.to_ascii_lowercase();
        match *self {
            ModelPattern::Exact(name) => model == name,
            ModelPattern::Prefix(prefix) => lower.starts_with(prefix),
            ModelPattern::Contains(needle) => lower.contains(needle),
            ModelPattern::PrefixThen(prefix, needle) => lower
                .strip_prefix(prefix)
                .is_some_and(|rest| rest.contains(needle)),
        }
    }
}

/// Vendor "extended reasoning" request keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReasoningFlag {
    ThinkingMode,
    Reasoning,
    ChatTemplateKwargs,
    EnableThinking,
    Thinking,
}

impl ReasoningFlag {
    pub fn key(self) -> &'static str {
        match self {
            ReasoningFlag::ThinkingMode => "thinking_mode",
            ReasoningFlag::Reasoning => "reasoning",
            ReasoningFlag::ChatTemplateKwargs => "chat_template_kwargs",
            ReasoningFlag::EnableThinking => "enable_thinking",
            ReasoningFlag::Thinking => "thinking",
        }
    }

    pub fn value(self) -> Value {
        match self {
            ReasoningFlag::ThinkingMode | ReasoningFlag::Reasoning | ReasoningFlag::EnableThinking => {
                Value::Bool(true)
            }
            ReasoningFlag::ChatTemplateKwargs => json!({"enable_thinking": true}),
            ReasoningFlag::Thinking => json!({"type": "enabled"}),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct InjectRule {
    pub pattern: ModelPattern,
    pub flags: &'static [ReasoningFlag],
}

#[derive(Debug, Clone, Copy)]
pub struct StripRule {
    pub pattern: ModelPattern,
    pub flags: &'static [ReasoningFlag],
}

use ModelPattern::{Contains, Exact, Prefix, PrefixThen};
use ReasoningFlag::{ChatTemplateKwargs, EnableThinking, Reasoning, Thinking, ThinkingMode};

/// Ordered; the first match wins.
pub const INJECT_RULES: &[InjectRule] = &[
    InjectRule {
        pattern: Prefix("deepseek"),
        flags: &[ThinkingMode, Reasoning],
    },
    InjectRule {
        pattern: Exact("glm-5"),
        flags: &[ChatTemplateKwargs, EnableThinking, Thinking],
    },
    InjectRule {
        pattern: Exact("glm-4.7"),
        flags: &[ChatTemplateKwargs],
    },
    InjectRule {
        pattern: Prefix("glm-"),
        flags: &[ChatTemplateKwargs],
    },
    InjectRule {
        pattern: Prefix("kimi-k2.5"),
        flags: &[Thinking],
    },
    InjectRule {
        pattern: Contains("thinking"),
        flags: &[ThinkingMode],
    },
    InjectRule {
        pattern: Prefix("mimo-"),
        flags: &[Thinking],
    },
    InjectRule {
        pattern: Contains("claude"),
        flags: &[ChatTemplateKwargs],
    },
    InjectRule {
        pattern: Contains("sonnet-"),
        flags: &[ChatTemplateKwargs],
    },
    InjectRule {
        pattern: Contains("reasoning"),
        flags: &[Reasoning],
    },
];

/// Families that reject reasoning flags. Applied after injection.
pub const STRIP_RULES: &[StripRule] = &[StripRule {
    pattern: PrefixThen("qwen", "4b"),
    flags: &[ThinkingMode, Reasoning, ChatTemplateKwargs],
}];

/// The per-model request shaping table.
#[derive(Debug, Clone, Copy)]
pub struct ModelRules {
    inject: &'static [InjectRule],
    strip: &'static [StripRule],
}

impl Default for ModelRules {
    fn default() -> Self {
        Self {
            inject: INJECT_RULES,
            strip: STRIP_RULES,
        }
    }
}

impl ModelRules {
    pub fn new(inject: &'static [InjectRule], strip: &'static [StripRule]) -> Self {
        Self { inject, strip }
    }

    /// Inserts the first matching rule's flags where the caller did not set
    /// them, then removes flags the model family does not accept.
    pub fn apply(&self, model: &str, body: &mut Map<String, Value>) {
        if let Some(rule) = self.inject.iter().find(|rule| rule.pattern.matches(model)) {
            for flag in rule.flags {
                body.entry(flag.key()).or_insert_with(|| flag.value());
            }
            debug!(model = %model, flags = ?rule.flags, "reasoning flags applied");
        }
        for rule in self.strip.iter().filter(|rule| rule.pattern.matches(model)) {
            body.retain(|key, _| !rule.flags.iter().any(|flag| flag.key() == key));
        }
    }
}

/// The allow-list behind "unknown model → default model".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelCatalogue {
    known: Vec<String>,
    default_model: String,
}

impl ModelCatalogue {
    pub fn new(known: Vec<String>, default_model: impl Into<String>) -> Self {
        Self {
            known,
            default_model: default_model.into(),
        }
    }

    pub fn default_model(&self) -> &str {
        &self.default_model
    }

    pub fn contains(&self, model: &str) -> bool {
        self.known.iter().any(|known| known == model)
    }

    pub fn resolve(&self, requested: &str) -> String {
        if self.contains(requested) {
            return requested.to_string();
        }
        info!(
            requested = %requested,
            model = %self.default_model,
            "unknown model mapped to default"
        );
        self.default_model.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shaped(model: &str, body: Value) -> Value {
        let Value::Object(mut map) = body else {
            panic!("object expected");
        };
        ModelRules::default().apply(model, &mut map);
        Value::Object(map)
    }

    #[test]
    fn glm5_gets_all_three_flags() {
        assert_eq!(
            shaped("glm-5", json!({})),
            json!({
                "chat_template_kwargs": {"enable_thinking": true},
                "enable_thinking": true,
                "thinking": {"type": "enabled"}
            })
        );
    }

    #[test]
    fn exact_rules_are_case_sensitive() {
        // Falls through to the glm- prefix rule.
        assert_eq!(
            shaped("GLM-5", json!({})),
            json!({"chat_template_kwargs": {"enable_thinking": true}})
        );
    }

    #[test]
    fn caller_values_win() {
        assert_eq!(
            shaped("deepseek-v3.2-chat", json!({"reasoning": false})),
            json!({"reasoning": false, "thinking_mode": true})
        );
    }

    #[test]
    fn first_match_wins() {
        assert_eq!(
            shaped("kimi-k2-thinking", json!({})),
            json!({"thinking_mode": true})
        );
        assert_eq!(
            shaped("kimi-k2.5", json!({})),
            json!({"thinking": {"type": "enabled"}})
        );
    }

    #[test]
    fn small_qwen_models_lose_reasoning_flags() {
        assert_eq!(
            shaped(
                "Qwen3-4B-thinking",
                json!({"reasoning": true, "chat_template_kwargs": {}, "top_p": 1})
            ),
            json!({"top_p": 1})
        );
        assert_eq!(
            shaped("qwen3-coder-plus", json!({"reasoning": true})),
            json!({"reasoning": true})
        );
    }

    #[test]
    fn unknown_models_fall_back() {
        let catalogue = ModelCatalogue::new(vec!["glm-5".into(), "kimi-k2".into()], "glm-5");
        assert_eq!(catalogue.resolve("kimi-k2"), "kimi-k2");
        assert_eq!(catalogue.resolve("claude-x"), "glm-5");
        assert_eq!(catalogue.resolve(""), "glm-5");
    }
}
