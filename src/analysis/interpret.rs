//! Feature tags to readings, through a remote language model or the local table.
//!
//! The mode is resolved once per request. A remote failure of any kind (transport, timeout,
//! malformed or incomplete reply) drops the whole request to the local table, so a response
//! never mixes remote and local readings.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::analysis::features::{FeatureTag, LineFeature};
use crate::analysis::llm::LanguageModel;
use crate::config::InterpretationConfig;
use crate::core::store::DataId;
use crate::models::LineKind;

/// Label used for lines that were not detected.
pub const NOT_DETECTED: &str = "not detected";

const SYSTEM_PROMPT: &str = "You are a helpful assistant that outputs JSON only.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterpretationMode {
    Remote,
    Local,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineReading {
    pub feature: String,
    /// `None` only for the not-detected sentinel
    pub reading: Option<String>,
}

impl LineReading {
    pub fn not_detected() -> Self {
        Self {
            feature: NOT_DETECTED.to_string(),
            reading: None,
        }
    }

    pub fn is_not_detected(&self) -> bool {
        self.reading.is_none()
    }
}

/// All three identities, always present.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandReading {
    pub life_line: LineReading,
    pub heart_line: LineReading,
    pub head_line: LineReading,
    pub mode: InterpretationMode,
}

impl HandReading {
    fn from_fn(mode: InterpretationMode, mut f: impl FnMut(LineKind) -> LineReading) -> Self {
        Self {
            life_line: f(LineKind::Life),
            heart_line: f(LineKind::Heart),
            head_line: f(LineKind::Head),
            mode,
        }
    }

    pub fn get(&self, kind: LineKind) -> &LineReading {
        match kind {
            LineKind::Life => &self.life_line,
            LineKind::Heart => &self.heart_line,
            LineKind::Head => &self.head_line,
        }
    }
}

/// Tracks remote health and decides the mode for each request.
pub struct ModeResolver {
    remote_configured: bool,
    cooldown: Duration,
    last_failure: Mutex<Option<Instant>>,
}

impl ModeResolver {
    pub fn new(remote_configured: bool, cooldown: Duration) -> Self {
        Self {
            remote_configured,
            cooldown,
            last_failure: Mutex::new(None),
        }
    }

    /// Remote if configured and either healthy or past the failure cool-down.
    pub fn resolve(&self) -> InterpretationMode {
        if !self.remote_configured {
            return InterpretationMode::Local;
        }
        let last_failure = *self.last_failure.lock().unwrap_or_else(|e| e.into_inner());
        match last_failure {
            Some(at) if at.elapsed() < self.cooldown => InterpretationMode::Local,
            _ => InterpretationMode::Remote,
        }
    }

    pub fn mark_failed(&self) {
        *self.last_failure.lock().unwrap_or_else(|e| e.into_inner()) = Some(Instant::now());
    }

    pub fn mark_healthy(&self) {
        *self.last_failure.lock().unwrap_or_else(|e| e.into_inner()) = None;
    }
}

pub struct InterpretationEngine<M> {
    model: Option<M>,
    resolver: ModeResolver,
    timeout: Duration,
}

impl<M: LanguageModel> InterpretationEngine<M> {
    pub fn new(model: Option<M>, config: &InterpretationConfig) -> Self {
        let resolver = ModeResolver::new(model.is_some(), config.remote_cooldown());
        Self {
            model,
            resolver,
            timeout: config.remote_timeout(),
        }
    }

    /// Local-only engine.
    pub fn local(config: &InterpretationConfig) -> Self {
        Self::new(None, config)
    }

    pub fn resolver(&self) -> &ModeResolver {
        &self.resolver
    }

    pub async fn interpret(&self, data_id: &DataId, features: &[LineFeature]) -> HandReading {
        let any_detected = features.iter().any(LineFeature::is_detected);

        if let (InterpretationMode::Remote, Some(model), true) =
            (self.resolver.resolve(), &self.model, any_detected)
        {
            match self.interpret_remote(model, data_id, features).await {
                Ok(reading) => {
                    self.resolver.mark_healthy();
                    return reading;
                }
                Err(e) => {
                    warn!("Remote interpretation for {} failed, using local table: {:#}", data_id, e);
                    self.resolver.mark_failed();
                }
            }
        }

        interpret_local(features)
    }

    async fn interpret_remote(
        &self,
        model: &M,
        data_id: &DataId,
        features: &[LineFeature],
    ) -> Result<HandReading> {
        let prompt = build_prompt(data_id, features);
        let reply = tokio::time::timeout(self.timeout, model.complete(SYSTEM_PROMPT, &prompt))
            .await
            .with_context(|| format!("No reply within {:?}", self.timeout))??;
        debug!("Remote reply for {}: {} bytes", data_id, reply.len());

        let reading = parse_reply(&reply, features)?;
        info!("Interpreted {} remotely", data_id);
        Ok(reading)
    }
}

fn feature_for(features: &[LineFeature], kind: LineKind) -> Option<&LineFeature> {
    features.iter().find(|f| f.kind == kind && f.is_detected())
}

fn display_name(kind: LineKind) -> &'static str {
    match kind {
        LineKind::Life => "Life line",
        LineKind::Heart => "Heart line",
        LineKind::Head => "Head line",
    }
}

/// One section per detected line, plus the required JSON shape.
pub fn build_prompt(data_id: &DataId, features: &[LineFeature]) -> String {
    let mut sections = String::new();
    let mut shape = Vec::new();
    for kind in LineKind::ALL {
        match feature_for(features, kind) {
            Some(f) => {
                sections.push_str(&format!(
                    "{} ({}): {}; {}\n",
                    display_name(kind),
                    kind.key(),
                    f.tag,
                    f.summary()
                ));
                shape.push(format!(
                    "  \"{}\": {{\"feature\": \"short label, 2-5 words\", \"reading\": \"detailed reading\"}}",
                    kind.key()
                ));
            }
            None => sections.push_str(&format!(
                "{} ({}): not detected, do not interpret it\n",
                display_name(kind),
                kind.key()
            )),
        }
    }

    format!(
        "You are a palm reading master steeped in traditional palmistry. \
Give a detailed reading of personality and fortune from the palm line features below.\n\n\
[Hand {}]\n{}\n\
[Output]\n\
1. Tone: professional, mysterious, thoughtful and positive.\n\
2. Return strictly valid JSON with no Markdown fences.\n\
3. Use exactly this structure:\n{{\n{}\n}}\n",
        data_id,
        sections,
        shape.join(",\n")
    )
}

#[derive(Debug, Deserialize)]
struct RemoteEntry {
    feature: String,
    reading: String,
}

/// Remove a surrounding ```json fence, if any.
fn strip_fence(reply: &str) -> &str {
    let trimmed = reply.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

/// Every detected line needs a non-empty entry; not-detected lines ignore the reply.
pub fn parse_reply(reply: &str, features: &[LineFeature]) -> Result<HandReading> {
    let entries: HashMap<String, RemoteEntry> =
        serde_json::from_str(strip_fence(reply)).context("Reply is not the expected JSON")?;

    let mut readings = HashMap::new();
    for kind in LineKind::ALL {
        let reading = match feature_for(features, kind) {
            None => LineReading::not_detected(),
            Some(_) => {
                let entry = entries
                    .get(kind.key())
                    .with_context(|| format!("Reply has no entry for {}", kind))?;
                if entry.feature.trim().is_empty() || entry.reading.trim().is_empty() {
                    anyhow::bail!("Reply entry for {} is empty", kind);
                }
                LineReading {
                    feature: entry.feature.trim().to_string(),
                    reading: Some(entry.reading.trim().to_string()),
                }
            }
        };
        readings.insert(kind, reading);
    }

    Ok(HandReading::from_fn(InterpretationMode::Remote, |kind| {
        readings.remove(&kind).unwrap_or_else(LineReading::not_detected)
    }))
}

/// Table lookup; never fails.
pub fn interpret_local(features: &[LineFeature]) -> HandReading {
    HandReading::from_fn(InterpretationMode::Local, |kind| {
        let tag = feature_for(features, kind)
            .map(|f| f.tag)
            .unwrap_or(FeatureTag::NotDetected);
        local_reading(kind, tag)
    })
}

pub fn local_reading(kind: LineKind, tag: FeatureTag) -> LineReading {
    use FeatureTag::*;
    use LineKind::*;

    let (feature, reading) = match (kind, tag) {
        (_, NotDetected) => return LineReading::not_detected(),

        (Life, LongForked) => (
            "Long, forked",
            "Abundant vitality that branches into more than one path. A life of change and travel, with the stamina to carry it.",
        ),
        (Life, ShortForked) => (
            "Short, forked",
            "Energy comes in bursts and is split between several pursuits. Pace yourself and choose where to spend it.",
        ),
        (Life, LongBroken) => (
            "Long, broken",
            "Strong constitution with a marked turning point. A period of change leads to a renewed and steadier rhythm.",
        ),
        (Life, ShortBroken) => (
            "Short, broken",
            "Energy runs in phases. Balance work and rest and avoid overdrawing your reserves.",
        ),
        (Life, LongCurved) => (
            "Deep and sweeping",
            "Full of vigour and warmth. An outgoing, sociable nature that meets life with enthusiasm.",
        ),
        (Life, LongUnbroken) => (
            "Deep and long",
            "Robust vitality and good resilience. A steady, enduring life force.",
        ),
        (Life, ShortCurved) => (
            "Short, rounded",
            "Cheerful and lively, though energy is best spent in measured doses.",
        ),
        (Life, ShortUnbroken) => (
            "Short and straight",
            "Reserved and calm. Careful in action and fond of a quiet, stable life. Mind the balance of work and rest.",
        ),

        (Heart, LongForked) => (
            "Reaching the fingers, forked",
            "Rich and generous feelings that reach out in many directions. Warm-hearted and easily moved.",
        ),
        (Heart, ShortForked) => (
            "Short, forked",
            "Affections are lively but divided. Romance may come often, with some twists along the way.",
        ),
        (Heart, LongBroken) => (
            "Long, broken",
            "Deep loyalty, with an emotional turning point that reshapes how you love.",
        ),
        (Heart, ShortBroken) => (
            "Short, broken",
            "Guarded with feelings. Past experiences have taught caution in matters of the heart.",
        ),
        (Heart, LongCurved) => (
            "Long and curving",
            "Expressive and passionate. Open about feelings and devoted once committed.",
        ),
        (Heart, LongUnbroken) => (
            "Reaching the fingers",
            "Emotionally rich and sensitive. Values loyalty and commits fully to a relationship.",
        ),
        (Heart, ShortCurved) => (
            "Short and curving",
            "Warm but selective. Affection is shown through actions more than words.",
        ),
        (Heart, ShortUnbroken) => (
            "Stops midway",
            "Rational in love and dislikes drawn-out drama. A strong sense of self-protection.",
        ),

        (Head, LongForked) => (
            "Long, forked",
            "A versatile mind that holds both logic and imagination. Gifted at seeing a problem from several sides.",
        ),
        (Head, ShortForked) => (
            "Short, forked",
            "Quick and adaptable thinking, sometimes pulled between options. Trust the first clear idea.",
        ),
        (Head, LongBroken) => (
            "Long, broken",
            "Deep thinking with a change of direction along the way. New interests reshape old convictions.",
        ),
        (Head, ShortBroken) => (
            "Short, broken",
            "Focused in short stretches. Ideas come in flashes; writing them down helps.",
        ),
        (Head, LongCurved) => (
            "Long, sloping",
            "Rich imagination and artistic talent. Creative, intuitive and emotionally attuned thinking.",
        ),
        (Head, LongUnbroken) => (
            "Long and clear",
            "Clear, logical thinking and a talent for deep analysis. Practical and good with numbers.",
        ),
        (Head, ShortCurved) => (
            "Concise, sloping",
            "Intuitive and imaginative, quick to grasp the essence of things.",
        ),
        (Head, ShortUnbroken) => (
            "Concise",
            "Fast reactions, sharp intuition and decisive judgement.",
        ),
    };

    LineReading {
        feature: feature.to_string(),
        reading: Some(reading.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    enum Behaviour {
        Reply(String),
        Fail,
        Hang,
    }

    struct MockModel {
        behaviour: Behaviour,
        calls: AtomicUsize,
    }

    impl MockModel {
        fn new(behaviour: Behaviour) -> Self {
            Self {
                behaviour,
                calls: AtomicUsize::new(0),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl LanguageModel for MockModel {
        async fn complete(&self, _system: &str, _prompt: &str) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.behaviour {
                Behaviour::Reply(text) => Ok(text.clone()),
                Behaviour::Fail => anyhow::bail!("connection refused"),
                Behaviour::Hang => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Ok(String::new())
                }
            }
        }
    }

    fn feature(kind: LineKind, tag: FeatureTag) -> LineFeature {
        LineFeature {
            kind,
            tag,
            metrics: None,
        }
    }

    fn features() -> Vec<LineFeature> {
        vec![
            feature(LineKind::Life, FeatureTag::LongUnbroken),
            feature(LineKind::Heart, FeatureTag::ShortBroken),
            feature(LineKind::Head, FeatureTag::NotDetected),
        ]
    }

    const GOOD_REPLY: &str = r#"```json
{
  "life_line": {"feature": "Deep", "reading": "Strong."},
  "heart_line": {"feature": "Split", "reading": "Careful."},
  "head_line": {"feature": "Invented", "reading": "Should be ignored."}
}
```"#;

    #[test]
    fn test_every_tag_has_a_local_entry() {
        let tags = [
            FeatureTag::LongForked,
            FeatureTag::ShortForked,
            FeatureTag::LongBroken,
            FeatureTag::ShortBroken,
            FeatureTag::LongCurved,
            FeatureTag::LongUnbroken,
            FeatureTag::ShortCurved,
            FeatureTag::ShortUnbroken,
        ];
        for kind in LineKind::ALL {
            for tag in tags {
                let r = local_reading(kind, tag);
                assert!(!r.feature.is_empty());
                assert!(r.reading.as_deref().is_some_and(|s| !s.is_empty()));
            }
            assert_eq!(local_reading(kind, FeatureTag::NotDetected), LineReading::not_detected());
        }
    }

    #[test]
    fn test_strip_fence() {
        assert_eq!(strip_fence("```json\n{}\n```"), "{}");
        assert_eq!(strip_fence("  {} "), "{}");
        assert_eq!(strip_fence("```\n{\"a\":1}```"), "{\"a\":1}");
    }

    #[test]
    fn test_prompt_mentions_only_detected_lines_in_shape() {
        let prompt = build_prompt(&DataId::new(), &features());
        assert!(prompt.contains("\"life_line\": {"));
        assert!(prompt.contains("\"heart_line\": {"));
        assert!(!prompt.contains("\"head_line\": {"));
        assert!(prompt.contains("head_line): not detected"));
    }

    #[test]
    fn test_parse_reply_rejects_missing_entry() {
        let reply = r#"{"life_line": {"feature": "Deep", "reading": "Strong."}}"#;
        assert!(parse_reply(reply, &features()).is_err());
    }

    #[test]
    fn test_parse_reply_rejects_empty_reading() {
        let reply = r#"{"life_line": {"feature": "Deep", "reading": "Strong."},
                        "heart_line": {"feature": "Split", "reading": "  "}}"#;
        assert!(parse_reply(reply, &features()).is_err());
    }

    #[tokio::test]
    async fn test_remote_reply_is_used_and_sentinel_kept() {
        let engine = InterpretationEngine::new(
            Some(MockModel::new(Behaviour::Reply(GOOD_REPLY.to_string()))),
            &InterpretationConfig::default(),
        );
        let reading = engine.interpret(&DataId::new(), &features()).await;
        assert_eq!(reading.mode, InterpretationMode::Remote);
        assert_eq!(reading.life_line.feature, "Deep");
        assert!(reading.head_line.is_not_detected());
    }

    #[tokio::test]
    async fn test_transport_failure_falls_back_for_whole_request() {
        let engine = InterpretationEngine::new(
            Some(MockModel::new(Behaviour::Fail)),
            &InterpretationConfig::default(),
        );
        let reading = engine.interpret(&DataId::new(), &features()).await;
        assert_eq!(reading, interpret_local(&features()));
        assert_eq!(reading.mode, InterpretationMode::Local);
    }

    #[tokio::test]
    async fn test_malformed_reply_falls_back() {
        let engine = InterpretationEngine::new(
            Some(MockModel::new(Behaviour::Reply("the stars say yes".to_string()))),
            &InterpretationConfig::default(),
        );
        let reading = engine.interpret(&DataId::new(), &features()).await;
        assert_eq!(reading, interpret_local(&features()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_falls_back() {
        let engine = InterpretationEngine::new(
            Some(MockModel::new(Behaviour::Hang)),
            &InterpretationConfig::default(),
        );
        let reading = engine.interpret(&DataId::new(), &features()).await;
        assert_eq!(reading.mode, InterpretationMode::Local);
        assert_eq!(reading.heart_line, local_reading(LineKind::Heart, FeatureTag::ShortBroken));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cooldown_skips_remote_after_failure() {
        let config = InterpretationConfig::default();
        let engine = InterpretationEngine::new(Some(MockModel::new(Behaviour::Fail)), &config);
        let id = DataId::new();

        engine.interpret(&id, &features()).await;
        assert_eq!(engine.resolver().resolve(), InterpretationMode::Local);
        engine.interpret(&id, &features()).await;
        assert_eq!(engine.model.as_ref().unwrap().calls(), 1);

        tokio::time::advance(config.remote_cooldown() + Duration::from_secs(1)).await;
        assert_eq!(engine.resolver().resolve(), InterpretationMode::Remote);
        engine.interpret(&id, &features()).await;
        assert_eq!(engine.model.as_ref().unwrap().calls(), 2);
    }

    #[tokio::test]
    async fn test_local_is_idempotent() {
        let engine = InterpretationEngine::<MockModel>::local(&InterpretationConfig::default());
        let id = DataId::new();
        let first = engine.interpret(&id, &features()).await;
        let second = engine.interpret(&id, &features()).await;
        assert_eq!(first, second);
        assert_eq!(first.mode, InterpretationMode::Local);
    }

    #[tokio::test]
    async fn test_nothing_detected_never_calls_remote() {
        let model = MockModel::new(Behaviour::Reply(GOOD_REPLY.to_string()));
        let engine = InterpretationEngine::new(Some(model), &InterpretationConfig::default());
        let none: Vec<LineFeature> = LineKind::ALL
            .into_iter()
            .map(|k| feature(k, FeatureTag::NotDetected))
            .collect();
        let reading = engine.interpret(&DataId::new(), &none).await;
        assert!(reading.life_line.is_not_detected());
        assert!(reading.heart_line.is_not_detected());
        assert!(reading.head_line.is_not_detected());
        assert_eq!(engine.model.as_ref().unwrap().calls(), 0);
    }
}
