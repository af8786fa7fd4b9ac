//! Closed result types, one per kind of stage.
//!
//! Every payload implements [`Default`] with its documented fallback values,
//! so a stage can always produce a schema-conformant result. [`conform`]
//! turns a loosely-typed parsed object into a payload one field at a time.

use crate::parser::JsonMap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt::Debug;

/// A typed stage payload.
pub trait Payload:
    Serialize + DeserializeOwned + Default + Clone + PartialEq + Debug + Send + Sync + 'static
{
    /// Wraps the payload in the run-level enum.
    fn into_stage_payload(self) -> StagePayload;

    /// Borrows the payload back out of the run-level enum.
    fn from_stage_payload(payload: &StagePayload) -> Option<&Self>;

    /// Clamps values into their documented ranges after conformance.
    fn sanitize(&mut self) {}
}

/// Directional view shared by analysts and researchers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Signal {
    /// Expecting the price to rise.
    Bullish,
    /// Expecting the price to fall.
    Bearish,
    /// No view.
    #[default]
    Neutral,
}

/// Trading action decided by the portfolio manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    /// Open or add to a position.
    Buy,
    /// Reduce or close a position.
    Sell,
    /// Do nothing.
    #[default]
    Hold,
}

/// Estimated implementation complexity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    /// Straightforward.
    Low,
    /// Typical.
    #[default]
    Medium,
    /// Large or risky.
    High,
}

/// Output of the requirements extractor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionPayload {
    /// Requirements as extracted, in whatever shape the model used.
    pub requirements: Vec<Value>,
    /// Functional requirements.
    pub functional_requirements: Vec<Value>,
    /// Non-functional requirements.
    pub non_functional_requirements: Vec<Value>,
    /// A question for the user when the input is ambiguous.
    pub clarification_needed: Option<String>,
    /// Whether the model judged the requirements complete.
    pub requirements_complete: bool,
}

/// Output of the requirements analyzer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisPayload {
    /// Analysis of functional requirements.
    pub functional_analysis: JsonMap,
    /// Analysis of non-functional requirements.
    pub non_functional_analysis: JsonMap,
    /// Feasibility notes.
    pub technical_feasibility: Vec<Value>,
    /// Dependencies between requirements or on external systems.
    pub dependencies: Vec<Value>,
    /// Identified risks.
    pub risks: Vec<Value>,
    /// Recommendations.
    pub recommendations: Vec<Value>,
    /// Overall complexity.
    pub complexity: Complexity,
}

/// Output of the quality checker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityReport {
    /// Quality score in `[0, 1]`.
    pub quality_score: f64,
    /// Problems found.
    pub issues: Vec<Value>,
    /// Suggested improvements.
    pub suggestions: Vec<Value>,
}

impl Default for QualityReport {
    fn default() -> Self {
        Self {
            quality_score: 0.5,
            issues: Vec::new(),
            suggestions: Vec::new(),
        }
    }
}

/// Output of the documentation generator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Documentation {
    /// Document title.
    pub title: String,
    /// Project overview.
    pub overview: String,
    /// Executive summary.
    pub executive_summary: String,
    /// Document sections.
    pub sections: Vec<Value>,
    /// Implementation plan items.
    pub implementation_plan: Vec<Value>,
}

impl Default for Documentation {
    fn default() -> Self {
        Self {
            title: "Requirements Specification".to_string(),
            overview: String::new(),
            executive_summary: String::new(),
            sections: Vec::new(),
            implementation_plan: Vec::new(),
        }
    }
}

/// A signal emitted by an analyst or by the debate room.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalystSignal {
    /// Direction.
    pub signal: Signal,
    /// Confidence in `[0, 1]`.
    pub confidence: f64,
    /// Explanation.
    pub reasoning: String,
    /// Supporting indicators.
    pub details: JsonMap,
}

impl Default for AnalystSignal {
    fn default() -> Self {
        Self {
            signal: Signal::Neutral,
            confidence: 0.5,
            reasoning: String::new(),
            details: JsonMap::new(),
        }
    }
}

/// A bull or bear research report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResearchReport {
    /// The researcher's stance.
    pub stance: Signal,
    /// Main arguments.
    pub key_points: Vec<String>,
    /// Confidence in `[0, 1]`.
    pub confidence: f64,
    /// Explanation.
    pub reasoning: String,
}

impl Default for ResearchReport {
    fn default() -> Self {
        Self {
            stance: Signal::Neutral,
            key_points: Vec::new(),
            confidence: 0.5,
            reasoning: String::new(),
        }
    }
}

impl ResearchReport {
    /// Defaults for a researcher arguing `stance`.
    #[must_use]
    pub fn with_stance(stance: Signal) -> Self {
        Self {
            stance,
            ..Self::default()
        }
    }
}

/// Output of the risk manager.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskAssessment {
    /// Risk score in `[0, 1]`.
    pub risk_score: f64,
    /// Largest allowed share of the portfolio, in `[0, 1]`.
    pub max_position_ratio: f64,
    /// Observed volatility.
    pub volatility: f64,
    /// Observed maximum drawdown.
    pub max_drawdown: f64,
    /// Explanation.
    pub reasoning: String,
}

impl Default for RiskAssessment {
    fn default() -> Self {
        Self {
            risk_score: 0.5,
            max_position_ratio: 0.0,
            volatility: 0.0,
            max_drawdown: 0.0,
            reasoning: String::new(),
        }
    }
}

/// Output of the portfolio manager.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TradingDecision {
    /// What to do.
    pub action: Action,
    /// Number of shares.
    pub quantity: u64,
    /// Confidence in `[0, 1]`.
    pub confidence: f64,
    /// Explanation.
    pub reasoning: String,
}

impl Default for TradingDecision {
    fn default() -> Self {
        Self {
            action: Action::Hold,
            quantity: 0,
            confidence: 0.5,
            reasoning: String::new(),
        }
    }
}

/// The payload of any stage, as stored in a pipeline run.
///
/// Serializes as the inner payload with no tag.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum StagePayload {
    /// Requirements extraction.
    Extraction(ExtractionPayload),
    /// Requirements analysis.
    Analysis(AnalysisPayload),
    /// Quality check.
    QualityReport(QualityReport),
    /// Generated documentation.
    Documentation(Documentation),
    /// Analyst or debate signal.
    Signal(AnalystSignal),
    /// Researcher report.
    Research(ResearchReport),
    /// Risk assessment.
    Risk(RiskAssessment),
    /// Trading decision.
    Decision(TradingDecision),
    /// Output of a stage defined outside this crate.
    Custom(JsonMap),
}

impl StagePayload {
    /// Short name of the variant.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Extraction(_) => "extraction",
            Self::Analysis(_) => "analysis",
            Self::QualityReport(_) => "quality_report",
            Self::Documentation(_) => "documentation",
            Self::Signal(_) => "signal",
            Self::Research(_) => "research",
            Self::Risk(_) => "risk",
            Self::Decision(_) => "decision",
            Self::Custom(_) => "custom",
        }
    }

    /// Converts to a JSON value.
    #[must_use]
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    /// Borrows the typed payload, if it is a `P`.
    #[must_use]
    pub fn downcast<P: Payload>(&self) -> Option<&P> {
        P::from_stage_payload(self)
    }
}

macro_rules! impl_payload {
    ($ty:ty, $variant:ident) => {
        impl Payload for $ty {
            fn into_stage_payload(self) -> StagePayload {
                StagePayload::$variant(self)
            }

            fn from_stage_payload(payload: &StagePayload) -> Option<&Self> {
                match payload {
                    StagePayload::$variant(p) => Some(p),
                    _ => None,
                }
            }
        }
    };
    ($ty:ty, $variant:ident, |$this:ident| $sanitize:block) => {
        impl Payload for $ty {
            fn into_stage_payload(self) -> StagePayload {
                StagePayload::$variant(self)
            }

            fn from_stage_payload(payload: &StagePayload) -> Option<&Self> {
                match payload {
                    StagePayload::$variant(p) => Some(p),
                    _ => None,
                }
            }

            fn sanitize(&mut self) {
                let $this = self;
                $sanitize
            }
        }
    };
}

impl_payload!(ExtractionPayload, Extraction);
impl_payload!(AnalysisPayload, Analysis);
impl_payload!(QualityReport, QualityReport, |p| {
    p.quality_score = unit(p.quality_score);
});
impl_payload!(Documentation, Documentation);
impl_payload!(AnalystSignal, Signal, |p| {
    p.confidence = unit(p.confidence);
});
impl_payload!(ResearchReport, Research, |p| {
    p.confidence = unit(p.confidence);
});
impl_payload!(RiskAssessment, Risk, |p| {
    p.risk_score = unit(p.risk_score);
    p.max_position_ratio = unit(p.max_position_ratio);
});
impl_payload!(TradingDecision, Decision, |p| {
    p.confidence = unit(p.confidence);
});
impl_payload!(JsonMap, Custom);

fn unit(value: f64) -> f64 {
    value.clamp(0.0, 1.0)
}

/// A payload built from parsed data, with the fields that fell back to
/// their defaults.
#[derive(Debug, Clone, PartialEq)]
pub struct Conformed<P> {
    /// The conformed payload.
    pub payload: P,
    /// Fields that were missing, null or of the wrong type.
    pub defaulted_fields: Vec<String>,
    /// Number of parsed values that were accepted.
    pub accepted: usize,
}

/// Builds a `P` from `parsed`, starting from `defaults`.
///
/// Each field of `defaults` is replaced by the parsed value of the same name
/// when that value has the right type. Unknown keys are dropped. Missing,
/// null or ill-typed values keep the default and are listed in
/// [`Conformed::defaulted_fields`].
#[must_use]
pub fn conform<P: Payload>(parsed: &JsonMap, defaults: &P) -> Conformed<P> {
    let mut current = match serde_json::to_value(defaults) {
        Ok(Value::Object(map)) if !map.is_empty() => map,
        _ => return conform_whole(parsed, defaults),
    };

    let fields: Vec<String> = current.keys().cloned().collect();
    let mut defaulted_fields = Vec::new();
    let mut accepted = 0;

    for field in fields {
        match parsed.get(&field) {
            None | Some(Value::Null) => defaulted_fields.push(field),
            Some(value) => {
                let previous = current.insert(field.clone(), value.clone());
                if serde_json::from_value::<P>(Value::Object(current.clone())).is_err() {
                    if let Some(previous) = previous {
                        current.insert(field.clone(), previous);
                    }
                    defaulted_fields.push(field);
                } else {
                    accepted += 1;
                }
            }
        }
    }

    let mut payload = serde_json::from_value::<P>(Value::Object(current)).unwrap_or_else(|_| defaults.clone());
    payload.sanitize();
    Conformed {
        payload,
        defaulted_fields,
        accepted,
    }
}

/// Open payloads have no declared fields, so the parsed object is taken whole.
fn conform_whole<P: Payload>(parsed: &JsonMap, defaults: &P) -> Conformed<P> {
    match serde_json::from_value::<P>(Value::Object(parsed.clone())) {
        Ok(mut payload) => {
            payload.sanitize();
            Conformed {
                payload,
                defaulted_fields: Vec::new(),
                accepted: parsed.len(),
            }
        }
        Err(_) => Conformed {
            payload: defaults.clone(),
            defaulted_fields: Vec::new(),
            accepted: 0,
        },
    }
}
