//! Data models for crew health records

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Categorical risk level, ordered by severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    pub const ALL: [RiskLevel; 4] = [
        RiskLevel::Low,
        RiskLevel::Medium,
        RiskLevel::High,
        RiskLevel::Critical,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "Low",
            RiskLevel::Medium => "Medium",
            RiskLevel::High => "High",
            RiskLevel::Critical => "Critical",
        }
    }

    /// Variation multiplier applied to synthetic vital trends
    pub fn trend_factor(&self) -> f64 {
        match self {
            RiskLevel::Low => 1.0,
            RiskLevel::Medium => 1.2,
            RiskLevel::High => 1.5,
            RiskLevel::Critical => 2.0,
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RiskLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RiskLevel::ALL
            .into_iter()
            .find(|level| level.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown risk level: {}", s))
    }
}

/// Demographics and vital-sign snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrewProfile {
    pub name: String,
    pub age: u32,
    pub gender: String,
    /// Beats per minute
    pub heart_rate: u32,
    pub bp_systolic: u32,
    pub bp_diastolic: u32,
    /// Oxygen saturation, percent
    pub spo2: f64,
    pub sleep_hours: f64,
    /// Celsius
    pub body_temp: f64,
    /// 0-10 scale
    pub stress_level: f64,
    pub bmi: f64,
    pub smoker: bool,
}

/// Probability per risk level. Not guaranteed to sum to exactly 1.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskProbabilities {
    #[serde(rename = "Low")]
    pub low: f64,
    #[serde(rename = "Medium")]
    pub medium: f64,
    #[serde(rename = "High")]
    pub high: f64,
    #[serde(rename = "Critical")]
    pub critical: f64,
}

impl RiskProbabilities {
    pub fn get(&self, level: RiskLevel) -> f64 {
        match level {
            RiskLevel::Low => self.low,
            RiskLevel::Medium => self.medium,
            RiskLevel::High => self.high,
            RiskLevel::Critical => self.critical,
        }
    }

    /// Probabilities scaled to sum to 1, for display
    pub fn normalized(&self) -> Self {
        let total = self.low + self.medium + self.high + self.critical;
        if total <= 0.0 {
            return self.clone();
        }
        Self {
            low: self.low / total,
            medium: self.medium / total,
            high: self.high / total,
            critical: self.critical / total,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub risk_level: RiskLevel,
    pub probabilities: RiskProbabilities,
}

/// The boolean flag drives alerting; the score is informational
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyDetection {
    pub is_anomaly: bool,
    pub anomaly_score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClinicalInsights {
    pub summary: String,
    pub top_factors: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vitals_analysis: Option<String>,
    pub immediate_actions: IndexMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub countermeasures: Option<IndexMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub long_term_monitoring: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub completed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryResponse {
    pub message: String,
    pub timestamp: DateTime<Utc>,
    /// False when a human answered
    pub automated: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Query {
    pub id: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<QueryResponse>,
}

/// A monitored crew member and everything recorded about them
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrewMember {
    pub id: String,
    pub profile: CrewProfile,
    pub prediction: Prediction,
    pub anomaly_detection: AnomalyDetection,
    pub clinical_insights: ClinicalInsights,
    /// Category label to advice, in display order
    pub rule_based_recommendations: IndexMap<String, String>,
    #[serde(default)]
    pub tasks: IndexMap<String, Task>,
    #[serde(default)]
    pub queries: IndexMap<String, Query>,
    pub assessed_at: String,
}

impl CrewMember {
    pub fn risk_level(&self) -> RiskLevel {
        self.prediction.risk_level
    }

    pub fn is_anomaly(&self) -> bool {
        self.anomaly_detection.is_anomaly
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatSender {
    Doctor,
    Astronaut,
    /// Reserved for injected alerts
    System,
}

impl fmt::Display for ChatSender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ChatSender::Doctor => "doctor",
            ChatSender::Astronaut => "astronaut",
            ChatSender::System => "system",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub sender: ChatSender,
    pub text: String,
    pub timestamp: String,
}

/// Task creation request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRequest {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
}

/// Query submission request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryRequest {
    pub message: String,
}

/// Chat post request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub text: String,
}

/// One synthetic hourly reading
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendPoint {
    pub hour: String,
    pub value: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_risk_level_ordering() {
        assert!(RiskLevel::Low < RiskLevel::Medium);
        assert!(RiskLevel::High < RiskLevel::Critical);
        assert_eq!(RiskLevel::ALL.iter().max(), Some(&RiskLevel::Critical));
    }

    #[test]
    fn test_risk_level_parse() {
        assert_eq!("critical".parse::<RiskLevel>(), Ok(RiskLevel::Critical));
        assert_eq!("High".parse::<RiskLevel>(), Ok(RiskLevel::High));
        assert!("severe".parse::<RiskLevel>().is_err());
    }

    #[test]
    fn test_probabilities_normalized() {
        let probs = RiskProbabilities {
            low: 1.0,
            medium: 1.0,
            high: 1.0,
            critical: 1.0,
        };
        let normalized = probs.normalized();
        assert!((normalized.get(RiskLevel::Low) - 0.25).abs() < 1e-9);
    }

    #[test]
    fn test_probabilities_serde_names() {
        let json = r#"{"Low":0.1,"Medium":0.2,"High":0.3,"Critical":0.4}"#;
        let probs: RiskProbabilities = serde_json::from_str(json).unwrap();
        assert_eq!(probs.critical, 0.4);
    }

    #[test]
    fn test_chat_sender_serde() {
        let sender: ChatSender = serde_json::from_str("\"system\"").unwrap();
        assert_eq!(sender, ChatSender::System);
        assert_eq!(sender.to_string(), "system");
    }
}
