//! Automated answers for crew health queries
//!
//! Messages are matched against topic buckets in a fixed priority order:
//! pain, sleep, stress, cardiovascular. The first bucket with a keyword hit
//! produces the answer, filled in from the crew member's current profile.

use super::models::CrewProfile;

/// Recommended nightly sleep, hours
pub const SLEEP_RANGE: (f64, f64) = (7.0, 9.0);
pub const STRESS_ELEVATED: f64 = 7.0;
pub const STRESS_MODERATE: f64 = 4.0;
pub const SYSTOLIC_ELEVATED: u32 = 140;
pub const DIASTOLIC_ELEVATED: u32 = 90;
pub const HEART_RATE_ELEVATED: u32 = 100;

pub const GENERIC_RESPONSE: &str = "Thank you for your query. The medical team has received your \
message and will review it together with your latest vitals. If your symptoms worsen, contact \
the medical bay immediately.";

/// Topic bucket, in priority order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Topic {
    Pain,
    Sleep,
    Stress,
    Cardiovascular,
}

impl Topic {
    pub const PRIORITY: [Topic; 4] = [Topic::Pain, Topic::Sleep, Topic::Stress, Topic::Cardiovascular];

    pub fn keywords(&self) -> &'static [&'static str] {
        match self {
            Topic::Pain => &["pain", "headache", "migraine", "ache", "sore", "hurt"],
            Topic::Sleep => &["sleep", "tired", "fatigue", "exhausted", "insomnia", "drowsy"],
            Topic::Stress => &["stress", "anxiety", "anxious", "nervous", "worried", "overwhelmed"],
            Topic::Cardiovascular => &[
                "heart",
                "chest",
                "blood pressure",
                "bp",
                "palpitation",
                "pulse",
                "dizzy",
                "lightheaded",
            ],
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Topic::Pain => "pain",
            Topic::Sleep => "sleep",
            Topic::Stress => "stress",
            Topic::Cardiovascular => "cardiovascular",
        }
    }
}

/// First topic whose keywords appear in the message.
///
/// Keywords match at the start of a word, so "stressed" hits "stress" while
/// "reached" does not hit "ache". Multi-word keywords match consecutive words.
pub fn classify(message: &str) -> Option<Topic> {
    let lowered = message.to_lowercase();
    let words: Vec<&str> = lowered
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect();
    Topic::PRIORITY
        .into_iter()
        .find(|topic| topic.keywords().iter().any(|kw| mentions(&words, kw)))
}

fn mentions(words: &[&str], keyword: &str) -> bool {
    let parts: Vec<&str> = keyword.split(' ').collect();
    let last = parts.len() - 1;
    words.windows(parts.len()).any(|window| {
        window.iter().zip(&parts).enumerate().all(|(i, (word, part))| {
            if i == last {
                word.starts_with(*part)
            } else {
                word == part
            }
        })
    })
}

/// Build the automated answer for a message
pub fn respond(message: &str, profile: &CrewProfile) -> String {
    match classify(message) {
        Some(Topic::Pain) => pain_response(profile),
        Some(Topic::Sleep) => sleep_response(profile),
        Some(Topic::Stress) => stress_response(profile),
        Some(Topic::Cardiovascular) => cardiovascular_response(profile),
        None => GENERIC_RESPONSE.to_string(),
    }
}

fn pressure_elevated(profile: &CrewProfile) -> bool {
    profile.bp_systolic >= SYSTOLIC_ELEVATED || profile.bp_diastolic >= DIASTOLIC_ELEVATED
}

fn pain_response(profile: &CrewProfile) -> String {
    let clause = if pressure_elevated(profile) || profile.heart_rate > HEART_RATE_ELEVATED {
        "which are elevated; pain combined with these readings needs review, so the medical team \
will check in with you shortly"
    } else {
        "which are within the expected range"
    };
    format!(
        "Sorry to hear you are in pain. Your current heart rate is {} bpm and blood pressure is \
{}/{} mmHg, {}. Take the approved analgesic from the medical kit, stay hydrated, and report \
back if the pain persists beyond 2 hours.",
        profile.heart_rate, profile.bp_systolic, profile.bp_diastolic, clause
    )
}

fn sleep_response(profile: &CrewProfile) -> String {
    let (low, high) = SLEEP_RANGE;
    let clause = if profile.sleep_hours < low {
        format!("below the recommended range of {}-{} hours", low, high)
    } else if profile.sleep_hours > high {
        format!("above the recommended range of {}-{} hours", low, high)
    } else {
        format!("within the recommended range of {}-{} hours", low, high)
    };
    format!(
        "Your recorded sleep is {} hours, which is {}. Fatigue affects reaction time and judgement; \
dim cabin lighting an hour before your sleep period and avoid caffeine in the second half of \
your shift.",
        profile.sleep_hours, clause
    )
}

fn stress_response(profile: &CrewProfile) -> String {
    let clause = if profile.stress_level >= STRESS_ELEVATED {
        "elevated; a session with the flight psychologist is recommended within 24 hours"
    } else if profile.stress_level >= STRESS_MODERATE {
        "moderate; scheduled breathing exercises twice daily should help"
    } else {
        "low; keep up your current routine"
    };
    format!(
        "Your current stress score is {}/10, which is {}. Reach out to the medical team at any \
time if you feel overwhelmed.",
        profile.stress_level, clause
    )
}

fn cardiovascular_response(profile: &CrewProfile) -> String {
    let clause = if pressure_elevated(profile) || profile.heart_rate > HEART_RATE_ELEVATED {
        "above the normal range. Please sit down, rest for 15 minutes and repeat the reading; \
report to the medical bay if symptoms continue"
    } else {
        "within the normal range. Continue routine monitoring and report any chest pain or \
shortness of breath"
    };
    format!(
        "Your heart rate is {} bpm and blood pressure is {}/{} mmHg, {}.",
        profile.heart_rate, profile.bp_systolic, profile.bp_diastolic, clause
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(sleep_hours: f64, stress_level: f64, bp_systolic: u32) -> CrewProfile {
        CrewProfile {
            name: "Test".to_string(),
            age: 40,
            gender: "F".to_string(),
            heart_rate: 72,
            bp_systolic,
            bp_diastolic: 80,
            spo2: 98.0,
            sleep_hours,
            body_temp: 36.6,
            stress_level,
            bmi: 22.0,
            smoker: false,
        }
    }

    #[test]
    fn test_first_bucket_wins() {
        assert_eq!(classify("I have a headache and can't sleep"), Some(Topic::Pain));
        assert_eq!(classify("can't sleep, feeling anxious"), Some(Topic::Sleep));
        assert_eq!(classify("Stressed about my heart"), Some(Topic::Stress));
    }

    #[test]
    fn test_keywords_match_whole_words() {
        assert_eq!(classify("I reached the lab late, feeling stressed"), Some(Topic::Stress));
        assert_eq!(classify("The subpanel is presorted"), None);
        assert_eq!(classify("Headaches all week"), Some(Topic::Pain));
        assert_eq!(classify("my blood pressure feels off"), Some(Topic::Cardiovascular));
        assert_eq!(classify("blood test, pressure suit check"), None);
        assert_eq!(classify("BP was high this morning"), Some(Topic::Cardiovascular));
    }

    #[test]
    fn test_case_insensitive_match() {
        assert_eq!(classify("MY CHEST FEELS TIGHT"), Some(Topic::Cardiovascular));
    }

    #[test]
    fn test_no_match_is_generic() {
        assert_eq!(classify("When is the next resupply?"), None);
        assert_eq!(respond("When is the next resupply?", &profile(8.0, 2.0, 110)), GENERIC_RESPONSE);
    }

    #[test]
    fn test_sleep_below_range() {
        let text = respond("I'm so tired", &profile(4.0, 2.0, 110));
        assert!(text.contains("4 hours"));
        assert!(text.contains("below the recommended range"));
    }

    #[test]
    fn test_sleep_within_range() {
        let text = respond("how much sleep do I need", &profile(7.5, 2.0, 110));
        assert!(text.contains("7.5 hours"));
        assert!(text.contains("within the recommended range"));
    }

    #[test]
    fn test_stress_thresholds() {
        assert!(respond("stress", &profile(8.0, 8.0, 110)).contains("8/10, which is elevated"));
        assert!(respond("stress", &profile(8.0, 5.0, 110)).contains("moderate"));
        assert!(respond("stress", &profile(8.0, 1.0, 110)).contains("low"));
    }

    #[test]
    fn test_cardiovascular_uses_pressure() {
        let high = respond("my blood pressure", &profile(8.0, 2.0, 150));
        assert!(high.contains("150/80 mmHg"));
        assert!(high.contains("above the normal range"));

        let normal = respond("my blood pressure", &profile(8.0, 2.0, 118));
        assert!(normal.contains("within the normal range"));
    }

    #[test]
    fn test_response_is_deterministic() {
        let p = profile(6.0, 6.0, 130);
        assert_eq!(respond("headache", &p), respond("headache", &p));
    }
}
