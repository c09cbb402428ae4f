//! Deterministic keyword classification
//!
//! Used when the language model is unavailable or returns nothing usable.
//! Each field is decided independently; within a field the first matching
//! rule in precedence order wins.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::models::{CallDepartment, CallIntent, CallResult};

/// All four classification fields for one call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub intent: CallIntent,
    pub result: CallResult,
    pub department: CallDepartment,
    /// 1 (very negative) to 5 (very positive)
    pub sentiment: u8,
}

fn pattern(source: &str) -> Regex {
    Regex::new(source).unwrap()
}

// Intent, in precedence order
static TRADE_IN: Lazy<Regex> = Lazy::new(|| pattern(r"\btrade[-\s]?in(s)?\b"));
static FINANCE: Lazy<Regex> = Lazy::new(|| {
    pattern(r"\b(financ(e|ing)|loan|apr|lease|rate|payment|monthly payment|pre[-\s]?approval)\b")
});
static CREDIT: Lazy<Regex> = Lazy::new(|| {
    pattern(r"\b(credit|credit score|no credit|bad credit|credit report|credit history|approval)\b")
});
static APPOINTMENT: Lazy<Regex> = Lazy::new(|| {
    pattern(r"\b(appointment|schedule|book|reserve|test[-\s]?drive|come in|come by)\b")
});

// Result signals
static NO_CONNECT: Lazy<Regex> = Lazy::new(|| {
    pattern(r"\b(no answer|didn'?t answer|busy signal|line (?:was )?busy|call failed|couldn'?t reach|didn'?t pick up)\b")
});
static CANCELLED: Lazy<Regex> = Lazy::new(|| {
    pattern(r"\b(cancel(l)?ed?|call off|won'?t make (?:it)?|can'?t make (?:it)?)(?: my| the)? (appointment|appt)?\b")
});
static RESCHEDULED: Lazy<Regex> = Lazy::new(|| {
    pattern(r"\b(reschedul(e|ed|ing)|move|push back|change) (?:my |the )?(appointment|appt)\b")
});
static BOOKED: Lazy<Regex> = Lazy::new(|| {
    pattern(r"\b(book(ed|ing)?|schedule(d)?|set (?:up)?|confirm(ed|ation)?|lock(ed)? in)\b")
});
static REQUESTED: Lazy<Regex> = Lazy::new(|| {
    pattern(r"\b(make|set|schedule|book|looking for|want|like) (?:an )?(appointment|appt|test[-\s]?drive)\b")
});
static TRANSFERRED: Lazy<Regex> = Lazy::new(|| {
    pattern(r"\b(transfer(red)?|warm transfer|hand(ed)? (?:off|over)|connect(ed)? (?:to|with)|forward(ed)?)\b")
});
static NOT_INTERESTED: Lazy<Regex> = Lazy::new(|| {
    pattern(r"\b(not interested|no longer interested|already bought|already purchased|bought somewhere else|don'?t call|stop calling)\b")
});
static OTHER_OUTCOME: Lazy<Regex> = Lazy::new(|| {
    pattern(r"\b(voicemail|voice mail|leave(?:t)? a message|left a message|hung up|disconnect(ed)?|no show|didn'?t show|information|info)\b")
});

// Department signals
static SERVICE: Lazy<Regex> = Lazy::new(|| {
    pattern(r"\b(service|maintenance|oil change|brake(s)?|tire(s)?|alignment|diagnostic|check engine|recall|warranty (?:repair)?|inspection|service appointment)\b")
});
static PARTS: Lazy<Regex> = Lazy::new(|| {
    pattern(r"\b(part(s)? department|order(ing)? parts?|bumper|fender|mirror|wiper(s)?|floor mat(s)?|accessor(y|ies)|filter)\b")
});
static SALES: Lazy<Regex> = Lazy::new(|| {
    pattern(r"\b(buy|lease|purchase|test[-\s]?drive|trade[-\s]?in|finance|loan|payment|apr|down payment|vehicle|car|truck|suv|sedan|coupe|vin|stock number)\b")
});

// Sentiment bands
static VERY_NEGATIVE: Lazy<Regex> = Lazy::new(|| {
    pattern(r"\b(rude|angry|upset|frustrat(ed|ing|ion)?|terrible|bad|horrible|awful|mad)\b")
});
static NEGATIVE: Lazy<Regex> =
    Lazy::new(|| pattern(r"\b(inconvenient|annoyed|not happy|disappointed)\b"));
static POSITIVE: Lazy<Regex> = Lazy::new(|| {
    pattern(r"\b(great|happy|thank(s| you)|awesome|perfect|excellent|appreciate it|helpful)\b")
});
static VERY_POSITIVE: Lazy<Regex> =
    Lazy::new(|| pattern(r"\b(amazing|fantastic|outstanding|wonderful|love you guys)\b"));

pub fn intent(text: &str) -> CallIntent {
    if TRADE_IN.is_match(text) {
        CallIntent::TradeIn
    } else if FINANCE.is_match(text) {
        CallIntent::Finance
    } else if CREDIT.is_match(text) {
        CallIntent::Credit
    } else if APPOINTMENT.is_match(text) {
        CallIntent::Appointment
    } else if !text.trim().is_empty() {
        CallIntent::Other
    } else {
        CallIntent::None
    }
}

pub fn result(text: &str) -> CallResult {
    if NO_CONNECT.is_match(text) {
        CallResult::NotConnected
    } else if CANCELLED.is_match(text) {
        CallResult::AppointmentCancelled
    } else if RESCHEDULED.is_match(text) {
        CallResult::AppointmentRescheduled
    } else if BOOKED.is_match(text) {
        CallResult::AppointmentBooked
    } else if REQUESTED.is_match(text) {
        CallResult::AppointmentRequested
    } else if TRANSFERRED.is_match(text) {
        CallResult::CallTransferred
    } else if NOT_INTERESTED.is_match(text) {
        CallResult::NotInterested
    } else if OTHER_OUTCOME.is_match(text) {
        CallResult::Other
    } else {
        CallResult::None
    }
}

pub fn department(text: &str) -> CallDepartment {
    let service = SERVICE.is_match(text);
    let parts = PARTS.is_match(text);
    let sales = SALES.is_match(text);

    if service && !sales && !parts {
        CallDepartment::Service
    } else if parts && !sales && !service {
        CallDepartment::Parts
    } else if sales {
        CallDepartment::Sales
    } else if service {
        CallDepartment::Service
    } else if parts {
        CallDepartment::Parts
    } else {
        CallDepartment::None
    }
}

pub fn sentiment(text: &str) -> u8 {
    if VERY_NEGATIVE.is_match(text) {
        1
    } else if NEGATIVE.is_match(text) {
        2
    } else if POSITIVE.is_match(text) {
        4
    } else if VERY_POSITIVE.is_match(text) {
        5
    } else {
        3
    }
}

/// Classify a plain transcript
pub fn classify(text: &str) -> Classification {
    let text = text.to_lowercase();
    Classification {
        intent: intent(&text),
        result: result(&text),
        department: department(&text),
        sentiment: sentiment(&text),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trade_in_beats_finance() {
        let c = classify("I want to trade-in my truck and talk about financing");
        assert_eq!(c.intent, CallIntent::TradeIn);
    }

    #[test]
    fn intent_precedence_chain() {
        assert_eq!(classify("what apr can I get").intent, CallIntent::Finance);
        assert_eq!(classify("my credit score is low").intent, CallIntent::Credit);
        assert_eq!(classify("can I come by tomorrow").intent, CallIntent::Appointment);
        assert_eq!(classify("is the red one still there").intent, CallIntent::Other);
        assert_eq!(classify("   ").intent, CallIntent::None);
    }

    #[test]
    fn result_precedence() {
        assert_eq!(classify("nobody, no answer at all").result, CallResult::NotConnected);
        assert_eq!(
            classify("I cancelled the appointment, will book another").result,
            CallResult::AppointmentCancelled
        );
        assert_eq!(
            classify("can we move my appointment").result,
            CallResult::AppointmentRescheduled
        );
        assert_eq!(classify("you are booked for 3 pm").result, CallResult::AppointmentBooked);
        assert_eq!(
            classify("I would like an appointment").result,
            CallResult::AppointmentRequested
        );
        assert_eq!(classify("let me transfer you").result, CallResult::CallTransferred);
        assert_eq!(classify("I'm not interested").result, CallResult::NotInterested);
        assert_eq!(classify("please leave a message").result, CallResult::Other);
        assert_eq!(classify("hello").result, CallResult::None);
    }

    #[test]
    fn department_precedence() {
        assert_eq!(classify("my check engine light is on").department, CallDepartment::Service);
        assert_eq!(classify("I need a new bumper").department, CallDepartment::Parts);
        assert_eq!(
            classify("oil change and also I want to buy a car").department,
            CallDepartment::Sales
        );
        assert_eq!(
            classify("brakes and a floor mat").department,
            CallDepartment::Service
        );
        assert_eq!(classify("hello there").department, CallDepartment::None);
    }

    #[test]
    fn sentiment_bands() {
        assert_eq!(classify("that was rude").sentiment, 1);
        assert_eq!(classify("I am frustrated").sentiment, 1);
        assert_eq!(classify("I'm disappointed").sentiment, 2);
        assert_eq!(classify("thanks so much").sentiment, 4);
        assert_eq!(classify("that is amazing").sentiment, 5);
        assert_eq!(classify("ok").sentiment, 3);
    }
}
