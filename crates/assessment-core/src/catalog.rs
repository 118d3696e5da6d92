//! ============================================================================
//! Gift Catalog - Static per-category descriptions
//! ============================================================================
//! Lookup table used by the results display and the email template.
//! ============================================================================

use serde::Serialize;

use crate::types::GiftType;

/// Description of one gift category
#[derive(Debug, Clone, Copy, Serialize)]
pub struct GiftDescription {
    pub gift: GiftType,
    pub name: &'static str,
    pub summary: &'static str,
    pub scripture: &'static str,
    pub strengths: &'static [&'static str],
    pub challenges: &'static [&'static str],
}

impl GiftDescription {
    /// Strengths joined for single-line template fields
    pub fn strengths_line(&self) -> String {
        self.strengths.join(", ")
    }

    pub fn challenges_line(&self) -> String {
        self.challenges.join(", ")
    }
}

static CATALOG: [GiftDescription; 7] = [
    GiftDescription {
        gift: GiftType::Perceiver,
        name: "Perceiver",
        summary: "Sees situations in clear terms of right and wrong and speaks up to call people back to what is true.",
        scripture: "Romans 12:6",
        strengths: &[
            "Discerns motives and character quickly",
            "Holds firmly to principles",
            "Speaks honestly even when it is costly",
            "Eager to see wrongs put right",
        ],
        challenges: &[
            "Can come across as blunt or judgmental",
            "Struggles to forgive own failures",
            "Tends to see issues in black and white",
        ],
    },
    GiftDescription {
        gift: GiftType::Server,
        name: "Server",
        summary: "Notices practical needs and meets them, finding joy in doing tasks that free others up.",
        scripture: "Romans 12:7",
        strengths: &[
            "Spots practical needs before others do",
            "Energetic and hands-on",
            "Remembers what people like and need",
            "Loyal and dependable",
        ],
        challenges: &[
            "Finds it hard to say no",
            "May neglect own family or rest",
            "Can feel unappreciated",
        ],
    },
    GiftDescription {
        gift: GiftType::Teacher,
        name: "Teacher",
        summary: "Loves to research, validate and explain truth so others understand it accurately.",
        scripture: "Romans 12:7",
        strengths: &[
            "Thorough researcher",
            "Presents ideas in a logical sequence",
            "Values accuracy and context",
            "Emotionally steady under pressure",
        ],
        challenges: &[
            "Can prize knowledge over relationship",
            "Slow to accept views without proof",
            "May over-explain",
        ],
    },
    GiftDescription {
        gift: GiftType::Exhorter,
        name: "Exhorter",
        summary: "Encourages others toward growth with practical next steps and unshakeable optimism.",
        scripture: "Romans 12:8",
        strengths: &[
            "Sees potential in people",
            "Gives practical steps of action",
            "Communicates easily with all kinds of people",
            "Turns problems into opportunities",
        ],
        challenges: &[
            "May interrupt or over-talk",
            "Can oversimplify problems",
            "Takes on more commitments than time allows",
        ],
    },
    GiftDescription {
        gift: GiftType::Giver,
        name: "Giver",
        summary: "Gives resources, time and hospitality generously and with wisdom, often quietly.",
        scripture: "Romans 12:8",
        strengths: &[
            "Wise steward of money and resources",
            "Generous with time and hospitality",
            "Good business sense",
            "Gives without wanting recognition",
        ],
        challenges: &[
            "May use giving to control outcomes",
            "Can be overly frugal with self and family",
            "Suspicious of pressure appeals",
        ],
    },
    GiftDescription {
        gift: GiftType::Administrator,
        name: "Administrator",
        summary: "Organises people and resources toward a goal, seeing the big picture and delegating well.",
        scripture: "Romans 12:8",
        strengths: &[
            "Sees the overall picture and long-range goals",
            "Delegates and coordinates effectively",
            "Completes tasks quickly and efficiently",
            "Thrives under pressure",
        ],
        challenges: &[
            "Can treat people as resources",
            "May neglect routine details",
            "Impatient with slow progress",
        ],
    },
    GiftDescription {
        gift: GiftType::Compassion,
        name: "Compassion",
        summary: "Feels deeply with those who hurt and comes alongside them with comfort and patience.",
        scripture: "Romans 12:8",
        strengths: &[
            "Senses the emotional atmosphere of a room",
            "Patient and gentle with the hurting",
            "Draws out people who feel left out",
            "Loyal friend",
        ],
        challenges: &[
            "Finds decisions and confrontation hard",
            "Can be easily hurt",
            "May take on others' pain as own",
        ],
    },
];

/// Description for one gift
pub fn describe(gift: GiftType) -> &'static GiftDescription {
    &CATALOG[gift.index()]
}

/// All descriptions in fixed category order
pub fn all() -> &'static [GiftDescription] {
    &CATALOG
}
