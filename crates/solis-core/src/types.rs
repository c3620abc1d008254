use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique identifier for a lead (UUIDv7 — time-sortable for easier log correlation).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LeadId(pub String);

impl LeadId {
    pub fn new() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LeadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Default for LeadId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<String> for LeadId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for LeadId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Unique identifier for a conversation (one per lead).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConversationId(pub String);

impl ConversationId {
    pub fn new() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Default for ConversationId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<String> for ConversationId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Normalized phone number in E.164-ish form (digits with leading `+`).
///
/// The WhatsApp bridge reports senders as JIDs (`5581999999999@s.whatsapp.net`);
/// `from_jid` strips the domain and normalizes the prefix so the same lead
/// always maps to the same row regardless of which gateway field it came from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Phone(pub String);

impl Phone {
    pub fn new(raw: &str) -> Self {
        let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
        Self(format!("+{digits}"))
    }

    /// Parse a gateway JID (`<digits>@s.whatsapp.net`) into a phone.
    pub fn from_jid(jid: &str) -> Self {
        let number = jid.split('@').next().unwrap_or(jid);
        Self::new(number)
    }

    /// Back to the JID form the gateway expects on sends.
    pub fn to_jid(&self) -> String {
        format!("{}@s.whatsapp.net", self.0.trim_start_matches('+'))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Phone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Position in the qualification funnel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualificationStage {
    Initial,
    Identifying,
    DiscoveringSolution,
    CapturingBill,
    CheckingCompetitor,
    Scheduling,
    Scheduled,
    Abandoned,
    Won,
    Lost,
}

impl QualificationStage {
    /// Terminal stages admit no further funnel progress.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            QualificationStage::Scheduled
                | QualificationStage::Abandoned
                | QualificationStage::Won
                | QualificationStage::Lost
        )
    }

    /// Ordinal used to reject backward transitions.
    pub fn ordinal(&self) -> u8 {
        match self {
            QualificationStage::Initial => 0,
            QualificationStage::Identifying => 1,
            QualificationStage::DiscoveringSolution => 2,
            QualificationStage::CapturingBill => 3,
            QualificationStage::CheckingCompetitor => 4,
            QualificationStage::Scheduling => 5,
            QualificationStage::Scheduled => 6,
            QualificationStage::Abandoned => 7,
            QualificationStage::Won => 8,
            QualificationStage::Lost => 9,
        }
    }
}

impl fmt::Display for QualificationStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            QualificationStage::Initial => "initial",
            QualificationStage::Identifying => "identifying",
            QualificationStage::DiscoveringSolution => "discovering_solution",
            QualificationStage::CapturingBill => "capturing_bill",
            QualificationStage::CheckingCompetitor => "checking_competitor",
            QualificationStage::Scheduling => "scheduling",
            QualificationStage::Scheduled => "scheduled",
            QualificationStage::Abandoned => "abandoned",
            QualificationStage::Won => "won",
            QualificationStage::Lost => "lost",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for QualificationStage {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "initial" => Ok(QualificationStage::Initial),
            "identifying" => Ok(QualificationStage::Identifying),
            "discovering_solution" => Ok(QualificationStage::DiscoveringSolution),
            "capturing_bill" => Ok(QualificationStage::CapturingBill),
            "checking_competitor" => Ok(QualificationStage::CheckingCompetitor),
            "scheduling" => Ok(QualificationStage::Scheduling),
            "scheduled" => Ok(QualificationStage::Scheduled),
            "abandoned" => Ok(QualificationStage::Abandoned),
            "won" => Ok(QualificationStage::Won),
            "lost" => Ok(QualificationStage::Lost),
            other => Err(format!("unknown qualification stage: {other}")),
        }
    }
}

/// Which commercial solution the lead is leaning toward.
///
/// Numbering follows the menu the persona presents (1..5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SolutionChoice {
    OwnPlant,
    LotRental,
    DiscountHigh,
    DiscountLow,
    Investment,
    #[default]
    Unknown,
}

impl SolutionChoice {
    /// Map a menu ordinal (1..5) to a choice.
    pub fn from_menu(n: u8) -> Option<Self> {
        match n {
            1 => Some(SolutionChoice::OwnPlant),
            2 => Some(SolutionChoice::LotRental),
            3 => Some(SolutionChoice::DiscountHigh),
            4 => Some(SolutionChoice::DiscountLow),
            5 => Some(SolutionChoice::Investment),
            _ => None,
        }
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, SolutionChoice::Unknown)
    }
}

impl fmt::Display for SolutionChoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SolutionChoice::OwnPlant => "own_plant",
            SolutionChoice::LotRental => "lot_rental",
            SolutionChoice::DiscountHigh => "discount_high",
            SolutionChoice::DiscountLow => "discount_low",
            SolutionChoice::Investment => "investment",
            SolutionChoice::Unknown => "unknown",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for SolutionChoice {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "own_plant" => Ok(SolutionChoice::OwnPlant),
            "lot_rental" => Ok(SolutionChoice::LotRental),
            "discount_high" => Ok(SolutionChoice::DiscountHigh),
            "discount_low" => Ok(SolutionChoice::DiscountLow),
            "investment" => Ok(SolutionChoice::Investment),
            "unknown" => Ok(SolutionChoice::Unknown),
            other => Err(format!("unknown solution choice: {other}")),
        }
    }
}

/// Lead temperature derived from the qualification score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Temperature {
    #[default]
    Cold,
    Warm,
    Hot,
}

impl Temperature {
    /// Score-to-temperature mapping. The boundary belongs to the upper tier:
    /// 40 is Warm, 80 is Hot.
    pub fn from_score(score: u8, hot_min: u8) -> Self {
        if score >= hot_min {
            Temperature::Hot
        } else if score >= 40 {
            Temperature::Warm
        } else {
            Temperature::Cold
        }
    }
}

impl fmt::Display for Temperature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Temperature::Cold => "cold",
            Temperature::Warm => "warm",
            Temperature::Hot => "hot",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for Temperature {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "cold" => Ok(Temperature::Cold),
            "warm" => Ok(Temperature::Warm),
            "hot" => Ok(Temperature::Hot),
            other => Err(format!("unknown temperature: {other}")),
        }
    }
}

/// Kind of scheduled outbound touch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FollowUpKind {
    Reengage30m,
    Reengage24h,
    Nurture,
    Reminder24h,
    Reminder2h,
    Reminder30m,
}

impl FollowUpKind {
    /// Reengagements chase a quiet lead; reminders precede a booked meeting.
    pub fn is_reengagement(&self) -> bool {
        matches!(
            self,
            FollowUpKind::Reengage30m | FollowUpKind::Reengage24h | FollowUpKind::Nurture
        )
    }
}

impl fmt::Display for FollowUpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FollowUpKind::Reengage30m => "reengage_30m",
            FollowUpKind::Reengage24h => "reengage_24h",
            FollowUpKind::Nurture => "nurture",
            FollowUpKind::Reminder24h => "reminder_24h",
            FollowUpKind::Reminder2h => "reminder_2h",
            FollowUpKind::Reminder30m => "reminder_30m",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for FollowUpKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "reengage_30m" => Ok(FollowUpKind::Reengage30m),
            "reengage_24h" => Ok(FollowUpKind::Reengage24h),
            "nurture" => Ok(FollowUpKind::Nurture),
            "reminder_24h" => Ok(FollowUpKind::Reminder24h),
            "reminder_2h" => Ok(FollowUpKind::Reminder2h),
            "reminder_30m" => Ok(FollowUpKind::Reminder30m),
            other => Err(format!("unknown follow-up kind: {other}")),
        }
    }
}

/// Lifecycle of a follow-up row. Transitions out of Pending happen exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FollowUpStatus {
    Pending,
    /// Claimed by an executor tick; either sent or re-queued before the
    /// process exits.
    Claimed,
    Sent,
    Canceled,
    Failed,
}

impl FollowUpStatus {
    pub fn is_final(&self) -> bool {
        matches!(
            self,
            FollowUpStatus::Sent | FollowUpStatus::Canceled | FollowUpStatus::Failed
        )
    }
}

impl fmt::Display for FollowUpStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FollowUpStatus::Pending => "pending",
            FollowUpStatus::Claimed => "claimed",
            FollowUpStatus::Sent => "sent",
            FollowUpStatus::Canceled => "canceled",
            FollowUpStatus::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for FollowUpStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(FollowUpStatus::Pending),
            "claimed" => Ok(FollowUpStatus::Claimed),
            "sent" => Ok(FollowUpStatus::Sent),
            "canceled" => Ok(FollowUpStatus::Canceled),
            "failed" => Ok(FollowUpStatus::Failed),
            other => Err(format!("unknown follow-up status: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConversationState {
    #[default]
    Active,
    Dormant,
    Closed,
}

impl fmt::Display for ConversationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConversationState::Active => "active",
            ConversationState::Dormant => "dormant",
            ConversationState::Closed => "closed",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for ConversationState {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "active" => Ok(ConversationState::Active),
            "dormant" => Ok(ConversationState::Dormant),
            "closed" => Ok(ConversationState::Closed),
            other => Err(format!("unknown conversation state: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageDirection {
    Inbound,
    Outbound,
}

impl fmt::Display for MessageDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageDirection::Inbound => write!(f, "inbound"),
            MessageDirection::Outbound => write!(f, "outbound"),
        }
    }
}

impl std::str::FromStr for MessageDirection {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "inbound" => Ok(MessageDirection::Inbound),
            "outbound" => Ok(MessageDirection::Outbound),
            other => Err(format!("unknown direction: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    Text,
    Image,
    Audio,
    Document,
    Reaction,
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ContentType::Text => "text",
            ContentType::Image => "image",
            ContentType::Audio => "audio",
            ContentType::Document => "document",
            ContentType::Reaction => "reaction",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for ContentType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "text" => Ok(ContentType::Text),
            "image" => Ok(ContentType::Image),
            "audio" => Ok(ContentType::Audio),
            "document" => Ok(ContentType::Document),
            "reaction" => Ok(ContentType::Reaction),
            other => Err(format!("unknown content type: {other}")),
        }
    }
}

/// Lifecycle of a booked meeting. A lead holds at most one non-terminal event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CalendarEventStatus {
    Confirmed,
    Rescheduled,
    Canceled,
}

impl CalendarEventStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CalendarEventStatus::Canceled | CalendarEventStatus::Rescheduled
        )
    }
}

impl fmt::Display for CalendarEventStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CalendarEventStatus::Confirmed => "confirmed",
            CalendarEventStatus::Rescheduled => "rescheduled",
            CalendarEventStatus::Canceled => "canceled",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for CalendarEventStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "confirmed" => Ok(CalendarEventStatus::Confirmed),
            "rescheduled" => Ok(CalendarEventStatus::Rescheduled),
            "canceled" => Ok(CalendarEventStatus::Canceled),
            other => Err(format!("unknown calendar event status: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn phone_from_jid_normalizes() {
        let p = Phone::from_jid("5581999999999@s.whatsapp.net");
        assert_eq!(p.as_str(), "+5581999999999");
        assert_eq!(p.to_jid(), "5581999999999@s.whatsapp.net");
    }

    #[test]
    fn phone_strips_formatting() {
        let p = Phone::new("+55 (81) 99999-9999");
        assert_eq!(p.as_str(), "+5581999999999");
    }

    #[test]
    fn stage_round_trips_through_str() {
        for s in [
            "initial",
            "identifying",
            "discovering_solution",
            "capturing_bill",
            "checking_competitor",
            "scheduling",
            "scheduled",
            "abandoned",
            "won",
            "lost",
        ] {
            let stage = QualificationStage::from_str(s).unwrap();
            assert_eq!(stage.to_string(), s);
        }
    }

    #[test]
    fn terminal_stages() {
        assert!(QualificationStage::Scheduled.is_terminal());
        assert!(QualificationStage::Won.is_terminal());
        assert!(QualificationStage::Lost.is_terminal());
        assert!(QualificationStage::Abandoned.is_terminal());
        assert!(!QualificationStage::Scheduling.is_terminal());
    }

    #[test]
    fn temperature_boundaries_belong_to_upper_tier() {
        assert_eq!(Temperature::from_score(39, 80), Temperature::Cold);
        assert_eq!(Temperature::from_score(40, 80), Temperature::Warm);
        assert_eq!(Temperature::from_score(79, 80), Temperature::Warm);
        assert_eq!(Temperature::from_score(80, 80), Temperature::Hot);
        assert_eq!(Temperature::from_score(100, 80), Temperature::Hot);
    }

    #[test]
    fn solution_menu_mapping() {
        assert_eq!(SolutionChoice::from_menu(1), Some(SolutionChoice::OwnPlant));
        assert_eq!(
            SolutionChoice::from_menu(5),
            Some(SolutionChoice::Investment)
        );
        assert_eq!(SolutionChoice::from_menu(0), None);
        assert_eq!(SolutionChoice::from_menu(6), None);
    }

    #[test]
    fn followup_kind_classes() {
        assert!(FollowUpKind::Reengage30m.is_reengagement());
        assert!(FollowUpKind::Nurture.is_reengagement());
        assert!(!FollowUpKind::Reminder2h.is_reengagement());
    }
}
